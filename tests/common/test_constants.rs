//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file
//! in `tests/`). Placing shared constants under `tests/common/` avoids
//! creating an additional integration test binary while still allowing reuse
//! via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Branch used by every bootstrap scenario.
pub const BRANCH: &str = "main";

/// Namespace the components are installed into.
pub const NAMESPACE: &str = "moor-system";

/// Host identity returned by scripted host scans.
pub const SCANNED_HOST_KEY: &str =
    "git.example.com ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIPlaceholderTestIdentity\n";
