//! Builds the credential secret object applied directly to the environment.
//!
//! The secret never passes through the repository; it is handed straight to
//! the environment client so private material is not committed.

use serde_json::json;

use crate::credentials::CredentialBundle;
use crate::environment::{EnvObject, ObjectRef};

/// Builds a `Secret` object holding the bundle's material as string data.
#[must_use]
pub fn credential_secret(name: &str, namespace: &str, bundle: &CredentialBundle) -> EnvObject {
    let mut data = serde_json::Map::new();
    for (key, value) in bundle.secret_data() {
        data.insert(key, serde_json::Value::String(value));
    }
    EnvObject {
        reference: ObjectRef::namespaced("Secret", namespace, name),
        manifest: json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": namespace,
            },
            "type": "Opaque",
            "stringData": serde_json::Value::Object(data),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_bundle_maps_to_string_data() {
        let bundle = CredentialBundle::Basic {
            username: String::from("deploy"),
            password: String::from("hunter2"),
        };
        let secret = credential_secret("moor-system", "moor-system", &bundle);
        assert_eq!(secret.reference.kind, "Secret");
        assert_eq!(
            secret.manifest["stringData"]["username"],
            serde_json::json!("deploy")
        );
        assert_eq!(
            secret.manifest["stringData"]["password"],
            serde_json::json!("hunter2")
        );
    }
}
