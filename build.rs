//! Generates the `moor.1` manual page from the clap definitions at build
//! time, so packaging can pick it up from the build output directory.

use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::{env, fs};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn main() -> Result<(), Box<dyn Error>> {
    let mut out = std::io::stdout();
    for tracked in ["build.rs", "src/cli/mod.rs"] {
        writeln!(out, "cargo:rerun-if-changed={tracked}")?;
    }

    let out_dir = env::var_os("OUT_DIR").ok_or("OUT_DIR was not set by cargo")?;
    let mut rendered = Vec::new();
    Man::new(cli::Cli::command()).render(&mut rendered)?;
    fs::write(Path::new(&out_dir).join("moor.1"), rendered)?;
    Ok(())
}
