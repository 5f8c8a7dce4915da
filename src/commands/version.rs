//! Display the version.

use anyhow::Result;

pub fn run() -> Result<()> {
    println!("bosun v{}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
