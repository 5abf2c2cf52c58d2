//! Chiffre un secret pour l'écrire dans config.yaml
//!
//! Usage:
//!   cargo run -p pmoconfig --example encrypt_secret -- "mon_secret"

use anyhow::{anyhow, Result};
use pmoconfig::encryption::{encrypt_secret, reveal_secret};

fn main() -> Result<()> {
    let secret = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: encrypt_secret <secret>"))?;

    let encrypted = encrypt_secret(&secret)?;
    // On relit immédiatement pour s'assurer que la machine sait déchiffrer
    if reveal_secret(&encrypted)? != secret {
        return Err(anyhow!("round-trip check failed on this machine"));
    }

    println!("{}", encrypted);
    Ok(())
}
