//! Chiffrement des secrets stockés dans la configuration
//!
//! Les jetons de rafraîchissement et les secrets client ne doivent pas
//! apparaître en clair dans `config.yaml`. La clé AES-256 est dérivée de
//! l'identifiant de la machine : un fichier copié ailleurs n'est pas lisible.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::Engine;
use sha2::{Digest, Sha256};

/// Préfixe des valeurs chiffrées
const ENCRYPTED_PREFIX: &str = "encrypted:";

const NONCE_LEN: usize = 12;

/// Lit l'identifiant stable de la machine
fn machine_id() -> Result<String> {
    #[cfg(target_os = "linux")]
    {
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(id) = std::fs::read_to_string(path) {
                let id = id.trim();
                if !id.is_empty() {
                    return Ok(id.to_string());
                }
            }
        }
        Err(anyhow!("Failed to read machine-id"))
    }

    #[cfg(target_os = "macos")]
    {
        let output = std::process::Command::new("ioreg")
            .args(["-d2", "-c", "IOPlatformExpertDevice"])
            .output()?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find(|line| line.contains("IOPlatformUUID"))
            .and_then(|line| line.split('"').nth(3))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Failed to extract IOPlatformUUID from ioreg"))
    }

    #[cfg(target_os = "windows")]
    {
        let output = std::process::Command::new("wmic")
            .args(["csproduct", "get", "UUID"])
            .output()?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .nth(1)
            .map(|line| line.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("Failed to extract UUID from wmic"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        Err(anyhow!("Unsupported platform for machine id extraction"))
    }
}

fn cipher() -> Result<Aes256Gcm> {
    let mut hasher = Sha256::new();
    hasher.update(machine_id()?.as_bytes());
    hasher.update(b"pmomusic-secret-encryption-v2");
    let key = hasher.finalize();
    Aes256Gcm::new_from_slice(&key).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}

/// Chiffre un secret au format `encrypted:BASE64(nonce || ciphertext)`
///
/// Le nonce est dérivé du secret lui-même : chiffrer deux fois la même
/// valeur donne la même chaîne, et la configuration ne change pas sur disque.
pub fn encrypt_secret(secret: &str) -> Result<String> {
    let cipher = cipher()?;

    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"pmomusic-nonce-v2");
    let digest = hasher.finalize();
    let nonce_bytes = &digest[..NONCE_LEN];

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce_bytes), secret.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(format!(
        "{}{}",
        ENCRYPTED_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(&combined)
    ))
}

/// Déchiffre une valeur produite par [`encrypt_secret`]
pub fn decrypt_secret(encrypted: &str) -> Result<String> {
    let payload = encrypted
        .strip_prefix(ENCRYPTED_PREFIX)
        .ok_or_else(|| anyhow!("Invalid encrypted value (missing prefix)"))?;

    let combined = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;

    if combined.len() < NONCE_LEN {
        return Err(anyhow!("Invalid ciphertext (too short)"));
    }
    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);

    let plaintext = cipher()?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed (wrong machine or corrupted data): {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
}

/// Indique si une valeur de configuration est chiffrée
pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

/// Retourne le secret en clair, qu'il soit stocké chiffré ou non
pub fn reveal_secret(value: &str) -> Result<String> {
    if is_encrypted(value) {
        decrypt_secret(value)
    } else {
        Ok(value.to_string())
    }
}
