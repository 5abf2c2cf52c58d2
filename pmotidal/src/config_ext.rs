//! Extension pour intégrer la configuration Tidal dans pmoconfig
//!
//! Ce module fournit le trait `TidalConfigExt`, qui ajoute à
//! `pmoconfig::Config` la gestion des credentials Tidal
//! (`accounts.tidal.*`) et des paramètres de lecture (`host.tidal.*`),
//! ainsi que [`ConfigCredentialStore`], le stockage persistant utilisé par le
//! `TokenManager`.

use crate::api::auth::{Credential, CredentialStore};
use crate::models::AudioQuality;
use anyhow::{anyhow, Result};
use chrono::DateTime;
use pmoconfig::encryption::{encrypt_secret, reveal_secret};
use pmoconfig::Config;
use serde_yaml::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

const ACCOUNT: [&str; 2] = ["accounts", "tidal"];
const HOST: [&str; 2] = ["host", "tidal"];

const DEFAULT_DECODER: &str = "ffmpeg";
const DEFAULT_SCRATCH_DIR: &str = "scratch_tidal";
const DEFAULT_SEGMENT_PREFETCH: usize = 2;

fn account(key: &str) -> [&str; 3] {
    [ACCOUNT[0], ACCOUNT[1], key]
}

fn host(key: &str) -> [&str; 3] {
    [HOST[0], HOST[1], key]
}

/// Trait d'extension pour gérer la configuration Tidal dans pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmotidal::TidalConfigExt;
///
/// let config = get_config()?;
/// let client_id = config.get_tidal_client_id()?;
/// println!("Tidal client: {}", client_id);
/// ```
pub trait TidalConfigExt {
    /// Récupère le client id de l'application Tidal
    ///
    /// # Errors
    ///
    /// Retourne une erreur si le client id n'est pas configuré
    fn get_tidal_client_id(&self) -> Result<String>;

    fn set_tidal_client_id(&self, client_id: &str) -> Result<()>;

    /// Récupère le client secret, déchiffré s'il est stocké chiffré
    fn get_tidal_client_secret(&self) -> Result<String>;

    /// Enregistre le client secret (chiffré)
    fn set_tidal_client_secret(&self, secret: &str) -> Result<()>;

    /// Secret de signature des requêtes, s'il est configuré
    fn get_tidal_signing_secret(&self) -> Result<Option<String>>;

    /// Récupère le credential enregistré
    ///
    /// # Returns
    ///
    /// `None` si l'access token ou le refresh token manque
    fn get_tidal_credential(&self) -> Result<Option<Credential>>;

    /// Enregistre un credential
    ///
    /// Le refresh token est stocké chiffré ; l'expiration en secondes Unix.
    fn set_tidal_credential(&self, credential: &Credential) -> Result<()>;

    /// Supprime le credential de la configuration
    fn clear_tidal_credential(&self) -> Result<()>;

    /// Programme de décodage externe (défaut : `ffmpeg`)
    fn get_tidal_decoder(&self) -> String;

    fn set_tidal_decoder(&self, program: &str) -> Result<()>;

    /// Répertoire des fichiers temporaires de remuxage
    ///
    /// Le chemin absolu est retourné ; le répertoire est créé s'il n'existe pas.
    fn get_tidal_scratch_dir(&self) -> Result<PathBuf>;

    fn set_tidal_scratch_dir(&self, directory: String) -> Result<()>;

    /// Nombre de segments téléchargés en avance (au moins 1)
    fn get_tidal_segment_prefetch(&self) -> usize;

    /// Qualité demandée quand l'appelant n'en précise pas
    fn get_tidal_default_quality(&self) -> AudioQuality;

    fn set_tidal_default_quality(&self, quality: AudioQuality) -> Result<()>;

    /// Remuxe les flux segmentés via le décodeur (sinon segments bruts)
    fn get_tidal_remux_segments(&self) -> bool;
}

impl TidalConfigExt for Config {
    fn get_tidal_client_id(&self) -> Result<String> {
        self.get_string(&account("client_id"))
            .ok_or_else(|| anyhow!("Tidal client_id not configured"))
    }

    fn set_tidal_client_id(&self, client_id: &str) -> Result<()> {
        self.set_value(&account("client_id"), Value::String(client_id.to_string()))
    }

    fn get_tidal_client_secret(&self) -> Result<String> {
        let stored = self
            .get_string(&account("client_secret"))
            .ok_or_else(|| anyhow!("Tidal client_secret not configured"))?;
        reveal_secret(&stored).map_err(|e| anyhow!("Failed to decrypt client_secret: {}", e))
    }

    fn set_tidal_client_secret(&self, secret: &str) -> Result<()> {
        self.set_value(&account("client_secret"), Value::String(protect(secret)))
    }

    fn get_tidal_signing_secret(&self) -> Result<Option<String>> {
        self.get_string(&account("signing_secret"))
            .map(|s| reveal_secret(&s))
            .transpose()
    }

    fn get_tidal_credential(&self) -> Result<Option<Credential>> {
        let (Some(access_token), Some(refresh_token)) = (
            self.get_string(&account("access_token")),
            self.get_string(&account("refresh_token")),
        ) else {
            return Ok(None);
        };

        let refresh_token = reveal_secret(&refresh_token)
            .map_err(|e| anyhow!("Failed to decrypt refresh_token: {}", e))?;

        let expires_at = self
            .get_u64(&account("expires_at"))
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();

        Ok(Some(Credential {
            access_token,
            refresh_token,
            expires_at,
            country_code: self.get_string(&account("country_code")),
            user_id: self.get_string(&account("user_id")),
        }))
    }

    fn set_tidal_credential(&self, credential: &Credential) -> Result<()> {
        self.set_value(
            &account("access_token"),
            Value::String(credential.access_token.clone()),
        )?;
        self.set_value(
            &account("refresh_token"),
            Value::String(protect(&credential.refresh_token)),
        )?;
        self.set_u64(
            &account("expires_at"),
            u64::try_from(credential.expires_at.timestamp()).unwrap_or(0),
        )?;
        self.set_value(
            &account("country_code"),
            Value::String(credential.country_code.clone().unwrap_or_default()),
        )?;
        self.set_value(
            &account("user_id"),
            Value::String(credential.user_id.clone().unwrap_or_default()),
        )
    }

    fn clear_tidal_credential(&self) -> Result<()> {
        for key in ["access_token", "refresh_token", "country_code", "user_id"] {
            self.set_value(&account(key), Value::String(String::new()))?;
        }
        self.set_u64(&account("expires_at"), 0)
    }

    fn get_tidal_decoder(&self) -> String {
        self.get_string(&host("decoder"))
            .unwrap_or_else(|| DEFAULT_DECODER.to_string())
    }

    fn set_tidal_decoder(&self, program: &str) -> Result<()> {
        self.set_value(&host("decoder"), Value::String(program.to_string()))
    }

    fn get_tidal_scratch_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&host("scratch_directory"), DEFAULT_SCRATCH_DIR)
    }

    fn set_tidal_scratch_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&host("scratch_directory"), directory)
    }

    fn get_tidal_segment_prefetch(&self) -> usize {
        self.get_u64(&host("segment_prefetch"))
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(DEFAULT_SEGMENT_PREFETCH)
            .max(1)
    }

    fn get_tidal_default_quality(&self) -> AudioQuality {
        match self.get_string(&host("default_quality")) {
            Some(label) => label.parse().unwrap_or_else(|e| {
                warn!("Ignoring host.tidal.default_quality: {}", e);
                AudioQuality::default()
            }),
            None => AudioQuality::default(),
        }
    }

    fn set_tidal_default_quality(&self, quality: AudioQuality) -> Result<()> {
        self.set_value(
            &host("default_quality"),
            Value::String(quality.as_str().to_string()),
        )
    }

    fn get_tidal_remux_segments(&self) -> bool {
        self.get_bool(&host("remux_segments"), true)
    }
}

/// Chiffre un secret ; le stocke en clair si la machine ne le permet pas
fn protect(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    encrypt_secret(secret).unwrap_or_else(|e| {
        warn!("Storing Tidal secret unencrypted: {}", e);
        secret.to_string()
    })
}

/// Stockage des credentials dans la configuration PMOMusic
pub struct ConfigCredentialStore {
    config: Arc<Config>,
}

impl ConfigCredentialStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn load(&self) -> crate::error::Result<Option<Credential>> {
        Ok(self.config.get_tidal_credential()?)
    }

    fn save(&self, credential: &Credential) -> crate::error::Result<()> {
        Ok(self.config.set_tidal_credential(credential)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn config(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_missing_credential() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        assert!(config.get_tidal_credential().unwrap().is_none());
        assert!(config.get_tidal_client_id().is_err());
    }

    #[test]
    fn test_credential_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(config(&dir));
        let store = ConfigCredentialStore::new(config.clone());

        let mut credential = Credential::new(
            "access",
            "refresh",
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_country_code("FR");
        credential.user_id = Some("1234".to_string());

        store.save(&credential).unwrap();
        assert_eq!(store.load().unwrap(), Some(credential));

        config.clear_tidal_credential().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_host_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        assert_eq!(config.get_tidal_decoder(), "ffmpeg");
        assert_eq!(config.get_tidal_segment_prefetch(), 2);
        assert_eq!(config.get_tidal_default_quality(), AudioQuality::HiResLossless);
        assert!(config.get_tidal_remux_segments());
        assert!(config.get_tidal_signing_secret().unwrap().is_none());

        let scratch = config.get_tidal_scratch_dir().unwrap();
        assert!(scratch.is_dir());
        assert!(scratch.starts_with(dir.path()));
    }

    #[test]
    fn test_default_quality_setter() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        config.set_tidal_default_quality(AudioQuality::High).unwrap();
        assert_eq!(config.get_tidal_default_quality(), AudioQuality::High);
    }
}
