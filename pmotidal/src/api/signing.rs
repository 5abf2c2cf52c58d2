//! Signature MD5 des requêtes
//!
//! Certains endpoints exigent une signature calculée à partir du chemin de
//! l'endpoint, des paramètres triés, d'un timestamp et d'un secret
//! d'application. La signature est ajoutée à la requête sous la forme
//! `request_ts` / `request_sig`.

use md5::{Digest, Md5};
use std::time::{SystemTime, UNIX_EPOCH};

/// Paramètres d'identité exclus de la signature
const EXCLUDED_PARAMS: &[&str] = &["app_id", "user_auth_token", "request_ts", "request_sig"];

/// Génère un timestamp Unix actuel
///
/// # Returns
///
/// Timestamp Unix sous forme de string (integer, sans décimales)
///
/// # Exemple
///
/// ```
/// use pmotidal::api::signing::get_timestamp;
/// let ts = get_timestamp();
/// println!("Timestamp: {}", ts);
/// ```
pub fn get_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

/// Calcule la signature d'une requête
///
/// La chaîne hachée est : chemin de l'endpoint sans `/`, puis pour chaque
/// paramètre trié par clé `clé + valeur`, puis le timestamp, puis le secret.
///
/// # Arguments
///
/// * `endpoint` - Chemin de l'endpoint (ex: `tracks/123/playbackinfo`)
/// * `params` - Paramètres de la requête
/// * `timestamp` - Timestamp Unix
/// * `secret` - Secret d'application en bytes
///
/// # Returns
///
/// Signature MD5 hexadécimale
pub fn sign_request(
    endpoint: &str,
    params: &[(&str, &str)],
    timestamp: &str,
    secret: &[u8],
) -> String {
    let mut sorted: Vec<&(&str, &str)> = params
        .iter()
        .filter(|(key, _)| !EXCLUDED_PARAMS.contains(key))
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Md5::new();
    hasher.update(endpoint.replace('/', "").as_bytes());
    for (key, value) in sorted {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.update(timestamp.as_bytes());
    hasher.update(secret);

    format!("{:x}", hasher.finalize())
}

/// Signataire de requêtes portant le secret d'application
#[derive(Debug, Clone)]
pub struct RequestSigner {
    secret: Vec<u8>,
}

impl RequestSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Retourne les paramètres `request_ts` et `request_sig` à ajouter
    pub fn signature_params(&self, endpoint: &str, params: &[(&str, &str)]) -> [(String, String); 2] {
        self.signature_params_at(endpoint, params, &get_timestamp())
    }

    /// Variante à timestamp fixé
    pub fn signature_params_at(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        timestamp: &str,
    ) -> [(String, String); 2] {
        let sig = sign_request(endpoint, params, timestamp, &self.secret);
        [
            ("request_ts".to_string(), timestamp.to_string()),
            ("request_sig".to_string(), sig),
        ]
    }
}
