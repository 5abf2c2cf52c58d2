//! Gestion des erreurs pour le client Tidal

use thiserror::Error;

/// Type Result personnalisé pour pmotidal
pub type Result<T> = std::result::Result<T, TidalError>;

/// Erreurs possibles lors de l'utilisation du client Tidal
#[derive(Error, Debug)]
pub enum TidalError {
    /// L'hôte de l'URL n'est pas un hôte Tidal
    #[error("URL not supported: {0}")]
    UnsupportedUrl(String),

    /// Hôte Tidal, mais le chemin ne désigne pas une entité connue
    #[error("URL unrecognised: {0}")]
    UnrecognizedEntity(String),

    /// Le rafraîchissement du token a échoué : le client reste bloqué
    /// jusqu'au remplacement des credentials
    #[error("Credentials exhausted: {0}")]
    CredentialsExhausted(String),

    /// 401 reçu alors que la session est toujours valide
    #[error("Transient authentication error: {0}")]
    TransientAuth(String),

    /// Aucun rendu ne satisfait la qualité demandée
    #[error("No applicable format: {0}")]
    NoApplicableFormat(String),

    /// Manifeste illisible ou d'un dialecte non supporté
    #[error("Unsupported manifest: {0}")]
    UnsupportedManifest(String),

    /// Échec du téléchargement d'un segment (index à partir de 0)
    #[error("Failed to fetch segment {index}: {reason}")]
    SegmentFetchFailed { index: usize, reason: String },

    /// Le processus de décodage externe a échoué
    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    /// Réponse d'erreur de l'API Tidal
    #[error("Tidal API error (status {status}): {body}")]
    Upstream { status: u16, body: String },

    /// Erreur HTTP
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Erreur de parsing JSON
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Erreur d'entrée/sortie (processus, fichiers temporaires)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Erreur de configuration (anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Erreur de configuration Tidal (client id, tokens, etc.)
    #[error("Tidal configuration error: {0}")]
    Configuration(String),
}

impl TidalError {
    /// Crée une erreur depuis un code de statut HTTP et le corps de la réponse
    pub fn from_status_code(status: u16, body: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            body: body.into(),
        }
    }

    /// Vérifie si l'erreur est liée à l'authentification
    pub fn is_auth_error(&self) -> bool {
        match self {
            TidalError::CredentialsExhausted(_) | TidalError::TransientAuth(_) => true,
            TidalError::Upstream { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// Vérifie si la ressource demandée n'existe pas
    pub fn is_not_found(&self) -> bool {
        matches!(self, TidalError::Upstream { status: 404, .. })
    }

    /// Vérifie si l'erreur est une erreur de rate limiting
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, TidalError::Upstream { status: 429, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(TidalError::from_status_code(404, "").is_not_found());
        assert!(TidalError::from_status_code(429, "").is_rate_limit());
        assert!(TidalError::from_status_code(401, "").is_auth_error());
        assert!(TidalError::TransientAuth("x".into()).is_auth_error());
        assert!(!TidalError::UnsupportedUrl("x".into()).is_auth_error());
    }

    #[test]
    fn test_segment_error_message() {
        let err = TidalError::SegmentFetchFailed {
            index: 1,
            reason: "status 500".into(),
        };
        assert_eq!(err.to_string(), "Failed to fetch segment 1: status 500");
    }
}
