//! Couche d'accès à l'API REST Tidal
//!
//! Ce module fournit une interface bas-niveau pour communiquer avec l'API
//! Tidal. Chaque appel passe par le [`TokenManager`] : token rafraîchi avant
//! expiration, et au plus un rafraîchissement réactif suivi d'une seule
//! nouvelle tentative quand un 401 est confirmé par la sonde de session.

pub mod auth;
pub mod catalog;
pub mod playback;
pub mod signing;

use crate::error::{Result, TidalError};
use auth::{AuthEndpoints, Credential, CredentialStore, TokenManager};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use signing::RequestSigner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// URL de base de l'API Tidal
pub const API_BASE_URL: &str = "https://api.tidal.com/v1/";

/// URL de base du serveur d'authentification
pub const AUTH_BASE_URL: &str = "https://auth.tidal.com/v1/";

/// User-Agent de l'application Android TV
const USER_AGENT: &str = "TIDAL_ANDROID/1039 okhttp/3.14.9";

const DEFAULT_LOCALE: &str = "en_US";
const DEFAULT_DEVICE_TYPE: &str = "TV";

/// Issue d'une requête authentifiée
enum Outcome {
    Success(String),
    Unauthorized { status: u16, body: String },
    Failure { status: u16, body: String },
}

/// Client API bas-niveau pour communiquer avec Tidal
pub struct TidalApi {
    /// Client HTTP
    client: Client,
    /// URL de base de l'API (terminée par `/`)
    api_base: String,
    /// Gestionnaire des tokens
    tokens: TokenManager,
    /// Signature optionnelle des requêtes
    signer: Option<RequestSigner>,
}

impl TidalApi {
    /// Crée une nouvelle instance de l'API
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        credential: Credential,
    ) -> Result<Self> {
        Self::with_base_urls(client_id, client_secret, credential, API_BASE_URL, AUTH_BASE_URL)
    }

    /// Crée une instance pointant vers d'autres serveurs (tests, proxy)
    pub fn with_base_urls(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        credential: Credential,
        api_base: impl Into<String>,
        auth_base: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()?;

        let api_base = normalize_base(api_base.into());
        let endpoints = AuthEndpoints {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: api_base.clone(),
            auth_base: normalize_base(auth_base.into()),
        };

        Ok(Self {
            tokens: TokenManager::new(client.clone(), endpoints, credential),
            client,
            api_base,
            signer: None,
        })
    }

    /// Active la signature des requêtes
    pub fn with_signer(mut self, signer: RequestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Attache un stockage persistant des credentials
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.tokens.set_store(store);
        self
    }

    /// Gestionnaire des tokens
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Client HTTP partagé (téléchargements CDN)
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// URL de base de l'API
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Effectue une requête GET authentifiée à l'API
    ///
    /// `countryCode`, `locale` et `deviceType` sont ajoutés s'ils ne sont pas
    /// fournis par l'appelant.
    ///
    /// # Errors
    ///
    /// * `TidalError::CredentialsExhausted` - rafraîchissement impossible
    /// * `TidalError::TransientAuth` - 401 alors que la session est valide
    /// * `TidalError::Upstream` - toute autre réponse d'erreur
    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let credential = self.tokens.ensure_session().await?;

        let body = match self.request(endpoint, params, &credential).await? {
            Outcome::Success(body) => body,
            Outcome::Failure { status, body } => {
                warn!("Tidal error response for {} ({}): {}", endpoint, status, body);
                return Err(TidalError::from_status_code(status, body));
            }
            Outcome::Unauthorized { status, body } => {
                if self.tokens.session_valid(&credential).await? {
                    warn!("Unauthorized response for {} while session is valid", endpoint);
                    return Err(TidalError::TransientAuth(format!(
                        "{} returned {}: {}",
                        endpoint, status, body
                    )));
                }

                let refreshed = self.tokens.refresh_rejected(&credential.access_token).await?;
                info!("Refreshed tokens after unauthorized response, retrying {}", endpoint);

                match self.request(endpoint, params, &refreshed).await? {
                    Outcome::Success(body) => body,
                    Outcome::Unauthorized { status, body } | Outcome::Failure { status, body } => {
                        warn!("Tidal error response for {} ({}): {}", endpoint, status, body);
                        return Err(TidalError::from_status_code(status, body));
                    }
                }
            }
        };

        serde_json::from_str(&body).map_err(|e| {
            warn!("Failed to parse response from {}: {}", endpoint, e);
            TidalError::JsonParse(e)
        })
    }

    /// Envoie une requête avec le credential donné
    async fn request(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        credential: &Credential,
    ) -> Result<Outcome> {
        let url = format!("{}{}", self.api_base, endpoint);
        let query = self.build_query(endpoint, params, credential);

        debug!("GET {} with {} params", url, query.len());

        let response = self
            .tokens
            .authorize(self.client.get(&url), &credential.access_token)
            .query(&query)
            .send()
            .await?;

        let status = response.status().as_u16();
        debug!("Response status: {}", status);

        let body = response.text().await?;
        if (200..300).contains(&status) {
            return Ok(Outcome::Success(body));
        }

        if is_unauthorized(status, &body) {
            Ok(Outcome::Unauthorized { status, body })
        } else {
            Ok(Outcome::Failure { status, body })
        }
    }

    /// Paramètres finaux : appelant, valeurs par défaut, puis signature
    fn build_query(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        credential: &Credential,
    ) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let has = |query: &[(String, String)], key: &str| query.iter().any(|(k, _)| k == key);

        if !has(&query, "countryCode") {
            if let Some(country) = &credential.country_code {
                query.push(("countryCode".to_string(), country.clone()));
            }
        }
        if !has(&query, "locale") {
            query.push(("locale".to_string(), DEFAULT_LOCALE.to_string()));
        }
        if !has(&query, "deviceType") {
            query.push(("deviceType".to_string(), DEFAULT_DEVICE_TYPE.to_string()));
        }

        if let Some(signer) = &self.signer {
            let pairs: Vec<(&str, &str)> = query
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            let signature = signer.signature_params(endpoint, &pairs);
            query.extend(signature);
        }

        query
    }
}

/// Reconnaît une réponse 401
///
/// Le champ `status` du corps JSON fait foi ; à défaut, le statut HTTP.
fn is_unauthorized(http_status: u16, body: &str) -> bool {
    match serde_json::from_str::<Value>(body) {
        Ok(json) => match json.get("status").and_then(Value::as_u64) {
            Some(status) => status == 401,
            None => http_status == 401,
        },
        Err(_) => http_status == 401,
    }
}

fn normalize_base(mut base: String) -> String {
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn api() -> TidalApi {
        TidalApi::new("client", "secret", Credential::new("a", "r", Utc::now())).unwrap()
    }

    #[test]
    fn test_is_unauthorized() {
        assert!(is_unauthorized(401, r#"{"status": 401, "subStatus": 11003}"#));
        assert!(is_unauthorized(400, r#"{"status": 401}"#));
        assert!(!is_unauthorized(401, r#"{"status": 403}"#));
        assert!(is_unauthorized(401, "Unauthorized"));
        assert!(is_unauthorized(401, r#"{"error": "x"}"#));
        assert!(!is_unauthorized(404, "not found"));
    }

    #[test]
    fn test_default_query_params() {
        let api = api();
        let credential = Credential::new("a", "r", Utc::now()).with_country_code("FR");

        let query = api.build_query("tracks/1", &[("limit", "20"), ("locale", "fr_FR")], &credential);
        assert!(query.contains(&("countryCode".to_string(), "FR".to_string())));
        assert!(query.contains(&("locale".to_string(), "fr_FR".to_string())));
        assert!(query.contains(&("deviceType".to_string(), "TV".to_string())));
        assert!(!query.iter().any(|(k, _)| k == "request_sig"));
    }

    #[test]
    fn test_signed_query() {
        let api = api().with_signer(RequestSigner::new("s"));
        let credential = Credential::new("a", "r", Utc::now());

        let query = api.build_query("tracks/1", &[], &credential);
        assert!(query.iter().any(|(k, _)| k == "request_ts"));
        assert!(query.iter().any(|(k, _)| k == "request_sig"));
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base("http://x/v1".into()), "http://x/v1/");
        assert_eq!(normalize_base("http://x/v1/".into()), "http://x/v1/");
    }
}
