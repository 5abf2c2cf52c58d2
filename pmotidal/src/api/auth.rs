//! Cycle de vie des tokens OAuth Tidal
//!
//! Le [`TokenManager`] possède le [`Credential`] courant. Il le rafraîchit
//! avant expiration (`ensure_valid`) ou après un 401 confirmé par la sonde de
//! session (`refresh_rejected`). Un seul rafraîchissement est en vol à la
//! fois : les appelants concurrents attendent son résultat.
//!
//! Un échec logique du rafraîchissement (refresh token rejeté) lève le
//! drapeau `exhausted` ; tous les appels suivants échouent alors
//! immédiatement avec `TidalError::CredentialsExhausted` jusqu'à
//! [`TokenManager::replace_credential`].

use crate::error::{Result, TidalError};
use crate::models::SessionInfo;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Credential OAuth courant
///
/// Remplacé en bloc à chaque rafraîchissement, jamais modifié champ par champ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// Code pays de la session (`countryCode`)
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            country_code: None,
            user_id: None,
        }
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    /// Vérifie si le token est expiré à la date donnée
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Persistance des credentials
///
/// Implémenté par `ConfigCredentialStore` sur la configuration PMOMusic.
pub trait CredentialStore: Send + Sync {
    /// Charge le credential enregistré, s'il existe
    fn load(&self) -> Result<Option<Credential>>;

    /// Enregistre un credential
    fn save(&self, credential: &Credential) -> Result<()>;
}

/// Réponse de `oauth2/token`
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Paramètres d'accès aux endpoints d'authentification
#[derive(Debug, Clone)]
pub(crate) struct AuthEndpoints {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub auth_base: String,
}

/// Gestionnaire du cycle de vie du credential
pub struct TokenManager {
    http: Client,
    endpoints: AuthEndpoints,
    credential: RwLock<Credential>,
    /// Garde single-flight des rafraîchissements et de la résolution de session
    refresh_gate: Mutex<()>,
    exhausted: AtomicBool,
    /// Levé quand `sessions` a refusé de fournir le code pays
    session_lookup_failed: AtomicBool,
    refresh_count: AtomicU64,
    store: Option<Arc<dyn CredentialStore>>,
}

impl TokenManager {
    pub(crate) fn new(http: Client, endpoints: AuthEndpoints, credential: Credential) -> Self {
        Self {
            http,
            endpoints,
            credential: RwLock::new(credential),
            refresh_gate: Mutex::new(()),
            exhausted: AtomicBool::new(false),
            session_lookup_failed: AtomicBool::new(false),
            refresh_count: AtomicU64::new(0),
            store: None,
        }
    }

    pub(crate) fn set_store(&mut self, store: Arc<dyn CredentialStore>) {
        self.store = Some(store);
    }

    /// Client ID envoyé dans `X-Tidal-Token`
    pub fn client_id(&self) -> &str {
        &self.endpoints.client_id
    }

    /// Ajoute les headers d'authentification à une requête
    pub(crate) fn authorize(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("X-Tidal-Token", &self.endpoints.client_id)
            .bearer_auth(access_token)
    }

    /// Retourne une copie du credential courant
    pub async fn credential(&self) -> Credential {
        self.credential.read().await.clone()
    }

    /// Vrai si un rafraîchissement a échoué
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Nombre de rafraîchissements effectués
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    fn check_exhausted(&self) -> Result<()> {
        if self.is_exhausted() {
            return Err(TidalError::CredentialsExhausted(
                "Last refresh failed to authorize, new tokens are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Retourne un credential non expiré
    ///
    /// Rafraîchit le token s'il est expiré. Les appelants concurrents qui
    /// détectent l'expiration en même temps partagent un seul rafraîchissement.
    pub async fn ensure_valid(&self) -> Result<Credential> {
        self.check_exhausted()?;

        let current = self.credential().await;
        if !current.is_expired() {
            return Ok(current);
        }

        let _gate = self.refresh_gate.lock().await;
        self.check_exhausted()?;

        // Un autre appelant a pu rafraîchir pendant l'attente
        let current = self.credential().await;
        if !current.is_expired() {
            return Ok(current);
        }

        debug!("Access token expired at {}, refreshing", current.expires_at);
        self.refresh_locked(&current).await
    }

    /// Retourne un credential valide portant le code pays de la session
    ///
    /// Si le code pays est inconnu, l'endpoint `sessions` est interrogé une
    /// fois pour le renseigner ainsi que l'identifiant utilisateur. Un échec
    /// n'est pas retenté avant le prochain changement de token.
    pub async fn ensure_session(&self) -> Result<Credential> {
        let current = self.ensure_valid().await?;
        if current.country_code.is_some() || self.session_lookup_failed() {
            return Ok(current);
        }

        let _gate = self.refresh_gate.lock().await;
        let current = self.credential().await;
        if current.country_code.is_some() || self.session_lookup_failed() {
            return Ok(current);
        }

        let url = format!("{}sessions", self.endpoints.api_base);
        debug!("GET {} (session lookup)", url);
        let response = self
            .authorize(self.http.get(&url), &current.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            self.session_lookup_failed.store(true, Ordering::SeqCst);
            warn!(
                "Session lookup failed with status {}, continuing without country code",
                response.status()
            );
            return Ok(current);
        }

        let session: SessionInfo = response.json().await?;
        let updated = Credential {
            country_code: session.country_code,
            user_id: session.user_id,
            ..current
        };
        debug!(
            "Session country code: {:?}, user: {:?}",
            updated.country_code, updated.user_id
        );

        *self.credential.write().await = updated.clone();
        self.persist(&updated);
        Ok(updated)
    }

    /// Vrai si la dernière recherche de session a échoué pour le token courant
    pub fn session_lookup_failed(&self) -> bool {
        self.session_lookup_failed.load(Ordering::SeqCst)
    }

    /// Sonde de session : vrai si `sessions` accepte ce token
    pub async fn session_valid(&self, credential: &Credential) -> Result<bool> {
        let url = format!("{}sessions", self.endpoints.api_base);
        let response = self
            .authorize(self.http.get(&url), &credential.access_token)
            .send()
            .await?;
        debug!("Session probe returned {}", response.status());
        Ok(response.status().is_success())
    }

    /// Rafraîchit après le rejet de `rejected_token`
    ///
    /// Si le credential a déjà été remplacé depuis, le nouveau est retourné
    /// sans second rafraîchissement.
    pub async fn refresh_rejected(&self, rejected_token: &str) -> Result<Credential> {
        let _gate = self.refresh_gate.lock().await;
        self.check_exhausted()?;

        let current = self.credential().await;
        if current.access_token != rejected_token {
            debug!("Credential already refreshed by a concurrent call");
            return Ok(current);
        }

        self.refresh_locked(&current).await
    }

    /// Installe un credential obtenu à l'extérieur et lève le blocage
    pub async fn replace_credential(&self, credential: Credential) {
        let _gate = self.refresh_gate.lock().await;
        *self.credential.write().await = credential.clone();
        self.exhausted.store(false, Ordering::SeqCst);
        self.session_lookup_failed.store(false, Ordering::SeqCst);
        info!("Tidal credential replaced");
        self.persist(&credential);
    }

    /// Rafraîchissement proprement dit ; `refresh_gate` doit être tenu
    async fn refresh_locked(&self, current: &Credential) -> Result<Credential> {
        let url = format!("{}oauth2/token", self.endpoints.auth_base);
        let form = [
            ("refresh_token", current.refresh_token.as_str()),
            ("client_id", self.endpoints.client_id.as_str()),
            ("client_secret", self.endpoints.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];

        debug!("POST {}", url);
        // Les erreurs réseau sont propagées sans bloquer le client
        let response = self.http.post(&url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.exhausted.store(true, Ordering::SeqCst);
            error!("Tidal token refresh rejected ({}): {}", status.as_u16(), body);
            return Err(TidalError::CredentialsExhausted(format!(
                "refresh rejected with status {}",
                status.as_u16()
            )));
        }

        let tokens: TokenResponse = response.json().await?;
        let refreshed = Credential {
            access_token: tokens.access_token,
            refresh_token: tokens
                .refresh_token
                .unwrap_or_else(|| current.refresh_token.clone()),
            expires_at: Utc::now() + ChronoDuration::seconds(tokens.expires_in),
            country_code: current.country_code.clone(),
            user_id: current.user_id.clone(),
        };

        *self.credential.write().await = refreshed.clone();
        self.session_lookup_failed.store(false, Ordering::SeqCst);
        let count = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Refreshed Tidal tokens (refresh #{}, expires at {})",
            count, refreshed.expires_at
        );

        self.persist(&refreshed);
        Ok(refreshed)
    }

    fn persist(&self, credential: &Credential) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(credential) {
                warn!("Failed to persist Tidal credential: {}", e);
            }
        }
    }
}
