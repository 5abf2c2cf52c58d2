//! # pmotidal - Client Tidal pour PMOMusic
//!
//! Cette crate résout une URL Tidal (piste, album, artiste, playlist) en
//! métadonnées et, pour une piste, en flux audio.
//!
//! ## Vue d'ensemble
//!
//! - Cycle de vie des tokens OAuth : rafraîchissement avant expiration, un
//!   seul rafraîchissement en vol, rafraîchissement réactif après un 401
//!   confirmé par la sonde de session, blocage définitif si le refresh token
//!   est rejeté
//! - Reconnaissance des URLs du lecteur web et des liens de partage
//! - Catalogue enrichi (crédits, album complet, discographie)
//! - Sélection déterministe de la qualité
//! - Manifestes DASH (segments) et BTS (fichier direct)
//! - Assemblage des segments dans l'ordre, avec remuxage par un décodeur
//!   externe (`ffmpeg`) et nettoyage des fichiers temporaires
//! - Cache en mémoire avec TTL
//!
//! ## Architecture
//!
//! ```text
//! pmotidal/
//! ├── src/
//! │   ├── lib.rs              # Module principal (ce fichier)
//! │   ├── client.rs           # TidalClient::resolve, StreamFactory
//! │   ├── url.rs              # URL -> (type, id)
//! │   ├── models.rs           # Structures de données
//! │   ├── quality.rs          # Sélection du rendu
//! │   ├── manifest.rs         # Manifestes DASH / BTS
//! │   ├── api/
//! │   │   ├── mod.rs          # Requêtes authentifiées
//! │   │   ├── auth.rs         # Credential, TokenManager
//! │   │   ├── catalog.rs      # Catalogue
//! │   │   ├── playback.rs     # Informations de lecture
//! │   │   └── signing.rs      # Signature des requêtes
//! │   ├── stream/
//! │   │   ├── mod.rs          # StreamAssembler
//! │   │   └── transcode.rs    # Processus de décodage externe
//! │   ├── cache.rs            # Cache en mémoire
//! │   ├── config_ext.rs       # Extension pmoconfig
//! │   └── error.rs            # Gestion des erreurs
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmotidal::{AudioQuality, QualityRequest, Resolution, TidalClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Utilise la config depuis pmoconfig (accounts.tidal, host.tidal)
//!     let client = TidalClient::from_config()?;
//!
//!     match client.resolve("https://listen.tidal.com/album/91969976/track/91969977").await? {
//!         Resolution::Track { track, stream } => {
//!             println!("{}", track.full_title());
//!             let handle = stream.open(&QualityRequest::exactly(AudioQuality::Lossless)).await?;
//!             let mut file = tokio::fs::File::create("track.flac").await?;
//!             handle.write_to(&mut file).await?;
//!         }
//!         other => {
//!             for track in other.children() {
//!                 println!("- {}", track.full_title());
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Qualités
//!
//! - `LOW`, `HIGH` : AAC (segments remuxés en `.m4a`)
//! - `LOSSLESS` : FLAC 16 bit / 44.1 kHz
//! - `HI_RES` : MQA
//! - `HI_RES_LOSSLESS` : FLAC jusqu'à 24 bit / 192 kHz, livré en segments DASH
//!
//! ## Gestion des erreurs
//!
//! ```rust,ignore
//! use pmotidal::TidalError;
//!
//! match stream.open(&request).await {
//!     Ok(handle) => println!("{}", handle.mime_type),
//!     Err(TidalError::NoApplicableFormat(msg)) => println!("Quality not available: {}", msg),
//!     Err(TidalError::CredentialsExhausted(_)) => println!("Log in again"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```
//!
//! ## Voir aussi
//!
//! - [`pmoconfig`] : Configuration

pub mod api;
pub mod cache;
pub mod client;
pub mod config_ext;
pub mod error;
pub mod manifest;
pub mod models;
pub mod quality;
pub mod stream;
pub mod url;

pub use api::auth::{Credential, CredentialStore, TokenManager};
pub use api::catalog::CatalogRecord;
pub use api::playback::PlaybackInfo;
pub use api::signing::RequestSigner;
pub use api::TidalApi;
pub use cache::TidalCache;
pub use client::{Resolution, StreamFactory, TidalClient};
pub use config_ext::{ConfigCredentialStore, TidalConfigExt};
pub use error::{Result, TidalError};
pub use manifest::{Delivery, Segment, SegmentPlan};
pub use models::{Album, Artist, ArtistDetails, AudioQuality, Playlist, Track};
pub use quality::{QualityRequest, Rendition};
pub use stream::{OutputMode, StreamAssembler, StreamHandle, TranscodeSpec};
pub use url::{resolve_url, EntityType, ResolvedEntity};
