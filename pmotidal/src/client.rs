//! Client principal pour interagir avec Tidal
//!
//! [`TidalClient::resolve`] est le point d'entrée : une URL Tidal devient
//! une [`Resolution`] (métadonnées, pistes enfants) et, pour une piste, une
//! [`StreamFactory`] qui n'ouvre le flux audio qu'à la demande.

use crate::api::auth::Credential;
use crate::api::catalog::DEFAULT_PAGE_SIZE;
use crate::api::signing::RequestSigner;
use crate::api::TidalApi;
use crate::cache::TidalCache;
use crate::config_ext::{ConfigCredentialStore, TidalConfigExt};
use crate::error::{Result, TidalError};
use crate::manifest::Delivery;
use crate::models::*;
use crate::quality::{self, QualityRequest, Rendition};
use crate::stream::{OutputMode, StreamAssembler, StreamHandle, TranscodeSpec};
use crate::url::{resolve_url, EntityType};
use pmoconfig::Config;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Programme de décodage utilisé par défaut
const DEFAULT_DECODER: &str = "ffmpeg";

/// Résultat de la résolution d'une URL
#[derive(Debug, Clone)]
pub enum Resolution {
    Track {
        track: Track,
        stream: StreamFactory,
    },
    Album {
        album: Album,
        tracks: Vec<Track>,
    },
    Artist {
        details: ArtistDetails,
    },
    Playlist {
        playlist: Playlist,
        tracks: Vec<Track>,
    },
}

impl Resolution {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Resolution::Track { .. } => EntityType::Track,
            Resolution::Album { .. } => EntityType::Album,
            Resolution::Artist { .. } => EntityType::Artist,
            Resolution::Playlist { .. } => EntityType::Playlist,
        }
    }

    /// Fabrique de flux, présente uniquement pour une piste
    pub fn stream_factory(&self) -> Option<&StreamFactory> {
        match self {
            Resolution::Track { stream, .. } => Some(stream),
            _ => None,
        }
    }

    /// Pistes enfants (titres populaires pour un artiste)
    pub fn children(&self) -> &[Track] {
        match self {
            Resolution::Track { .. } => &[],
            Resolution::Album { tracks, .. } | Resolution::Playlist { tracks, .. } => tracks,
            Resolution::Artist { details } => &details.top_tracks,
        }
    }
}

/// Ouvre le flux audio d'une piste
///
/// Rien n'est téléchargé tant que [`StreamFactory::open`] n'est pas appelé.
#[derive(Clone)]
pub struct StreamFactory {
    api: Arc<TidalApi>,
    assembler: StreamAssembler,
    track_id: String,
    renditions: Vec<Rendition>,
    decoder: String,
    remux_segments: bool,
    default_quality: AudioQuality,
}

impl std::fmt::Debug for StreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFactory")
            .field("track_id", &self.track_id)
            .field("renditions", &self.renditions)
            .finish_non_exhaustive()
    }
}

impl StreamFactory {
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Rendus proposés, du meilleur au moins bon
    pub fn renditions(&self) -> &[Rendition] {
        &self.renditions
    }

    /// Ouvre le flux avec la qualité configurée par défaut (repli autorisé)
    pub async fn open_default(&self) -> Result<StreamHandle> {
        self.open(&QualityRequest::preferred(self.default_quality))
            .await
    }

    /// Ouvre le flux pour la qualité demandée
    ///
    /// # Errors
    ///
    /// * `TidalError::NoApplicableFormat` - aucun rendu ne convient, ou une
    ///   demande stricte a été servie dans une autre qualité
    /// * `TidalError::UnsupportedManifest` - manifeste illisible ou chiffré
    /// * `TidalError::SegmentFetchFailed` / `TidalError::TranscodeFailed`
    pub async fn open(&self, request: &QualityRequest) -> Result<StreamHandle> {
        let rendition = quality::select(request, &self.renditions)?;
        info!(
            "Opening track {} in {} ({:?})",
            self.track_id,
            rendition.label(),
            rendition.delivery
        );

        let info = self.api.get_rendition_info(&rendition).await?;

        if info.audio_quality != rendition.quality {
            if request.strict {
                return Err(TidalError::NoApplicableFormat(format!(
                    "{} requested, {} delivered",
                    rendition.quality, info.audio_quality
                )));
            }
            warn!(
                "Track {} delivered in {} instead of {}",
                self.track_id, info.audio_quality, rendition.quality
            );
        }

        match info.delivery()? {
            Delivery::Direct { url, mime_type, .. } => {
                let mime_type = Some(mime_type.as_str()).filter(|m| !m.is_empty());
                self.assembler.open_direct(&url, mime_type).await
            }
            Delivery::Segmented(plan) => {
                let mode = if self.remux_segments {
                    OutputMode::Transcode(TranscodeSpec::for_quality(
                        self.decoder.as_str(),
                        info.audio_quality,
                    ))
                } else {
                    OutputMode::Passthrough
                };
                self.assembler.assemble(plan, mode).await
            }
        }
    }
}

/// Client Tidal haut-niveau avec cache
pub struct TidalClient {
    /// API bas-niveau
    api: Arc<TidalApi>,
    /// Cache en mémoire
    cache: Arc<TidalCache>,
    assembler: StreamAssembler,
    decoder: String,
    remux_segments: bool,
    default_quality: AudioQuality,
}

impl TidalClient {
    /// Crée un client autour d'une API déjà configurée
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use chrono::Utc;
    /// use pmotidal::{Credential, TidalApi, TidalClient};
    ///
    /// # fn main() -> pmotidal::Result<()> {
    /// let credential = Credential::new("access", "refresh", Utc::now());
    /// let api = TidalApi::new("client_id", "client_secret", credential)?;
    /// let client = TidalClient::new(api);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(api: TidalApi) -> Self {
        let assembler = StreamAssembler::new(api.http().clone());
        Self {
            api: Arc::new(api),
            cache: Arc::new(TidalCache::new()),
            assembler,
            decoder: DEFAULT_DECODER.to_string(),
            remux_segments: true,
            default_quality: AudioQuality::default(),
        }
    }

    /// Crée un client en utilisant la configuration de pmoconfig
    pub fn from_config() -> Result<Self> {
        let config = pmoconfig::get_config()?;
        Self::from_config_obj(config)
    }

    /// Crée un client depuis un objet Config spécifique
    ///
    /// Les tokens rafraîchis sont réécrits dans cette configuration.
    pub fn from_config_obj(config: Arc<Config>) -> Result<Self> {
        let client_id = config.get_tidal_client_id()?;
        let client_secret = config.get_tidal_client_secret()?;
        let credential = config.get_tidal_credential()?.ok_or_else(|| {
            TidalError::Configuration(
                "no Tidal access/refresh token in accounts.tidal".to_string(),
            )
        })?;

        let mut api = TidalApi::new(client_id, client_secret, credential)?
            .with_store(Arc::new(ConfigCredentialStore::new(config.clone())));
        if let Some(secret) = config.get_tidal_signing_secret()? {
            api = api.with_signer(RequestSigner::new(secret));
        }

        let assembler = StreamAssembler::new(api.http().clone())
            .with_prefetch(config.get_tidal_segment_prefetch())
            .with_scratch_root(config.get_tidal_scratch_dir()?);

        info!("Tidal client created from configuration");

        Ok(Self::new(api)
            .with_assembler(assembler)
            .with_decoder(config.get_tidal_decoder())
            .with_remux_segments(config.get_tidal_remux_segments())
            .with_default_quality(config.get_tidal_default_quality()))
    }

    pub fn with_assembler(mut self, assembler: StreamAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    /// Programme de décodage des flux segmentés
    pub fn with_decoder(mut self, program: impl Into<String>) -> Self {
        self.decoder = program.into();
        self
    }

    /// `false` renvoie les segments concaténés sans passer par le décodeur
    pub fn with_remux_segments(mut self, remux: bool) -> Self {
        self.remux_segments = remux;
        self
    }

    pub fn with_default_quality(mut self, quality: AudioQuality) -> Self {
        self.default_quality = quality;
        self
    }

    /// API bas-niveau partagée
    pub fn api(&self) -> &TidalApi {
        &self.api
    }

    /// Retourne une référence au cache
    pub fn cache(&self) -> Arc<TidalCache> {
        self.cache.clone()
    }

    /// Type d'entité désigné par une URL, sans appel réseau
    pub fn entity_type(url: &str) -> Result<EntityType> {
        Ok(resolve_url(url)?.entity_type)
    }

    // ============ Résolution ============

    /// Résout une URL Tidal
    ///
    /// Les listes de pistes sont limitées à une page (`DEFAULT_PAGE_SIZE`).
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmotidal::{QualityRequest, Resolution, TidalClient};
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let client = TidalClient::from_config()?;
    ///     if let Resolution::Track { track, stream } =
    ///         client.resolve("https://tidal.com/browse/track/95691774").await?
    ///     {
    ///         println!("{}", track.full_title());
    ///         let handle = stream.open(&QualityRequest::best()).await?;
    ///         println!("{}", handle.mime_type);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn resolve(&self, url: &str) -> Result<Resolution> {
        self.resolve_with_limit(url, DEFAULT_PAGE_SIZE).await
    }

    /// Résout une URL en chargeant jusqu'à `limit` pistes enfants
    pub async fn resolve_with_limit(&self, url: &str, limit: u32) -> Result<Resolution> {
        let entity = resolve_url(url)?;
        info!("Resolving {} {}", entity.entity_type, entity.id);
        let id = entity.id.as_str();

        match entity.entity_type {
            EntityType::Track => {
                let track = self.get_track(id).await?;
                let stream = self.stream_factory(&track);
                Ok(Resolution::Track { track, stream })
            }
            EntityType::Album => {
                let (album, tracks) = tokio::try_join!(
                    self.get_album(id),
                    self.api.fetch_children(EntityType::Album, id, limit),
                )?;
                Ok(Resolution::Album { album, tracks })
            }
            EntityType::Artist => Ok(Resolution::Artist {
                details: self.get_artist(id).await?,
            }),
            EntityType::Playlist => {
                let (playlist, tracks) = tokio::try_join!(
                    self.get_playlist(id),
                    self.api.fetch_children(EntityType::Playlist, id, limit),
                )?;
                Ok(Resolution::Playlist { playlist, tracks })
            }
        }
    }

    /// Fabrique de flux pour une piste, par exemple une piste enfant d'un album
    ///
    /// Une piste non disponible au streaming n'a aucun rendu.
    pub fn stream_factory(&self, track: &Track) -> StreamFactory {
        let renditions = if track.is_available() {
            Rendition::ladder_for(track)
        } else {
            debug!("Track {} is not available for streaming", track.id);
            Vec::new()
        };

        StreamFactory {
            api: self.api.clone(),
            assembler: self.assembler.clone(),
            track_id: track.id.clone(),
            renditions,
            decoder: self.decoder.clone(),
            remux_segments: self.remux_segments,
            default_quality: self.default_quality,
        }
    }

    // ============ Catalogue ============

    /// Récupère une piste enrichie par son ID
    pub async fn get_track(&self, track_id: &str) -> Result<Track> {
        if let Some(track) = self.cache.get_track(track_id).await {
            debug!("Track {} found in cache", track_id);
            return Ok(track);
        }

        let track = self.api.get_track(track_id).await?;
        self.cache
            .put_track(track_id.to_string(), track.clone())
            .await;
        Ok(track)
    }

    /// Récupère un album par son ID
    pub async fn get_album(&self, album_id: &str) -> Result<Album> {
        if let Some(album) = self.cache.get_album(album_id).await {
            debug!("Album {} found in cache", album_id);
            return Ok(album);
        }

        let album = self.api.get_album(album_id).await?;
        self.cache
            .put_album(album_id.to_string(), album.clone())
            .await;
        Ok(album)
    }

    /// Récupère un artiste avec ses albums et ses titres populaires
    pub async fn get_artist(&self, artist_id: &str) -> Result<ArtistDetails> {
        if let Some(details) = self.cache.get_artist(artist_id).await {
            debug!("Artist {} found in cache", artist_id);
            return Ok(details);
        }

        let details = self.api.get_artist_details(artist_id).await?;
        self.cache
            .put_artist(artist_id.to_string(), details.clone())
            .await;
        Ok(details)
    }

    /// Récupère une playlist par son UUID
    pub async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        if let Some(playlist) = self.cache.get_playlist(playlist_id).await {
            debug!("Playlist {} found in cache", playlist_id);
            return Ok(playlist);
        }

        let playlist = self.api.get_playlist(playlist_id).await?;
        self.cache
            .put_playlist(playlist_id.to_string(), playlist.clone())
            .await;
        Ok(playlist)
    }

    /// Recherche une piste par code ISRC
    pub async fn isrc_lookup(&self, isrc: &str) -> Result<Option<Track>> {
        self.api.lookup_isrc(isrc).await
    }

    // ============ Compte ============

    /// Informations sur le compte associé au credential
    pub async fn account_info(&self) -> Result<AccountInfo> {
        let credential = self.api.tokens().ensure_session().await?;
        let user_id = credential.user_id.clone().ok_or_else(|| {
            TidalError::Configuration("session did not report a user id".to_string())
        })?;

        let subscription = self.api.get_subscription(&user_id).await?;
        Ok(AccountInfo {
            user_id,
            country_code: credential.country_code,
            premium: subscription.premium_access,
            highest_quality: subscription.highest_sound_quality,
        })
    }

    /// Credential courant
    pub async fn credential(&self) -> Credential {
        self.api.tokens().credential().await
    }

    /// Installe un credential obtenu à l'extérieur
    ///
    /// Seule opération qui lève le blocage après un échec de rafraîchissement.
    pub async fn replace_credential(&self, credential: Credential) {
        self.api.tokens().replace_credential(credential).await;
    }
}
