//! Cache en mémoire des données du catalogue Tidal
//!
//! Les enregistrements du catalogue changent rarement : ils sont gardés en
//! mémoire avec une durée de vie pour éviter de répéter les appels (et les
//! enrichissements) à chaque résolution.

use crate::models::{Album, ArtistDetails, Playlist, Track};
use moka::future::Cache as MokaCache;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);
const HALF_HOUR: Duration = Duration::from_secs(1800);

/// Cache principal pour les données Tidal
///
/// ```
/// use pmotidal::{Album, TidalCache};
///
/// # tokio_test::block_on(async {
/// let cache = TidalCache::new();
/// let album: Album = serde_json::from_str(r#"{"id": 42, "title": "Kind of Blue"}"#).unwrap();
/// cache.put_album("42".to_string(), album).await;
///
/// assert_eq!(cache.get_album("42").await.unwrap().title, "Kind of Blue");
/// # });
/// ```
#[derive(Clone)]
pub struct TidalCache {
    /// Pistes enrichies (TTL: 1 heure)
    tracks: Arc<MokaCache<String, Track>>,
    /// Albums (TTL: 1 heure)
    albums: Arc<MokaCache<String, Album>>,
    /// Artistes avec albums et top tracks (TTL: 1 heure)
    artists: Arc<MokaCache<String, ArtistDetails>>,
    /// Playlists (TTL: 30 minutes)
    playlists: Arc<MokaCache<String, Playlist>>,
}

impl TidalCache {
    /// Crée un nouveau cache avec les paramètres par défaut
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Crée un nouveau cache avec une capacité spécifique
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            tracks: Arc::new(
                MokaCache::builder()
                    .max_capacity(max_capacity * 2)
                    .time_to_live(HOUR)
                    .build(),
            ),
            albums: Arc::new(
                MokaCache::builder()
                    .max_capacity(max_capacity)
                    .time_to_live(HOUR)
                    .build(),
            ),
            artists: Arc::new(
                MokaCache::builder()
                    .max_capacity(max_capacity / 2)
                    .time_to_live(HOUR)
                    .build(),
            ),
            playlists: Arc::new(
                MokaCache::builder()
                    .max_capacity(max_capacity / 4)
                    .time_to_live(HALF_HOUR)
                    .build(),
            ),
        }
    }

    // ============ Tracks ============

    pub async fn get_track(&self, id: &str) -> Option<Track> {
        self.tracks.get(id).await
    }

    pub async fn put_track(&self, id: String, track: Track) {
        self.tracks.insert(id, track).await;
    }

    pub async fn invalidate_track(&self, id: &str) {
        self.tracks.invalidate(id).await;
    }

    // ============ Albums ============

    pub async fn get_album(&self, id: &str) -> Option<Album> {
        self.albums.get(id).await
    }

    pub async fn put_album(&self, id: String, album: Album) {
        self.albums.insert(id, album).await;
    }

    pub async fn invalidate_album(&self, id: &str) {
        self.albums.invalidate(id).await;
    }

    // ============ Artists ============

    pub async fn get_artist(&self, id: &str) -> Option<ArtistDetails> {
        self.artists.get(id).await
    }

    pub async fn put_artist(&self, id: String, details: ArtistDetails) {
        self.artists.insert(id, details).await;
    }

    pub async fn invalidate_artist(&self, id: &str) {
        self.artists.invalidate(id).await;
    }

    // ============ Playlists ============

    pub async fn get_playlist(&self, id: &str) -> Option<Playlist> {
        self.playlists.get(id).await
    }

    pub async fn put_playlist(&self, id: String, playlist: Playlist) {
        self.playlists.insert(id, playlist).await;
    }

    pub async fn invalidate_playlist(&self, id: &str) {
        self.playlists.invalidate(id).await;
    }

    // ============ Maintenance ============

    /// Vide tous les caches
    pub fn clear_all(&self) {
        self.tracks.invalidate_all();
        self.albums.invalidate_all();
        self.artists.invalidate_all();
        self.playlists.invalidate_all();
    }

    /// Retourne des statistiques sur le cache
    pub async fn stats(&self) -> CacheStats {
        self.tracks.run_pending_tasks().await;
        self.albums.run_pending_tasks().await;
        self.artists.run_pending_tasks().await;
        self.playlists.run_pending_tasks().await;

        CacheStats {
            tracks_count: self.tracks.entry_count(),
            albums_count: self.albums.entry_count(),
            artists_count: self.artists.entry_count(),
            playlists_count: self.playlists.entry_count(),
        }
    }
}

impl Default for TidalCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistiques du cache
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub tracks_count: u64,
    pub albums_count: u64,
    pub artists_count: u64,
    pub playlists_count: u64,
}

impl CacheStats {
    /// Nombre total d'entrées en cache
    pub fn total_count(&self) -> u64 {
        self.tracks_count + self.albums_count + self.artists_count + self.playlists_count
    }
}
