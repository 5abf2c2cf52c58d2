//! Résolution des URLs Tidal en entités typées
//!
//! Deux familles d'URLs sont reconnues :
//!
//! - le lecteur web (`listen.tidal.com/album/1/track/2`, `listen.tidal.com/track/2`)
//! - les liens canoniques et de partage (`tidal.com/browse/track/2`,
//!   `tidal.com/track/2/u`, `embed.tidal.com/tracks/2`)
//!
//! Les motifs sont essayés dans l'ordre, du plus spécifique au plus générique,
//! et le premier qui correspond l'emporte. Aucune I/O n'est faite ici.

use crate::error::{Result, TidalError};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hôtes du lecteur web
const WEB_PLAYER_HOSTS: &[&str] = &["listen.tidal.com"];

/// Hôtes des liens canoniques et de partage
const SHARE_HOSTS: &[&str] = &["tidal.com", "www.tidal.com", "embed.tidal.com"];

/// Motifs du lecteur web, du plus spécifique au plus générique
const WEB_PLAYER_PATTERNS: &[&str] = &[
    r"^/album/[0-9]+/(track)/([A-Za-z0-9-]+)/?$",
    r"^/([a-z]+)/([A-Za-z0-9-]+)/?$",
];

/// Motifs des liens canoniques et de partage
const SHARE_PATTERNS: &[&str] = &[
    r"^/(?:browse/)?album/[0-9]+/(track)/([A-Za-z0-9-]+)(?:/u)?/?$",
    r"^/(?:browse/)?([a-z]+)/([A-Za-z0-9-]+)(?:/u)?/?$",
];

/// Type d'entité adressable par une URL Tidal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Artist,
    Album,
    Track,
    Playlist,
}

impl EntityType {
    /// Convertit un segment de chemin en type d'entité
    ///
    /// Les alias (`tracks`, `albums`, `performer`, ...) sont normalisés.
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "track" | "tracks" => Some(EntityType::Track),
            "album" | "albums" => Some(EntityType::Album),
            "artist" | "artists" | "performer" | "performers" => Some(EntityType::Artist),
            "playlist" | "playlists" => Some(EntityType::Playlist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Artist => "artist",
            EntityType::Album => "album",
            EntityType::Track => "track",
            EntityType::Playlist => "playlist",
        }
    }

    /// Seules les pistes produisent un flux audio
    pub fn is_playable(&self) -> bool {
        matches!(self, EntityType::Track)
    }

    /// Vrai pour les entités qui ont des enfants (pistes, albums)
    pub fn is_container(&self) -> bool {
        !self.is_playable()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entité désignée par une URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub entity_type: EntityType,
    pub id: String,
}

impl ResolvedEntity {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

/// Résout une URL Tidal en `(type, id)`
///
/// # Errors
///
/// * `TidalError::UnsupportedUrl` - URL illisible ou hôte non Tidal
/// * `TidalError::UnrecognizedEntity` - hôte Tidal, chemin non reconnu
pub fn resolve_url(url: &str) -> Result<ResolvedEntity> {
    let parsed = Url::parse(url.trim()).map_err(|_| TidalError::UnsupportedUrl(url.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(TidalError::UnsupportedUrl(url.to_string()));
    }

    let host = parsed
        .host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| TidalError::UnsupportedUrl(url.to_string()))?;

    let patterns = if WEB_PLAYER_HOSTS.contains(&host.as_str()) {
        WEB_PLAYER_PATTERNS
    } else if SHARE_HOSTS.contains(&host.as_str()) {
        SHARE_PATTERNS
    } else {
        return Err(TidalError::UnsupportedUrl(url.to_string()));
    };

    // `path()` n'inclut ni la query string ni le fragment
    let path = parsed.path();

    for pattern in patterns {
        let re = Regex::new(pattern)
            .map_err(|e| TidalError::Configuration(format!("invalid URL pattern: {}", e)))?;

        if let Some(caps) = re.captures(path) {
            let entity_type = EntityType::from_path_segment(&caps[1])
                .ok_or_else(|| TidalError::UnrecognizedEntity(url.to_string()))?;
            return Ok(ResolvedEntity::new(entity_type, &caps[2]));
        }
    }

    Err(TidalError::UnrecognizedEntity(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(url: &str, entity_type: EntityType, id: &str) {
        let resolved = resolve_url(url).unwrap_or_else(|e| panic!("{}: {}", url, e));
        assert_eq!(resolved, ResolvedEntity::new(entity_type, id), "{}", url);
    }

    #[test]
    fn test_share_and_canonical_urls() {
        check("https://tidal.com/browse/track/95691774", EntityType::Track, "95691774");
        check("https://tidal.com/browse/album/109485854", EntityType::Album, "109485854");
        check("https://tidal.com/browse/artist/3908662", EntityType::Artist, "3908662");
        check("https://tidal.com/track/95691774/u", EntityType::Track, "95691774");
        check("http://www.tidal.com/album/109485854/", EntityType::Album, "109485854");
        check(
            "https://tidal.com/browse/playlist/0b5e2e3a-1c2d-4e5f-8a9b-0c1d2e3f4a5b",
            EntityType::Playlist,
            "0b5e2e3a-1c2d-4e5f-8a9b-0c1d2e3f4a5b",
        );
        check("https://embed.tidal.com/tracks/95691774", EntityType::Track, "95691774");
    }

    #[test]
    fn test_web_player_urls() {
        check("https://listen.tidal.com/track/95691774", EntityType::Track, "95691774");
        check(
            "https://listen.tidal.com/album/95691773/track/95691774",
            EntityType::Track,
            "95691774",
        );
        check("https://listen.tidal.com/performer/3908662", EntityType::Artist, "3908662");
    }

    #[test]
    fn test_query_is_stripped() {
        check(
            "https://tidal.com/browse/track/95691774?u=1&play=true",
            EntityType::Track,
            "95691774",
        );
        check("https://listen.tidal.com/album/109485854#top", EntityType::Album, "109485854");
    }

    #[test]
    fn test_unsupported_hosts() {
        for url in [
            "https://open.spotify.com/track/123",
            "https://nottidal.com/browse/track/1",
            "ftp://tidal.com/browse/track/1",
            "not a url",
        ] {
            assert!(
                matches!(resolve_url(url), Err(TidalError::UnsupportedUrl(_))),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_unrecognized_entities() {
        for url in [
            "https://tidal.com/browse/video/123",
            "https://tidal.com/",
            "https://tidal.com/browse/track",
            "https://listen.tidal.com/track/1/extra/2",
            "https://tidal.com/browse/track/12%2034",
        ] {
            assert!(
                matches!(resolve_url(url), Err(TidalError::UnrecognizedEntity(_))),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_deterministic() {
        let url = "https://tidal.com/browse/album/109485854";
        assert_eq!(resolve_url(url).unwrap(), resolve_url(url).unwrap());
    }

    #[test]
    fn test_entity_type_helpers() {
        assert_eq!(EntityType::from_path_segment("Performer"), Some(EntityType::Artist));
        assert_eq!(EntityType::from_path_segment("video"), None);
        assert!(EntityType::Track.is_playable());
        assert!(EntityType::Album.is_container());
        assert_eq!(EntityType::Playlist.to_string(), "playlist");
    }
}
