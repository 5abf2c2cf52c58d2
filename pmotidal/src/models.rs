//! Structures de données pour représenter les objets Tidal
//!
//! Ce sont les enregistrements natifs du fournisseur, tels que renvoyés par
//! l'API v1 (clés en camelCase). La conversion vers un modèle de métadonnées
//! partagé relève des crates appelantes.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Désérialiseur flexible pour les IDs qui peuvent être des strings ou des integers
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::custom("ID must be a string or number")),
    }
}

/// Base des URLs d'images Tidal
const RESOURCES_BASE_URL: &str = "https://resources.tidal.com/images";

/// Construit l'URL d'une image à partir de son identifiant (`xxxx-xxxx-...`)
fn image_url(image_id: &str, size: u32) -> String {
    format!(
        "{}/{}/{}x{}.jpg",
        RESOURCES_BASE_URL,
        image_id.replace('-', "/"),
        size,
        size
    )
}

/// Niveaux de qualité audio Tidal, du moins bon au meilleur
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioQuality {
    /// AAC 96 kbps
    Low,
    /// AAC 320 kbps
    High,
    /// FLAC 16 bit / 44.1 kHz
    Lossless,
    /// MQA (ancien palier Hi-Res)
    HiRes,
    /// FLAC 24 bit jusqu'à 192 kHz
    HiResLossless,
}

impl AudioQuality {
    /// Tous les niveaux, du meilleur au moins bon
    pub const ALL_BEST_FIRST: [AudioQuality; 5] = [
        AudioQuality::HiResLossless,
        AudioQuality::HiRes,
        AudioQuality::Lossless,
        AudioQuality::High,
        AudioQuality::Low,
    ];

    /// Label utilisé par l'API (`audioquality=...`)
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioQuality::Low => "LOW",
            AudioQuality::High => "HIGH",
            AudioQuality::Lossless => "LOSSLESS",
            AudioQuality::HiRes => "HI_RES",
            AudioQuality::HiResLossless => "HI_RES_LOSSLESS",
        }
    }

    /// Famille de codec livrée pour ce niveau
    pub fn codec_family(&self) -> &'static str {
        match self {
            AudioQuality::Low | AudioQuality::High => "aac",
            AudioQuality::HiRes => "mqa",
            AudioQuality::Lossless | AudioQuality::HiResLossless => "flac",
        }
    }

    /// Vrai pour les niveaux sans perte
    pub fn is_lossless(&self) -> bool {
        !matches!(self, AudioQuality::Low | AudioQuality::High)
    }

    /// Retourne une description lisible du niveau
    pub fn description(&self) -> &'static str {
        match self {
            AudioQuality::Low => "AAC 96 kbps",
            AudioQuality::High => "AAC 320 kbps",
            AudioQuality::Lossless => "FLAC 16 bit / 44.1 kHz",
            AudioQuality::HiRes => "MQA 24 bit",
            AudioQuality::HiResLossless => "FLAC 24 bit / up to 192 kHz",
        }
    }
}

impl Default for AudioQuality {
    fn default() -> Self {
        AudioQuality::HiResLossless
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(AudioQuality::Low),
            "HIGH" => Ok(AudioQuality::High),
            "LOSSLESS" => Ok(AudioQuality::Lossless),
            "HI_RES" => Ok(AudioQuality::HiRes),
            "HI_RES_LOSSLESS" => Ok(AudioQuality::HiResLossless),
            other => Err(format!("unknown audio quality: {}", other)),
        }
    }
}

/// Référence vers un artiste, telle qu'embarquée dans une piste ou un album
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtistRef {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    /// `MAIN`, `FEATURED`, ...
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Référence vers un album, telle qu'embarquée dans une piste
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlbumRef {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
}

/// Métadonnées média (modes de qualité disponibles)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Crédit d'une piste : un nom et un rôle (`Producer`, `Composer`, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contributor {
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// Groupe de crédits renvoyé par `albums/{id}/items/credits`
#[derive(Debug, Clone, Deserialize)]
pub struct CreditGroup {
    #[serde(rename = "type")]
    pub role: String,
    #[serde(default)]
    pub contributors: Vec<CreditName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreditName {
    pub name: String,
}

impl CreditGroup {
    /// Aplatit le groupe en une liste de contributeurs
    pub fn into_contributors(self) -> impl Iterator<Item = Contributor> {
        let role = self.role;
        self.contributors.into_iter().map(move |c| Contributor {
            name: c.name,
            role: role.clone(),
        })
    }
}

/// Représente une piste Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Identifiant unique de la piste
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Titre de la piste
    pub title: String,
    /// Version (ex: "Remastered")
    #[serde(default)]
    pub version: Option<String>,
    /// Durée en secondes
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub volume_number: Option<u32>,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub stream_start_date: Option<String>,
    #[serde(default)]
    pub allow_streaming: Option<bool>,
    /// Artiste principal
    #[serde(default)]
    pub artist: Option<ArtistRef>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    /// Meilleure qualité déclarée pour la piste
    #[serde(default, deserialize_with = "deserialize_opt_quality")]
    pub audio_quality: Option<AudioQuality>,
    #[serde(default)]
    pub media_metadata: Option<MediaMetadata>,
    #[serde(default)]
    pub replay_gain: Option<f64>,
    #[serde(default)]
    pub peak: Option<f64>,
    /// URL canonique de la piste
    #[serde(default)]
    pub url: Option<String>,
    /// Crédits de la piste (enrichissement)
    #[serde(default)]
    pub contributors: Vec<Contributor>,
    /// Album complet (enrichissement)
    #[serde(skip)]
    pub album_details: Option<Box<Album>>,
}

impl Track {
    /// Titre complet, version incluse
    pub fn full_title(&self) -> String {
        match self.version.as_deref() {
            Some(version) if !version.is_empty() => format!("{} ({})", self.title, version),
            _ => self.title.clone(),
        }
    }

    /// Retourne l'artiste à afficher
    pub fn display_artist(&self) -> Option<&ArtistRef> {
        self.artist.as_ref().or_else(|| self.artists.first())
    }

    /// Retourne le nom de l'album si disponible
    pub fn album_name(&self) -> Option<&str> {
        self.album_details
            .as_ref()
            .map(|a| a.title.as_str())
            .or_else(|| self.album.as_ref().and_then(|a| a.title.as_deref()))
    }

    /// Vérifie si la piste est disponible pour le streaming
    pub fn is_available(&self) -> bool {
        self.allow_streaming.unwrap_or(true)
    }

    /// Vérifie si un mode de qualité est annoncé dans `mediaMetadata.tags`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.media_metadata
            .as_ref()
            .map(|m| m.tags.iter().any(|t| t == tag))
            .unwrap_or(false)
    }

    /// Ajoute les crédits à la piste
    ///
    /// Les crédits déjà présents ne sont jamais remplacés.
    pub fn merge_contributors(&mut self, contributors: Vec<Contributor>) {
        if self.contributors.is_empty() {
            self.contributors = contributors;
        }
    }

    /// Ajoute l'album complet à la piste
    ///
    /// Les champs de `album` absents de la référence embarquée sont complétés,
    /// les champs présents sont conservés.
    pub fn merge_album(&mut self, album: Album) {
        match self.album.as_mut() {
            Some(album_ref) => {
                if album_ref.title.is_none() {
                    album_ref.title = Some(album.title.clone());
                }
                if album_ref.cover.is_none() {
                    album_ref.cover = album.cover.clone();
                }
            }
            None => {
                self.album = Some(AlbumRef {
                    id: album.id.clone(),
                    title: Some(album.title.clone()),
                    cover: album.cover.clone(),
                });
            }
        }
        if self.copyright.is_none() {
            self.copyright = album.copyright.clone();
        }
        if self.album_details.is_none() {
            self.album_details = Some(Box::new(album));
        }
    }
}

/// Représente un album Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Durée totale en secondes
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub number_of_tracks: Option<u32>,
    #[serde(default)]
    pub number_of_volumes: Option<u32>,
    /// Date de sortie (`YYYY-MM-DD`)
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    /// Identifiant de l'image de couverture
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub explicit: bool,
    /// `ALBUM`, `EP`, `SINGLE`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub artist: Option<ArtistRef>,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default, deserialize_with = "deserialize_opt_quality")]
    pub audio_quality: Option<AudioQuality>,
    #[serde(default)]
    pub media_metadata: Option<MediaMetadata>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Album {
    /// URL de la couverture à la taille demandée (80, 160, 320, 640, 1280)
    pub fn cover_url(&self, size: u32) -> Option<String> {
        self.cover.as_deref().map(|id| image_url(id, size))
    }

    /// Année de sortie, si la date est lisible
    pub fn release_year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.release_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(|d| d.year())
    }
}

/// Représente un artiste Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    /// Identifiant de l'image de l'artiste
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub popularity: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
}

impl Artist {
    pub fn picture_url(&self, size: u32) -> Option<String> {
        self.picture.as_deref().map(|id| image_url(id, size))
    }
}

/// Artiste avec sa discographie et ses titres populaires
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArtistDetails {
    pub artist: Artist,
    pub albums: Vec<Album>,
    pub top_tracks: Vec<Track>,
}

/// Créateur d'une playlist
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Creator {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Représente une playlist Tidal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    /// Identifiant (UUID) de la playlist
    pub uuid: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub number_of_tracks: Option<u32>,
    /// Durée totale en secondes
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub creator: Option<Creator>,
    #[serde(default)]
    pub square_image: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub public_playlist: bool,
    #[serde(default)]
    pub url: Option<String>,
}

impl Playlist {
    pub fn image_url(&self, size: u32) -> Option<String> {
        self.square_image.as_deref().map(|id| image_url(id, size))
    }
}

/// Page de résultats (`limit`, `offset`, `totalNumberOfItems`, `items`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub total_number_of_items: Option<u32>,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Élément de `albums/{id}/items/credits`
#[derive(Debug, Clone, Deserialize)]
pub struct CreditedItem {
    pub item: Track,
    #[serde(default)]
    pub credits: Vec<CreditGroup>,
}

impl CreditedItem {
    /// Retourne la piste enrichie de ses crédits
    pub fn into_track(self) -> Track {
        let mut track = self.item;
        let contributors: Vec<Contributor> = self
            .credits
            .into_iter()
            .flat_map(CreditGroup::into_contributors)
            .collect();
        track.merge_contributors(contributors);
        track
    }
}

/// Réponse de `sessions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub user_id: Option<String>,
}

/// Réponse de `users/{id}/subscription`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub premium_access: bool,
    #[serde(default, deserialize_with = "deserialize_opt_quality")]
    pub highest_sound_quality: Option<AudioQuality>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub valid_until: Option<String>,
}

/// Informations de compte
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountInfo {
    pub user_id: String,
    pub country_code: Option<String>,
    pub premium: bool,
    pub highest_quality: Option<AudioQuality>,
}

/// Désérialise un ID optionnel, string ou integer
pub(crate) fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Désérialise une qualité optionnelle ; les labels inconnus donnent `None`
fn deserialize_opt_quality<'de, D>(deserializer: D) -> Result<Option<AudioQuality>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|label| label.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_track_deserialization() {
        let track: Track = serde_json::from_value(json!({
            "id": 95691774,
            "title": "Potato Salad",
            "duration": 187,
            "trackNumber": 1,
            "audioQuality": "LOSSLESS",
            "mediaMetadata": {"tags": ["LOSSLESS"]},
            "artist": {"id": 3908662, "name": "Tyler, The Creator", "type": "MAIN"},
            "album": {"id": 95691773, "title": "Potato Salad", "cover": "ab-cd"}
        }))
        .unwrap();

        assert_eq!(track.id, "95691774");
        assert_eq!(track.audio_quality, Some(AudioQuality::Lossless));
        assert!(track.has_tag("LOSSLESS"));
        assert_eq!(track.display_artist().unwrap().name, "Tyler, The Creator");
        assert!(track.is_available());
    }

    #[test]
    fn test_merge_never_overwrites() {
        let mut track: Track = serde_json::from_value(json!({
            "id": "1",
            "title": "T",
            "copyright": "(c) track",
            "album": {"id": 2, "title": "Embedded"}
        }))
        .unwrap();
        let album: Album = serde_json::from_value(json!({
            "id": 2,
            "title": "Full",
            "cover": "aa-bb",
            "copyright": "(c) album"
        }))
        .unwrap();

        track.merge_contributors(vec![Contributor {
            name: "A".into(),
            role: "Producer".into(),
        }]);
        track.merge_contributors(vec![]);
        track.merge_album(album);

        assert_eq!(track.contributors.len(), 1);
        assert_eq!(track.copyright.as_deref(), Some("(c) track"));
        let album_ref = track.album.as_ref().unwrap();
        assert_eq!(album_ref.title.as_deref(), Some("Embedded"));
        assert_eq!(album_ref.cover.as_deref(), Some("aa-bb"));
        assert_eq!(track.album_details.as_ref().unwrap().title, "Full");
    }

    #[test]
    fn test_credited_item() {
        let item: CreditedItem = serde_json::from_value(json!({
            "item": {"id": 1, "title": "T"},
            "credits": [
                {"type": "Producer", "contributors": [{"name": "P1", "id": 10}, {"name": "P2"}]},
                {"type": "Composer", "contributors": [{"name": "C1"}]}
            ]
        }))
        .unwrap();

        let track = item.into_track();
        assert_eq!(track.contributors.len(), 3);
        assert_eq!(track.contributors[2].role, "Composer");
    }

    #[test]
    fn test_audio_quality() {
        assert_eq!("hi_res_lossless".parse::<AudioQuality>(), Ok(AudioQuality::HiResLossless));
        assert!("ULTRA".parse::<AudioQuality>().is_err());
        assert!(AudioQuality::HiResLossless > AudioQuality::Lossless);
        assert_eq!(AudioQuality::High.codec_family(), "aac");
        assert!(!AudioQuality::High.is_lossless());
    }

    #[test]
    fn test_image_urls() {
        let album: Album =
            serde_json::from_value(json!({"id": 1, "title": "A", "cover": "ab-cd-ef", "releaseDate": "2019-05-17"}))
                .unwrap();
        assert_eq!(
            album.cover_url(640).unwrap(),
            "https://resources.tidal.com/images/ab/cd/ef/640x640.jpg"
        );
        assert_eq!(album.release_year(), Some(2019));
    }
}
