//! Sélection du rendu audio
//!
//! Une piste expose une liste ordonnée de [`Rendition`], de la meilleure à la
//! moins bonne. [`select`] choisit l'une d'elles de façon déterministe :
//!
//! 1. demande stricte : le label exact, sinon `NoApplicableFormat` ;
//! 2. label demandé (non strict) s'il est proposé ;
//! 3. première famille de codec disponible selon l'ordre de préférence ;
//! 4. sinon le premier rendu de la liste.

use crate::error::{Result, TidalError};
use crate::models::{AudioQuality, Track};
use serde::{Deserialize, Serialize};

/// Ordre de préférence des familles de codec chez Tidal
pub const CODEC_PREFERENCE: &[&str] = &["flac", "mqa", "aac"];

/// Mode de livraison d'un rendu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Un seul fichier téléchargeable
    Direct,
    /// Segments décrits par un manifeste
    Segmented,
}

/// Variante de qualité d'une piste
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub quality: AudioQuality,
    /// Type MIME attendu pour ce rendu
    pub mime_type: String,
    pub delivery: DeliveryMode,
    /// Endpoint de l'API qui fournit le manifeste de ce rendu
    pub source: String,
}

impl Rendition {
    pub fn label(&self) -> &'static str {
        self.quality.as_str()
    }

    pub fn codec_family(&self) -> &'static str {
        self.quality.codec_family()
    }

    /// Construit la liste des rendus proposés pour une piste
    ///
    /// La qualité maximale est celle déclarée par la piste, relevée par les
    /// tags `mediaMetadata` ; les paliers Hi-Res ne sont inclus que s'ils
    /// sont annoncés.
    pub fn ladder_for(track: &Track) -> Vec<Rendition> {
        let hires_lossless = track.has_tag("HIRES_LOSSLESS")
            || track.audio_quality == Some(AudioQuality::HiResLossless);
        let hires = track.has_tag("MQA") || track.audio_quality == Some(AudioQuality::HiRes);

        let declared = track.audio_quality.unwrap_or(AudioQuality::Lossless);
        let max = if hires_lossless {
            AudioQuality::HiResLossless
        } else {
            declared
        };

        let source = format!("tracks/{}/playbackinfopostpaywall/v4", track.id);

        AudioQuality::ALL_BEST_FIRST
            .iter()
            .copied()
            .filter(|q| *q <= max)
            .filter(|q| match q {
                AudioQuality::HiResLossless => hires_lossless,
                AudioQuality::HiRes => hires,
                _ => true,
            })
            .map(|quality| Rendition::for_quality(quality, source.clone()))
            .collect()
    }

    /// Rendu attendu pour un palier donné
    pub fn for_quality(quality: AudioQuality, source: impl Into<String>) -> Self {
        let (mime_type, delivery) = match quality {
            AudioQuality::HiResLossless => ("audio/flac", DeliveryMode::Segmented),
            AudioQuality::HiRes | AudioQuality::Lossless => ("audio/flac", DeliveryMode::Direct),
            AudioQuality::High | AudioQuality::Low => ("audio/mp4", DeliveryMode::Direct),
        };
        Self {
            quality,
            mime_type: mime_type.to_string(),
            delivery,
            source: source.into(),
        }
    }
}

/// Qualité demandée par l'appelant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityRequest {
    /// Label souhaité ; `None` laisse la chaîne de repli choisir
    pub label: Option<AudioQuality>,
    /// Refuse tout repli si le label n'est pas proposé
    pub strict: bool,
}

impl QualityRequest {
    /// Meilleur rendu disponible
    pub fn best() -> Self {
        Self::default()
    }

    /// Label préféré, repli autorisé
    pub fn preferred(quality: AudioQuality) -> Self {
        Self {
            label: Some(quality),
            strict: false,
        }
    }

    /// Label exigé, aucun repli
    pub fn exactly(quality: AudioQuality) -> Self {
        Self {
            label: Some(quality),
            strict: true,
        }
    }
}

/// Choisit un rendu parmi `available`
///
/// La fonction est pure : mêmes entrées, même rendu.
///
/// # Errors
///
/// * `TidalError::NoApplicableFormat` - liste vide, ou label strict absent
pub fn select(request: &QualityRequest, available: &[Rendition]) -> Result<Rendition> {
    select_with_preference(request, available, CODEC_PREFERENCE)
}

/// Variante de [`select`] avec un ordre de familles de codec explicite
pub fn select_with_preference(
    request: &QualityRequest,
    available: &[Rendition],
    codec_preference: &[&str],
) -> Result<Rendition> {
    if available.is_empty() {
        return Err(TidalError::NoApplicableFormat(
            "no rendition advertised".to_string(),
        ));
    }

    if let Some(label) = request.label {
        if let Some(found) = available.iter().find(|r| r.quality == label) {
            return Ok(found.clone());
        }
        if request.strict {
            let advertised: Vec<&str> = available.iter().map(Rendition::label).collect();
            return Err(TidalError::NoApplicableFormat(format!(
                "{} requested, available: {}",
                label,
                advertised.join(", ")
            )));
        }
    }

    for family in codec_preference {
        if let Some(found) = available.iter().find(|r| r.codec_family() == *family) {
            return Ok(found.clone());
        }
    }

    Ok(available[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track(quality: &str, tags: &[&str]) -> Track {
        serde_json::from_value(json!({
            "id": 42,
            "title": "T",
            "audioQuality": quality,
            "mediaMetadata": {"tags": tags}
        }))
        .unwrap()
    }

    fn labels(renditions: &[Rendition]) -> Vec<&'static str> {
        renditions.iter().map(Rendition::label).collect()
    }

    #[test]
    fn test_ladder_lossless_track() {
        let ladder = Rendition::ladder_for(&track("LOSSLESS", &["LOSSLESS"]));
        assert_eq!(labels(&ladder), vec!["LOSSLESS", "HIGH", "LOW"]);
        assert_eq!(ladder[0].source, "tracks/42/playbackinfopostpaywall/v4");
    }

    #[test]
    fn test_ladder_hires_track() {
        let ladder = Rendition::ladder_for(&track("LOSSLESS", &["LOSSLESS", "HIRES_LOSSLESS"]));
        assert_eq!(
            labels(&ladder),
            vec!["HI_RES_LOSSLESS", "LOSSLESS", "HIGH", "LOW"]
        );
        assert_eq!(ladder[0].delivery, DeliveryMode::Segmented);
    }

    #[test]
    fn test_ladder_lossy_track() {
        let ladder = Rendition::ladder_for(&track("HIGH", &[]));
        assert_eq!(labels(&ladder), vec!["HIGH", "LOW"]);
    }

    #[test]
    fn test_strict_request_never_downgrades() {
        let ladder = Rendition::ladder_for(&track("LOSSLESS", &[]));
        let result = select(&QualityRequest::exactly(AudioQuality::HiResLossless), &ladder);
        assert!(matches!(result, Err(TidalError::NoApplicableFormat(_))));
    }

    #[test]
    fn test_strict_request_exact_match() {
        let ladder = Rendition::ladder_for(&track("LOSSLESS", &[]));
        let chosen = select(&QualityRequest::exactly(AudioQuality::High), &ladder).unwrap();
        assert_eq!(chosen.quality, AudioQuality::High);
    }

    #[test]
    fn test_preferred_falls_back_to_codec_preference() {
        let ladder = Rendition::ladder_for(&track("HIGH", &[]));
        let chosen = select(&QualityRequest::preferred(AudioQuality::Lossless), &ladder).unwrap();
        assert_eq!(chosen.quality, AudioQuality::High);

        let ladder = Rendition::ladder_for(&track("LOSSLESS", &[]));
        let chosen = select(&QualityRequest::best(), &ladder).unwrap();
        assert_eq!(chosen.quality, AudioQuality::Lossless);
    }

    #[test]
    fn test_codec_preference_order() {
        let available = vec![
            Rendition::for_quality(AudioQuality::High, "s"),
            Rendition::for_quality(AudioQuality::Lossless, "s"),
        ];
        let chosen = select_with_preference(&QualityRequest::best(), &available, &["aac", "flac"]).unwrap();
        assert_eq!(chosen.quality, AudioQuality::High);

        let chosen = select_with_preference(&QualityRequest::best(), &available, &["opus"]).unwrap();
        assert_eq!(chosen.quality, AudioQuality::High);
    }

    #[test]
    fn test_select_is_stable() {
        let ladder = Rendition::ladder_for(&track("LOSSLESS", &["HIRES_LOSSLESS"]));
        let request = QualityRequest::preferred(AudioQuality::HiRes);
        assert_eq!(select(&request, &ladder).unwrap(), select(&request, &ladder).unwrap());
    }

    #[test]
    fn test_empty_list() {
        assert!(matches!(
            select(&QualityRequest::best(), &[]),
            Err(TidalError::NoApplicableFormat(_))
        ));
    }
}
