//! Informations de lecture d'une piste

use super::TidalApi;
use crate::error::{Result, TidalError};
use crate::manifest::{decode_manifest, Delivery};
use crate::models::AudioQuality;
use crate::quality::Rendition;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

/// Réponse de `tracks/{id}/playbackinfopostpaywall/v4`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
    #[serde(default, deserialize_with = "crate::models::deserialize_opt_id")]
    pub track_id: Option<String>,
    /// Qualité effectivement livrée
    pub audio_quality: AudioQuality,
    pub manifest_mime_type: String,
    /// Manifeste encodé en base64
    pub manifest: String,
}

impl PlaybackInfo {
    /// Décode le manifeste base64
    pub fn manifest_bytes(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.manifest.trim())
            .map_err(|e| TidalError::UnsupportedManifest(format!("manifest is not base64: {}", e)))
    }

    /// Décode le manifeste en mode de livraison
    pub fn delivery(&self) -> Result<Delivery> {
        decode_manifest(&self.manifest_bytes()?, &self.manifest_mime_type)
    }
}

impl TidalApi {
    /// Interroge l'endpoint `source` d'un rendu pour sa qualité
    pub async fn get_rendition_info(&self, rendition: &Rendition) -> Result<PlaybackInfo> {
        debug!("Fetching playback info from {} ({})", rendition.source, rendition.quality);

        let params = [
            ("playbackmode", "STREAM"),
            ("assetpresentation", "FULL"),
            ("audioquality", rendition.quality.as_str()),
            ("prefetch", "false"),
        ];

        self.get(&rendition.source, &params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_bts_playback_info() {
        let manifest = base64::engine::general_purpose::STANDARD
            .encode(r#"{"mimeType":"audio/flac","codecs":"flac","encryptionType":"NONE","urls":["https://cdn/x.flac"]}"#);
        let info: PlaybackInfo = serde_json::from_value(json!({
            "trackId": 95691774,
            "audioQuality": "LOSSLESS",
            "manifestMimeType": "application/vnd.tidal.bts",
            "manifest": manifest
        }))
        .unwrap();

        assert_eq!(info.track_id.as_deref(), Some("95691774"));
        assert!(matches!(info.delivery().unwrap(), Delivery::Direct { .. }));
    }

    #[test]
    fn test_invalid_base64() {
        let info = PlaybackInfo {
            track_id: None,
            audio_quality: AudioQuality::High,
            manifest_mime_type: "application/dash+xml".into(),
            manifest: "***".into(),
        };
        assert!(matches!(
            info.delivery(),
            Err(TidalError::UnsupportedManifest(_))
        ));
    }
}
