//! Décodage des manifestes de lecture
//!
//! Tidal renvoie deux dialectes de manifeste :
//!
//! - `application/dash+xml` : MPD MPEG-DASH décrivant des segments, décodé
//!   en [`SegmentPlan`] ;
//! - `application/vnd.tidal.bts` : document JSON contenant une URL directe.
//!
//! Le plan conserve exactement l'ordre déclaré par le manifeste. Le segment
//! d'initialisation, s'il existe, porte l'index 0.

use crate::error::{Result, TidalError};
use reqwest::Url;
use serde::Deserialize;

/// Type MIME des manifestes MPEG-DASH
pub const DASH_MIME_TYPE: &str = "application/dash+xml";

/// Type MIME des manifestes directs Tidal
pub const BTS_MIME_TYPE: &str = "application/vnd.tidal.bts";

/// Conteneur supposé quand le manifeste ne le déclare pas
const DEFAULT_CONTAINER: &str = "audio/mp4";

/// Nombre maximal de segments média acceptés dans un plan
pub const MAX_SEGMENTS: u64 = 20_000;

/// Un segment à télécharger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position dans le flux, à partir de 0
    pub index: usize,
    pub url: String,
}

/// Liste ordonnée des segments d'un rendu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    pub segments: Vec<Segment>,
    /// Type MIME du conteneur des segments
    pub mime_type: String,
    pub codecs: Option<String>,
}

impl SegmentPlan {
    /// Construit un plan à partir d'URLs déjà ordonnées
    pub fn from_urls<I, S>(urls: I, mime_type: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: urls
                .into_iter()
                .enumerate()
                .map(|(index, url)| Segment {
                    index,
                    url: url.into(),
                })
                .collect(),
            mime_type: mime_type.into(),
            codecs: None,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Manifeste direct (`application/vnd.tidal.bts`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtsManifest {
    pub mime_type: String,
    #[serde(default)]
    pub codecs: Option<String>,
    #[serde(default)]
    pub encryption_type: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl BtsManifest {
    pub fn is_encrypted(&self) -> bool {
        self.encryption_type
            .as_deref()
            .map(|t| !t.eq_ignore_ascii_case("NONE"))
            .unwrap_or(false)
    }
}

/// Mode de livraison décidé par le manifeste
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Fichier unique
    Direct {
        url: String,
        mime_type: String,
        codecs: Option<String>,
    },
    /// Segments à concaténer
    Segmented(SegmentPlan),
}

/// Décode un manifeste selon son type MIME déclaré
///
/// # Errors
///
/// * `TidalError::UnsupportedManifest` - dialecte inconnu, document illisible,
///   flux chiffré ou sans URL
pub fn decode_manifest(bytes: &[u8], declared_mime: &str) -> Result<Delivery> {
    match mime_essence(declared_mime).as_str() {
        DASH_MIME_TYPE => Ok(Delivery::Segmented(parse_mpd(bytes, declared_mime)?)),
        BTS_MIME_TYPE => {
            let manifest: BtsManifest = serde_json::from_slice(bytes)
                .map_err(|e| TidalError::UnsupportedManifest(format!("invalid BTS manifest: {}", e)))?;

            if manifest.is_encrypted() {
                return Err(TidalError::UnsupportedManifest(format!(
                    "encrypted stream ({})",
                    manifest.encryption_type.unwrap_or_default()
                )));
            }

            let url = manifest
                .urls
                .into_iter()
                .next()
                .ok_or_else(|| TidalError::UnsupportedManifest("BTS manifest has no URL".into()))?;

            Ok(Delivery::Direct {
                url,
                mime_type: manifest.mime_type,
                codecs: manifest.codecs,
            })
        }
        other => Err(TidalError::UnsupportedManifest(format!(
            "unknown manifest type: {}",
            other
        ))),
    }
}

/// Décode un MPD MPEG-DASH en plan de segments
///
/// Seule la première représentation audio de la première période est
/// retenue. Sont supportés : `SegmentTemplate` avec `SegmentTimeline` ou
/// `@duration`, et `SegmentList`.
pub fn parse_mpd(bytes: &[u8], declared_mime: &str) -> Result<SegmentPlan> {
    if mime_essence(declared_mime) != DASH_MIME_TYPE {
        return Err(TidalError::UnsupportedManifest(format!(
            "not a DASH manifest: {}",
            declared_mime
        )));
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|e| TidalError::UnsupportedManifest(format!("manifest is not UTF-8: {}", e)))?;
    let mpd: Mpd = quick_xml::de::from_str(text)
        .map_err(|e| TidalError::UnsupportedManifest(format!("invalid MPD: {}", e)))?;

    let period = mpd
        .periods
        .first()
        .ok_or_else(|| TidalError::UnsupportedManifest("MPD has no Period".into()))?;

    let adaptation = period
        .adaptation_sets
        .iter()
        .find(|a| a.is_audio() && !a.representations.is_empty())
        .ok_or_else(|| TidalError::UnsupportedManifest("MPD has no audio representation".into()))?;
    let representation = &adaptation.representations[0];

    let mut base: Option<Url> = None;
    for level in [
        &mpd.base_url,
        &period.base_url,
        &adaptation.base_url,
        &representation.base_url,
    ] {
        if let Some(href) = level {
            base = Some(resolve(base.as_ref(), href.trim())?);
        }
    }

    let rep = RepresentationContext {
        id: representation.id.as_deref().unwrap_or_default(),
        bandwidth: representation.bandwidth.unwrap_or_default(),
    };

    let relative_urls = if let Some(list) = &representation.segment_list {
        segment_list_urls(list)
    } else if let Some(template) = representation
        .segment_template
        .as_ref()
        .or(adaptation.segment_template.as_ref())
    {
        let total = period
            .duration
            .as_deref()
            .or(mpd.media_presentation_duration.as_deref());
        template_urls(template, &rep, total)?
    } else if let Some(href) = &representation.base_url {
        // Représentation mono-segment : la BaseURL est le média
        vec![href.trim().to_string()]
    } else {
        return Err(TidalError::UnsupportedManifest(
            "representation has no segment information".into(),
        ));
    };

    if relative_urls.is_empty() {
        return Err(TidalError::UnsupportedManifest("MPD declares no segment".into()));
    }

    let urls = relative_urls
        .iter()
        .map(|u| resolve(base.as_ref(), u).map(String::from))
        .collect::<Result<Vec<_>>>()?;

    let mime_type = representation
        .mime_type
        .clone()
        .or_else(|| adaptation.mime_type.clone())
        .unwrap_or_else(|| DEFAULT_CONTAINER.to_string());

    let mut plan = SegmentPlan::from_urls(urls, mime_type);
    plan.codecs = representation
        .codecs
        .clone()
        .or_else(|| adaptation.codecs.clone());
    Ok(plan)
}

fn mime_essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn resolve(base: Option<&Url>, href: &str) -> Result<Url> {
    let resolved = match base {
        Some(base) => base.join(href),
        None => Url::parse(href),
    };
    resolved.map_err(|e| TidalError::UnsupportedManifest(format!("bad segment URL {}: {}", href, e)))
}

struct RepresentationContext<'a> {
    id: &'a str,
    bandwidth: u64,
}

fn segment_list_urls(list: &SegmentList) -> Vec<String> {
    list.initialization
        .iter()
        .filter_map(|init| init.source_url.clone())
        .chain(list.segment_urls.iter().filter_map(|s| s.media.clone()))
        .collect()
}

fn template_urls(
    template: &SegmentTemplate,
    rep: &RepresentationContext<'_>,
    total_duration: Option<&str>,
) -> Result<Vec<String>> {
    let media = template
        .media
        .as_deref()
        .ok_or_else(|| TidalError::UnsupportedManifest("SegmentTemplate without @media".into()))?;
    let start_number = template.start_number.unwrap_or(1);

    // (numéro, temps de début) de chaque segment média
    let mut numbered: Vec<(u64, u64)> = Vec::new();

    if let Some(timeline) = &template.segment_timeline {
        let mut time = 0u64;
        let mut number = start_number;
        for entry in &timeline.entries {
            if let Some(t) = entry.t {
                time = t;
            }
            let repeat = entry.r.unwrap_or(0);
            if repeat < 0 {
                return Err(TidalError::UnsupportedManifest(
                    "open-ended SegmentTimeline repeat".into(),
                ));
            }
            check_segment_count(numbered.len() as u64 + repeat as u64 + 1)?;
            for _ in 0..=repeat {
                numbered.push((number, time));
                number = number.saturating_add(1);
                time = time.saturating_add(entry.d);
            }
        }
    } else if let Some(duration) = template.duration.filter(|d| *d > 0) {
        let timescale = template.timescale.unwrap_or(1).max(1) as f64;
        let total = total_duration
            .and_then(parse_iso_duration)
            .ok_or_else(|| {
                TidalError::UnsupportedManifest("SegmentTemplate@duration without total duration".into())
            })?;
        let count = (total * timescale / duration as f64).ceil();
        if !count.is_finite() {
            return Err(TidalError::UnsupportedManifest(format!(
                "invalid segment count for duration {}",
                duration
            )));
        }
        let count = count as u64;
        check_segment_count(count)?;
        numbered.extend((0..count).map(|k| (start_number.saturating_add(k), k.saturating_mul(duration))));
    } else {
        return Err(TidalError::UnsupportedManifest(
            "SegmentTemplate without timeline or duration".into(),
        ));
    }

    let mut urls = Vec::with_capacity(numbered.len() + 1);
    if let Some(init) = template.initialization.as_deref() {
        urls.push(expand_template(init, rep, start_number, 0)?);
    }
    for (number, time) in numbered {
        urls.push(expand_template(media, rep, number, time)?);
    }
    Ok(urls)
}

fn check_segment_count(count: u64) -> Result<()> {
    if count > MAX_SEGMENTS {
        return Err(TidalError::UnsupportedManifest(format!(
            "{} segments exceed the limit of {}",
            count, MAX_SEGMENTS
        )));
    }
    Ok(())
}

/// Remplace les identifiants `$...$` d'un modèle d'URL DASH
fn expand_template(
    template: &str,
    rep: &RepresentationContext<'_>,
    number: u64,
    time: u64,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('$').ok_or_else(|| {
            TidalError::UnsupportedManifest(format!("unterminated identifier in {}", template))
        })?;
        let identifier = &after[..end];
        rest = &after[end + 1..];

        if identifier.is_empty() {
            out.push('$');
            continue;
        }

        let (name, format) = match identifier.split_once('%') {
            Some((name, format)) => (name, Some(format)),
            None => (identifier, None),
        };

        let value = match name {
            "RepresentationID" => {
                out.push_str(rep.id);
                continue;
            }
            "Number" => number,
            "Bandwidth" => rep.bandwidth,
            "Time" => time,
            other => {
                return Err(TidalError::UnsupportedManifest(format!(
                    "unknown template identifier ${}$",
                    other
                )));
            }
        };

        match format {
            Some(format) => {
                let width = format
                    .strip_prefix('0')
                    .and_then(|f| f.strip_suffix('d'))
                    .and_then(|w| w.parse::<usize>().ok())
                    .ok_or_else(|| {
                        TidalError::UnsupportedManifest(format!("unsupported format %{}", format))
                    })?;
                out.push_str(&format!("{:0width$}", value, width = width));
            }
            None => out.push_str(&value.to_string()),
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Convertit une durée ISO 8601 (`PT3M7.4S`, `P1DT2H`) en secondes
fn parse_iso_duration(value: &str) -> Option<f64> {
    let rest = value.trim().strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut seconds = 0.0;
    let mut parse_units = |part: &str, units: &[(char, f64)]| -> Option<()> {
        let mut number = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
            } else {
                let factor = units.iter().find(|(u, _)| *u == c)?.1;
                seconds += number.parse::<f64>().ok()? * factor;
                number.clear();
            }
        }
        number.is_empty().then_some(())
    };

    parse_units(date_part, &[('D', 86400.0)])?;
    parse_units(time_part, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)])?;
    Some(seconds)
}

// ============ Structures XML du MPD ============

#[derive(Debug, Deserialize)]
#[serde(rename = "MPD")]
struct Mpd {
    #[serde(rename = "@mediaPresentationDuration", default)]
    media_presentation_duration: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_url: Option<String>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "@duration", default)]
    duration: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_url: Option<String>,
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Deserialize)]
struct AdaptationSet {
    #[serde(rename = "@contentType", default)]
    content_type: Option<String>,
    #[serde(rename = "@mimeType", default)]
    mime_type: Option<String>,
    #[serde(rename = "@codecs", default)]
    codecs: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_url: Option<String>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "Representation", default)]
    representations: Vec<Representation>,
}

impl AdaptationSet {
    fn is_audio(&self) -> bool {
        match (&self.content_type, &self.mime_type) {
            (Some(content_type), _) => content_type == "audio",
            (None, Some(mime)) => mime.starts_with("audio/"),
            (None, None) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Representation {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "@bandwidth", default)]
    bandwidth: Option<u64>,
    #[serde(rename = "@codecs", default)]
    codecs: Option<String>,
    #[serde(rename = "@mimeType", default)]
    mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_url: Option<String>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SegmentList", default)]
    segment_list: Option<SegmentList>,
}

#[derive(Debug, Deserialize)]
struct SegmentTemplate {
    #[serde(rename = "@initialization", default)]
    initialization: Option<String>,
    #[serde(rename = "@media", default)]
    media: Option<String>,
    #[serde(rename = "@startNumber", default)]
    start_number: Option<u64>,
    #[serde(rename = "@timescale", default)]
    timescale: Option<u64>,
    #[serde(rename = "@duration", default)]
    duration: Option<u64>,
    #[serde(rename = "SegmentTimeline", default)]
    segment_timeline: Option<SegmentTimeline>,
}

#[derive(Debug, Deserialize)]
struct SegmentTimeline {
    #[serde(rename = "S", default)]
    entries: Vec<TimelineEntry>,
}

#[derive(Debug, Deserialize)]
struct TimelineEntry {
    #[serde(rename = "@t", default)]
    t: Option<u64>,
    #[serde(rename = "@d")]
    d: u64,
    #[serde(rename = "@r", default)]
    r: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SegmentList {
    #[serde(rename = "Initialization", default)]
    initialization: Option<UrlNode>,
    #[serde(rename = "SegmentURL", default)]
    segment_urls: Vec<SegmentUrlNode>,
}

#[derive(Debug, Deserialize)]
struct UrlNode {
    #[serde(rename = "@sourceURL", default)]
    source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SegmentUrlNode {
    #[serde(rename = "@media", default)]
    media: Option<String>,
}
