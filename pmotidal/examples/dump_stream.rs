//! Télécharge le flux audio d'une piste Tidal dans un fichier
//!
//! Usage:
//!   cargo run -p pmotidal --example dump_stream -- <url> [QUALITY] [output]
//!
//! Sans qualité, `host.tidal.default_quality` est utilisée avec repli ; une
//! qualité explicite est stricte.

use pmotidal::{AudioQuality, QualityRequest, Resolution, TidalClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = pmoconfig::get_config()?;
    if config.get_log_enable_console() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().unwrap_or_default().to_lowercase()));
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("usage: dump_stream <url> [QUALITY] [output]"))?;
    let quality: Option<AudioQuality> = args
        .next()
        .map(|q| q.parse::<AudioQuality>().map_err(anyhow::Error::msg))
        .transpose()?;

    let client = TidalClient::from_config_obj(config)?;

    let Resolution::Track { track, stream } = client.resolve(&url).await? else {
        anyhow::bail!("{} is not a track", url);
    };

    println!("Piste: {}", track.full_title());

    let handle = match quality {
        Some(quality) => stream.open(&QualityRequest::exactly(quality)).await?,
        None => stream.open_default().await?,
    };

    let extension = match handle.mime_type.as_str() {
        "audio/flac" => "flac",
        "audio/mp4" => "m4a",
        _ => "bin",
    };
    let output = args
        .next()
        .unwrap_or_else(|| format!("{}.{}", track.id, extension));

    println!("Type: {}", handle.mime_type);
    if let Some(size) = handle.size_bytes {
        println!("Taille annoncée: {} octets", size);
    }

    let mut file = tokio::fs::File::create(&output).await?;
    let written = handle.write_to(&mut file).await?;
    println!("{} octets écrits dans {}", written, output);

    Ok(())
}
