//! Résout une URL Tidal et affiche les métadonnées
//!
//! Usage:
//!   cargo run -p pmotidal --example resolve_url -- https://tidal.com/browse/album/109485854

use pmotidal::{Resolution, TidalClient, TidalConfigExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = pmoconfig::get_config()?;

    if config.get_log_enable_console() {
        // RUST_LOG prend le pas sur host.logger.min_level
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.get_log_min_level().unwrap_or_default().to_lowercase()));
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }

    let url = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: resolve_url <tidal url>"))?;

    println!("Type: {}", TidalClient::entity_type(&url)?);

    let client = TidalClient::from_config_obj(config.clone())?;
    println!("Qualité par défaut: {}", config.get_tidal_default_quality());

    match client.resolve(&url).await? {
        Resolution::Track { track, stream } => {
            println!("Piste: {}", track.full_title());
            if let Some(artist) = track.display_artist() {
                println!("  Artiste: {}", artist.name);
            }
            if let Some(album) = track.album_name() {
                println!("  Album: {}", album);
            }
            for contributor in &track.contributors {
                println!("  {}: {}", contributor.role, contributor.name);
            }
            println!("  Rendus:");
            for rendition in stream.renditions() {
                println!(
                    "    {} ({}, {:?})",
                    rendition.label(),
                    rendition.mime_type,
                    rendition.delivery
                );
            }
        }
        Resolution::Album { album, tracks } => {
            println!("Album: {} ({} pistes)", album.title, tracks.len());
            for track in &tracks {
                println!("  {:>2}. {}", track.track_number.unwrap_or(0), track.full_title());
            }
        }
        Resolution::Artist { details } => {
            println!("Artiste: {}", details.artist.name);
            println!("  {} albums", details.albums.len());
            for track in &details.top_tracks {
                println!("  - {}", track.full_title());
            }
        }
        Resolution::Playlist { playlist, tracks } => {
            println!("Playlist: {} ({} pistes)", playlist.title, tracks.len());
            for track in &tracks {
                println!("  - {}", track.full_title());
            }
        }
    }

    match client.account_info().await {
        Ok(account) => println!(
            "Compte {} ({}), premium: {}",
            account.user_id,
            account.country_code.unwrap_or_default(),
            account.premium
        ),
        Err(e) => println!("Compte indisponible: {}", e),
    }

    Ok(())
}
