//! Module d'accès au catalogue Tidal (pistes, albums, artistes, playlists)
//!
//! Certains enregistrements sont complétés par un second appel : une piste
//! reçoit ses crédits (`tracks/{id}/contributors`) et son album complet. Les
//! appels indépendants sont lancés en parallèle, les appels dépendants sont
//! enchaînés.

use super::TidalApi;
use crate::error::Result;
use crate::models::*;
use crate::url::EntityType;
use std::future::Future;
use tracing::debug;

/// Taille de page par défaut des listes de pistes
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Nombre d'albums et de titres populaires chargés pour un artiste
pub const ARTIST_LISTING_LIMIT: u32 = 20;

/// Enregistrement d'une entité du catalogue
#[derive(Debug, Clone)]
pub enum CatalogRecord {
    Track(Track),
    Album(Album),
    Artist(ArtistDetails),
    Playlist(Playlist),
}

impl TidalApi {
    /// Récupère une piste enrichie de ses crédits et de son album
    ///
    /// La piste et ses crédits sont chargés en parallèle ; l'album, qui
    /// dépend de la piste, est chargé ensuite.
    pub async fn get_track(&self, track_id: &str) -> Result<Track> {
        debug!("Fetching track {}", track_id);

        let track_endpoint = format!("tracks/{}", track_id);
        let contributors_endpoint = format!("tracks/{}/contributors", track_id);

        let (mut track, contributors) = tokio::try_join!(
            self.get::<Track>(&track_endpoint, &[]),
            self.get::<Page<Contributor>>(&contributors_endpoint, &[]),
        )?;
        track.merge_contributors(contributors.items);

        if let Some(album_id) = track.album.as_ref().map(|a| a.id.clone()) {
            let album = self.get_album(&album_id).await?;
            track.merge_album(album);
        }

        Ok(track)
    }

    /// Récupère les informations d'un album
    pub async fn get_album(&self, album_id: &str) -> Result<Album> {
        debug!("Fetching album {}", album_id);
        self.get(&format!("albums/{}", album_id), &[]).await
    }

    /// Récupère une page de pistes d'un album, avec leurs crédits
    pub async fn get_album_tracks(
        &self,
        album_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page<Track>> {
        debug!("Fetching album {} tracks ({}+{})", album_id, offset, limit);

        let offset = offset.to_string();
        let limit = limit.to_string();
        let params = [
            ("replace", "true"),
            ("includeContributors", "true"),
            ("offset", offset.as_str()),
            ("limit", limit.as_str()),
        ];

        let page: Page<CreditedItem> = self
            .get(&format!("albums/{}/items/credits", album_id), &params)
            .await?;

        Ok(Page {
            limit: page.limit,
            offset: page.offset,
            total_number_of_items: page.total_number_of_items,
            items: page.items.into_iter().map(CreditedItem::into_track).collect(),
        })
    }

    /// Récupère les informations d'une playlist
    pub async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        debug!("Fetching playlist {}", playlist_id);
        self.get(&format!("playlists/{}", playlist_id), &[]).await
    }

    /// Récupère une page de pistes d'une playlist
    pub async fn get_playlist_tracks(
        &self,
        playlist_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Page<Track>> {
        debug!("Fetching playlist {} tracks ({}+{})", playlist_id, offset, limit);

        let offset = offset.to_string();
        let limit = limit.to_string();
        let params = [("offset", offset.as_str()), ("limit", limit.as_str())];

        self.get(&format!("playlists/{}/tracks", playlist_id), &params)
            .await
    }

    /// Récupère les informations d'un artiste
    pub async fn get_artist(&self, artist_id: &str) -> Result<Artist> {
        debug!("Fetching artist {}", artist_id);
        self.get(&format!("artists/{}", artist_id), &[]).await
    }

    /// Récupère les albums d'un artiste
    pub async fn get_artist_albums(&self, artist_id: &str, limit: u32) -> Result<Vec<Album>> {
        let limit = limit.to_string();
        let page: Page<Album> = self
            .get(
                &format!("artists/{}/albums", artist_id),
                &[("limit", limit.as_str())],
            )
            .await?;
        Ok(page.items)
    }

    /// Récupère les titres les plus écoutés d'un artiste
    pub async fn get_artist_top_tracks(&self, artist_id: &str, limit: u32) -> Result<Vec<Track>> {
        let limit = limit.to_string();
        let page: Page<Track> = self
            .get(
                &format!("artists/{}/toptracks", artist_id),
                &[("limit", limit.as_str())],
            )
            .await?;
        Ok(page.items)
    }

    /// Récupère un artiste, ses albums et ses titres populaires en parallèle
    pub async fn get_artist_details(&self, artist_id: &str) -> Result<ArtistDetails> {
        let (artist, albums, top_tracks) = tokio::try_join!(
            self.get_artist(artist_id),
            self.get_artist_albums(artist_id, ARTIST_LISTING_LIMIT),
            self.get_artist_top_tracks(artist_id, ARTIST_LISTING_LIMIT),
        )?;

        Ok(ArtistDetails {
            artist,
            albums,
            top_tracks,
        })
    }

    /// Recherche une piste par code ISRC
    pub async fn lookup_isrc(&self, isrc: &str) -> Result<Option<Track>> {
        debug!("Looking up ISRC {}", isrc);
        let page: Page<Track> = self.get("tracks", &[("isrc", isrc)]).await?;
        Ok(page.items.into_iter().next())
    }

    /// Récupère l'abonnement d'un utilisateur
    pub async fn get_subscription(&self, user_id: &str) -> Result<Subscription> {
        self.get(&format!("users/{}/subscription", user_id), &[])
            .await
    }

    /// Récupère l'enregistrement d'une entité, sans ses enfants
    pub async fn fetch_entity(&self, entity_type: EntityType, id: &str) -> Result<CatalogRecord> {
        Ok(match entity_type {
            EntityType::Track => CatalogRecord::Track(self.get_track(id).await?),
            EntityType::Album => CatalogRecord::Album(self.get_album(id).await?),
            EntityType::Artist => CatalogRecord::Artist(self.get_artist_details(id).await?),
            EntityType::Playlist => CatalogRecord::Playlist(self.get_playlist(id).await?),
        })
    }

    /// Récupère les pistes enfants d'une entité
    ///
    /// Les pages sont demandées par `DEFAULT_PAGE_SIZE` jusqu'à atteindre
    /// `limit` pistes ou la fin de la liste. Une piste n'a pas d'enfants ; un
    /// artiste renvoie ses titres populaires.
    pub async fn fetch_children(
        &self,
        entity_type: EntityType,
        id: &str,
        limit: u32,
    ) -> Result<Vec<Track>> {
        match entity_type {
            EntityType::Track => Ok(Vec::new()),
            EntityType::Artist => {
                self.get_artist_top_tracks(id, limit.min(ARTIST_LISTING_LIMIT))
                    .await
            }
            EntityType::Album => {
                collect_pages(limit, |offset, size| self.get_album_tracks(id, offset, size)).await
            }
            EntityType::Playlist => {
                collect_pages(limit, |offset, size| {
                    self.get_playlist_tracks(id, offset, size)
                })
                .await
            }
        }
    }
}

/// Enchaîne les pages jusqu'à `limit` éléments ou la fin de la liste
async fn collect_pages<T, F, Fut>(limit: u32, fetch_page: F) -> Result<Vec<T>>
where
    F: Fn(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut offset = 0u32;

    while offset < limit {
        let size = (limit - offset).min(DEFAULT_PAGE_SIZE);
        let page = fetch_page(offset, size).await?;
        let received = page.items.len() as u32;
        items.extend(page.items);
        offset += received;

        let exhausted = page
            .total_number_of_items
            .map(|total| offset >= total)
            .unwrap_or(false);
        if received < size || exhausted {
            break;
        }
    }

    Ok(items)
}
