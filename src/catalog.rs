use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::error::{AppError, Result};
use crate::genre::Genre;
use crate::interactions::{InteractionStore, TrackCounts};
use crate::media::{MediaKind, MediaStorage, StoredFile, Upload};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

pub(crate) const TRACK_COLUMNS: &str =
    "tracks.id, tracks.title, tracks.artist, tracks.genre, tracks.duration, tracks.cover_path, tracks.audio_path";

pub(crate) type TrackRow = (i64, String, String, String, f64, String, String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub genre: Genre,
    pub duration: f64,
    pub cover_path: String,
    pub audio_path: String,
}

impl TryFrom<TrackRow> for Track {
    type Error = anyhow::Error;

    fn try_from(row: TrackRow) -> anyhow::Result<Self> {
        let (id, title, artist, genre, duration, cover_path, audio_path) = row;
        let genre = genre
            .parse::<Genre>()
            .with_context(|| format!("Track {} has an unknown stored genre", id))?;
        Ok(Track {
            id,
            title,
            artist,
            genre,
            duration,
            cover_path,
            audio_path,
        })
    }
}

pub(crate) fn tracks_from_rows(rows: Vec<TrackRow>) -> anyhow::Result<Vec<Track>> {
    rows.into_iter().map(Track::try_from).collect()
}

/// Track plus aggregate counts and, for a known caller, their own flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackWithStats {
    #[serde(flatten)]
    pub track: Track,
    pub favorites_count: i64,
    pub dislikes_count: i64,
    pub reviews_count: i64,
    pub is_favorited: Option<bool>,
    pub is_disliked: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPage {
    pub items: Vec<Track>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    pub pages: u64,
}

/// Query string of the list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackListParams {
    pub genre: Option<String>,
    pub artist: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    pub genre: Option<Genre>,
    pub artist: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTrack {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub duration: f64,
    pub cover: Upload,
    pub audio: Upload,
}

/// Partial update: `None` leaves the current value untouched
#[derive(Debug, Clone, Default)]
pub struct TrackUpdate {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub duration: Option<f64>,
    pub cover: Option<Upload>,
    pub audio: Option<Upload>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// `%term%` with LIKE metacharacters escaped by `\`
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TrackFilter) {
    let mut sep = " WHERE ";
    if let Some(genre) = filter.genre {
        qb.push(sep).push("genre = ").push_bind(genre.as_str());
        sep = " AND ";
    }
    if let Some(artist) = &filter.artist {
        qb.push(sep)
            .push("artist LIKE ")
            .push_bind(like_pattern(artist))
            .push(" ESCAPE '\\'");
        sep = " AND ";
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        qb.push(sep)
            .push("(title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR artist LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

pub fn page_count(total: u64, size: u32) -> u64 {
    total.div_ceil(size as u64)
}

/// The track resource: rows in the database, bytes in media storage
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
    media: MediaStorage,
    interactions: InteractionStore,
}

impl Catalog {
    pub fn new(pool: SqlitePool, media: MediaStorage) -> Self {
        let interactions = InteractionStore::new(pool.clone());
        Self {
            pool,
            media,
            interactions,
        }
    }

    pub fn media(&self) -> &MediaStorage {
        &self.media
    }

    /// One page of tracks matching the filters, ordered by id
    pub async fn list(&self, params: TrackListParams) -> Result<TrackPage> {
        let page = params.page.unwrap_or(1);
        let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page < 1 {
            return Err(AppError::BadRequest("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&size) {
            return Err(AppError::BadRequest(format!(
                "size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let empty = TrackPage {
            items: Vec::new(),
            total: 0,
            page,
            size,
            pages: 0,
        };

        let genre = match non_empty(params.genre) {
            Some(raw) => match raw.parse::<Genre>() {
                Ok(genre) => Some(genre),
                Err(e) => {
                    tracing::debug!("{}, returning an empty page", e);
                    return Ok(empty);
                }
            },
            None => None,
        };
        let filter = TrackFilter {
            genre,
            artist: non_empty(params.artist),
            search: non_empty(params.search),
        };

        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tracks");
        push_filters(&mut count_query, &filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let total = total as u64;

        let mut items_query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM tracks", TRACK_COLUMNS));
        push_filters(&mut items_query, &filter);
        items_query
            .push(" ORDER BY tracks.id ASC LIMIT ")
            .push_bind(size as i64)
            .push(" OFFSET ")
            .push_bind((page as i64 - 1) * size as i64);
        let rows: Vec<TrackRow> = items_query.build_query_as().fetch_all(&self.pool).await?;

        Ok(TrackPage {
            items: tracks_from_rows(rows)?,
            total,
            page,
            size,
            pages: page_count(total, size),
        })
    }

    pub async fn find(&self, id: i64) -> Result<Option<Track>> {
        let row: Option<TrackRow> =
            sqlx::query_as(&format!("SELECT {} FROM tracks WHERE id = ?", TRACK_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Track::try_from).transpose()?)
    }

    /// A track, or `NotFound`
    pub async fn get(&self, id: i64) -> Result<Track> {
        self.find(id).await?.ok_or_else(track_not_found)
    }

    /// Track with favorite/dislike/review counts; flags only for a known caller
    pub async fn get_with_stats(&self, id: i64, user_id: Option<i64>) -> Result<TrackWithStats> {
        let track = self.get(id).await?;
        let TrackCounts {
            favorites,
            dislikes,
            reviews,
        } = self.interactions.counts(id).await?;

        let (is_favorited, is_disliked) = match user_id {
            Some(user_id) => {
                let (fav, dis) = self.interactions.flags(user_id, id).await?;
                (Some(fav), Some(dis))
            }
            None => (None, None),
        };

        Ok(TrackWithStats {
            track,
            favorites_count: favorites,
            dislikes_count: dislikes,
            reviews_count: reviews,
            is_favorited,
            is_disliked,
        })
    }

    fn checked_extension(&self, kind: MediaKind, upload: &Upload) -> Result<String> {
        self.media
            .check_extension(kind, &upload.filename)
            .ok_or_else(|| AppError::BadRequest(self.media.invalid_format_message(kind)))
    }

    /// Validate, store both files, then insert the row.
    ///
    /// Nothing touches the disk until every check passed. A failed write
    /// removes whatever was written of both files.
    pub async fn create(&self, new: NewTrack) -> Result<Track> {
        let cover_ext = self.checked_extension(MediaKind::Cover, &new.cover)?;
        let audio_ext = self.checked_extension(MediaKind::Audio, &new.audio)?;
        let genre = parse_genre(&new.genre)?;

        let cover_file = self.media.allocate(MediaKind::Cover, &cover_ext);
        let audio_file = self.media.allocate(MediaKind::Audio, &audio_ext);

        let written = async {
            self.media.write(&cover_file, &new.cover.data).await?;
            self.media.write(&audio_file, &new.audio.data).await
        }
        .await;

        if let Err(e) = written {
            self.media.discard(&cover_file).await;
            self.media.discard(&audio_file).await;
            return Err(AppError::Storage(format!("Error saving files: {:#}", e)));
        }

        let inserted = self
            .insert(
                &new.title,
                &new.artist,
                genre,
                new.duration,
                &cover_file,
                &audio_file,
            )
            .await;

        match inserted {
            Ok(track) => {
                tracing::info!("Created track {} '{}' by {}", track.id, track.title, track.artist);
                Ok(track)
            }
            Err(e) => {
                self.media.discard(&cover_file).await;
                self.media.discard(&audio_file).await;
                Err(e)
            }
        }
    }

    async fn insert(
        &self,
        title: &str,
        artist: &str,
        genre: Genre,
        duration: f64,
        cover: &StoredFile,
        audio: &StoredFile,
    ) -> Result<Track> {
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO tracks (title, artist, genre, duration, cover_path, audio_path)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(title)
        .bind(artist)
        .bind(genre.as_str())
        .bind(duration)
        .bind(&cover.media_path)
        .bind(&audio.media_path)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Track {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
            genre,
            duration,
            cover_path: cover.media_path.clone(),
            audio_path: audio.media_path.clone(),
        })
    }

    /// Apply a partial update.
    ///
    /// Replacement files are written first. The row is then changed by one
    /// statement touching only the provided fields, with no transaction held
    /// across file I/O. Replaced files are removed once that has succeeded.
    pub async fn update(&self, id: i64, update: TrackUpdate) -> Result<Track> {
        let current = self.get(id).await?;

        let genre = update.genre.as_deref().map(parse_genre).transpose()?;
        let cover = match update.cover {
            Some(upload) => {
                let ext = self.checked_extension(MediaKind::Cover, &upload)?;
                Some((self.media.allocate(MediaKind::Cover, &ext), upload))
            }
            None => None,
        };
        let audio = match update.audio {
            Some(upload) => {
                let ext = self.checked_extension(MediaKind::Audio, &upload)?;
                Some((self.media.allocate(MediaKind::Audio, &ext), upload))
            }
            None => None,
        };

        let new_files: Vec<&StoredFile> = cover.iter().chain(audio.iter()).map(|(f, _)| f).collect();

        let written = async {
            for (file, upload) in cover.iter().chain(audio.iter()) {
                self.media.write(file, &upload.data).await?;
            }
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = written {
            for file in &new_files {
                self.media.discard(file).await;
            }
            return Err(AppError::Storage(format!("Error saving files: {:#}", e)));
        }

        let saved: std::result::Result<Option<TrackRow>, sqlx::Error> = sqlx::query_as(
            r#"
            UPDATE tracks
            SET title = COALESCE(?, title),
                artist = COALESCE(?, artist),
                genre = COALESCE(?, genre),
                duration = COALESCE(?, duration),
                cover_path = COALESCE(?, cover_path),
                audio_path = COALESCE(?, audio_path)
            WHERE id = ?
            RETURNING id, title, artist, genre, duration, cover_path, audio_path
            "#,
        )
        .bind(update.title)
        .bind(update.artist)
        .bind(genre.map(|g| g.as_str()))
        .bind(update.duration)
        .bind(cover.as_ref().map(|(f, _)| f.media_path.clone()))
        .bind(audio.as_ref().map(|(f, _)| f.media_path.clone()))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;

        let row = match saved {
            Ok(Some(row)) => row,
            Ok(None) => {
                // Deleted while the files were being written
                for file in &new_files {
                    self.media.discard(file).await;
                }
                return Err(track_not_found());
            }
            Err(e) => {
                for file in &new_files {
                    self.media.discard(file).await;
                }
                return Err(e.into());
            }
        };
        let track = Track::try_from(row)?;

        let mut replaced = Vec::new();
        if cover.is_some() {
            replaced.push(current.cover_path);
        }
        if audio.is_some() {
            replaced.push(current.audio_path);
        }
        for old in &replaced {
            self.media.remove(old).await;
        }

        tracing::info!("Updated track {} ({} file(s) replaced)", id, replaced.len());
        Ok(track)
    }

    /// Delete the row, then its media files
    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted: Option<(String, String, String)> = sqlx::query_as(
            "DELETE FROM tracks WHERE id = ? RETURNING title, cover_path, audio_path",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let (title, cover_path, audio_path) = deleted.ok_or_else(track_not_found)?;

        self.media.remove(&cover_path).await;
        self.media.remove(&audio_path).await;

        tracing::info!("Deleted track {} '{}'", id, title);
        Ok(())
    }
}

fn track_not_found() -> AppError {
    AppError::NotFound("Track not found".to_string())
}

fn parse_genre(raw: &str) -> Result<Genre> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(Genre::invalid_message()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;

    async fn setup() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect(&dir.path().join("catalog.db")).await.unwrap();
        let media = MediaStorage::new(MediaConfig::new(dir.path().join("media")));
        media.ensure_dirs().await.unwrap();
        (dir, Catalog::new(pool, media))
    }

    fn new_track(title: &str, artist: &str, genre: &str) -> NewTrack {
        NewTrack {
            title: title.to_string(),
            artist: artist.to_string(),
            genre: genre.to_string(),
            duration: 200.5,
            cover: Upload::new("cover.png", b"png-bytes".to_vec()),
            audio: Upload::new("song.mp3", b"mp3-bytes".to_vec()),
        }
    }

    fn media_file_count(catalog: &Catalog) -> usize {
        let config = catalog.media().config();
        [config.covers_path(), config.tracks_path()]
            .iter()
            .map(|dir| std::fs::read_dir(dir).unwrap().count())
            .sum()
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(1, 20), 1);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
    }

    #[tokio::test]
    async fn test_create_stores_files_and_row() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();

        assert_eq!(track.genre, Genre::Rock);
        assert!(track.cover_path.starts_with("/media/covers/"));
        assert!(track.audio_path.starts_with("/media/tracks/"));

        let cover = catalog.media().resolve(&track.cover_path).unwrap();
        let audio = catalog.media().resolve(&track.audio_path).unwrap();
        assert_eq!(std::fs::read(cover).unwrap(), b"png-bytes");
        assert_eq!(std::fs::read(audio).unwrap(), b"mp3-bytes");

        assert_eq!(catalog.get(track.id).await.unwrap(), track);
    }

    #[tokio::test]
    async fn test_create_rejects_before_writing() {
        let (_dir, catalog) = setup().await;

        let mut bad_cover = new_track("Song", "Band", "rock");
        bad_cover.cover = Upload::new("cover.gif", b"gif".to_vec());
        let err = catalog.create(bad_cover).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m.starts_with("Invalid cover file format")));

        let mut bad_audio = new_track("Song", "Band", "rock");
        bad_audio.audio = Upload::new("song.txt", b"txt".to_vec());
        let err = catalog.create(bad_audio).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m.starts_with("Invalid audio file format")));

        let err = catalog.create(new_track("Song", "Band", "dubstep")).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m.contains("Allowed genres: POP")));

        assert_eq!(media_file_count(&catalog), 0);
        assert_eq!(catalog.list(TrackListParams::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_create_write_failure_cleans_up() {
        let (_dir, catalog) = setup().await;
        std::fs::remove_dir(catalog.media().config().tracks_path()).unwrap();

        let err = catalog.create(new_track("Song", "Band", "pop")).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(ref m) if m.starts_with("Error saving files")));

        // The cover made it to disk before the audio write failed and must be gone
        let covers = std::fs::read_dir(catalog.media().config().covers_path()).unwrap();
        assert_eq!(covers.count(), 0);
        assert_eq!(catalog.list(TrackListParams::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let (_dir, catalog) = setup().await;
        for i in 0..5 {
            catalog
                .create(new_track(&format!("Rock Song {}", i), "The Stones", "rock"))
                .await
                .unwrap();
        }
        catalog.create(new_track("Smooth", "Miles", "jazz")).await.unwrap();
        catalog.create(new_track("Stone Cold", "Jazz Cats", "JAZZ")).await.unwrap();

        let all = catalog.list(TrackListParams::default()).await.unwrap();
        assert_eq!(all.total, 7);
        assert_eq!(all.pages, 1);
        assert!(all.items.windows(2).all(|w| w[0].id < w[1].id));

        let page = catalog
            .list(TrackListParams {
                genre: Some("Rock".into()),
                page: Some(2),
                size: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].title, "Rock Song 2");

        let by_artist = catalog
            .list(TrackListParams {
                artist: Some("stones".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_artist.total, 5);

        let search = catalog
            .list(TrackListParams {
                search: Some("STONE".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(search.total, 6);

        let combined = catalog
            .list(TrackListParams {
                genre: Some("jazz".into()),
                search: Some("stone".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(combined.total, 1);
        assert_eq!(combined.items[0].title, "Stone Cold");

        let wildcard = catalog
            .list(TrackListParams {
                search: Some("%".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(wildcard.total, 0);
    }

    #[tokio::test]
    async fn test_list_unknown_genre_is_empty() {
        let (_dir, catalog) = setup().await;
        catalog.create(new_track("Song", "Band", "rock")).await.unwrap();

        let page = catalog
            .list(TrackListParams {
                genre: Some("dubstep".into()),
                search: Some("Song".into()),
                page: Some(3),
                size: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!((page.total, page.pages, page.page, page.size), (0, 0, 3, 10));
    }

    #[tokio::test]
    async fn test_list_rejects_bad_paging() {
        let (_dir, catalog) = setup().await;
        for (page, size) in [(0, 20), (1, 0), (1, 101)] {
            let result = catalog
                .list(TrackListParams {
                    page: Some(page),
                    size: Some(size),
                    ..Default::default()
                })
                .await;
            assert!(matches!(result, Err(AppError::BadRequest(_))));
        }
    }

    #[tokio::test]
    async fn test_update_metadata_only_keeps_files() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();

        let updated = catalog
            .update(
                track.id,
                TrackUpdate {
                    title: Some("New Title".into()),
                    genre: Some("metal".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "New Title");
        assert_eq!(updated.artist, "Band");
        assert_eq!(updated.genre, Genre::Metal);
        assert_eq!(updated.cover_path, track.cover_path);
        assert_eq!(updated.audio_path, track.audio_path);
        assert!(catalog.media().resolve(&track.cover_path).unwrap().exists());
        assert_eq!(catalog.get(track.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_update_replaces_cover() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();
        let old_cover = catalog.media().resolve(&track.cover_path).unwrap();

        let updated = catalog
            .update(
                track.id,
                TrackUpdate {
                    cover: Some(Upload::new("new.JPG", b"jpeg-bytes".to_vec())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_ne!(updated.cover_path, track.cover_path);
        assert!(updated.cover_path.ends_with(".jpg"));
        assert!(!old_cover.exists());
        let new_cover = catalog.media().resolve(&updated.cover_path).unwrap();
        assert_eq!(std::fs::read(new_cover).unwrap(), b"jpeg-bytes");
        assert_eq!(updated.audio_path, track.audio_path);
    }

    #[tokio::test]
    async fn test_update_invalid_input_changes_nothing() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();

        let err = catalog
            .update(
                track.id,
                TrackUpdate {
                    title: Some("Changed".into()),
                    cover: Some(Upload::new("new.png", b"x".to_vec())),
                    audio: Some(Upload::new("new.exe", b"x".to_vec())),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = catalog
            .update(
                track.id,
                TrackUpdate {
                    genre: Some("dubstep".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert_eq!(catalog.get(track.id).await.unwrap(), track);
        assert_eq!(media_file_count(&catalog), 2);
    }

    #[tokio::test]
    async fn test_update_missing_track() {
        let (_dir, catalog) = setup().await;
        let err = catalog.update(42, TrackUpdate::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_write_failure_keeps_old_files() {
        let (dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();
        let old_cover = catalog.media().resolve(&track.cover_path).unwrap();
        let old_audio = catalog.media().resolve(&track.audio_path).unwrap();

        // Park the tracks directory so the audio write has nowhere to go
        let tracks = catalog.media().config().tracks_path();
        let parked = dir.path().join("parked-tracks");
        std::fs::rename(&tracks, &parked).unwrap();

        let err = catalog
            .update(
                track.id,
                TrackUpdate {
                    title: Some("Changed".into()),
                    cover: Some(Upload::new("new.png", b"new cover".to_vec())),
                    audio: Some(Upload::new("new.mp3", b"new audio".to_vec())),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(ref m) if m.starts_with("Error saving files")));

        std::fs::rename(&parked, &tracks).unwrap();

        let stored = catalog.get(track.id).await.unwrap();
        assert_eq!(stored, track);
        assert!(old_cover.exists());
        assert!(old_audio.exists());
        // The cover written before the audio failure is gone again
        assert_eq!(media_file_count(&catalog), 2);
    }

    #[tokio::test]
    async fn test_update_save_failure_discards_new_files() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_updates BEFORE UPDATE ON tracks \
             BEGIN SELECT RAISE(ABORT, 'tracks are read-only'); END",
        )
        .execute(&catalog.pool)
        .await
        .unwrap();

        let err = catalog
            .update(
                track.id,
                TrackUpdate {
                    cover: Some(Upload::new("new.webp", b"new cover".to_vec())),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        assert_eq!(catalog.get(track.id).await.unwrap(), track);
        assert!(catalog.media().resolve(&track.cover_path).unwrap().exists());
        assert_eq!(media_file_count(&catalog), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlapping_updates_both_apply() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();
        let id = track.id;

        let slow = {
            let catalog = catalog.clone();
            tokio::spawn(async move {
                catalog
                    .update(
                        id,
                        TrackUpdate {
                            title: Some("Slow".into()),
                            audio: Some(Upload::new("big.flac", vec![7u8; 16 * 1024 * 1024])),
                            ..Default::default()
                        },
                    )
                    .await
            })
        };
        let fast = catalog
            .update(
                id,
                TrackUpdate {
                    artist: Some("Fast".into()),
                    ..Default::default()
                },
            )
            .await;

        let slow = slow.await.unwrap();
        assert!(fast.is_ok(), "fast update failed: {:?}", fast);
        let slow = slow.unwrap();

        // Each update only touched its own fields
        let stored = catalog.get(track.id).await.unwrap();
        assert_eq!(stored.title, "Slow");
        assert_eq!(stored.artist, "Fast");
        assert_eq!(stored.audio_path, slow.audio_path);
        assert_ne!(stored.audio_path, track.audio_path);
        assert!(!catalog.media().resolve(&track.audio_path).unwrap().exists());
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_files() {
        let (_dir, catalog) = setup().await;
        let track = catalog.create(new_track("Song", "Band", "rock")).await.unwrap();
        let cover = catalog.media().resolve(&track.cover_path).unwrap();

        // A file already gone out-of-band is not an error
        std::fs::remove_file(catalog.media().resolve(&track.audio_path).unwrap()).unwrap();

        catalog.delete(track.id).await.unwrap();
        assert!(!cover.exists());
        assert!(matches!(catalog.get(track.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(catalog.delete(track.id).await, Err(AppError::NotFound(_))));
    }
}
