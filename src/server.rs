use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::{AdminUser, CurrentUser, User, UserStore};
use crate::catalog::{Catalog, NewTrack, Track, TrackListParams, TrackPage, TrackUpdate, TrackWithStats};
use crate::error::{AppError, Result};
use crate::interactions::{InteractionStore, Reaction, Review, ReviewCreate};
use crate::media::{MEDIA_URL_PREFIX, MediaStorage, Upload};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub interactions: InteractionStore,
    pub users: UserStore,
}

impl AppState {
    pub fn new(pool: SqlitePool, media: MediaStorage) -> Self {
        Self {
            catalog: Catalog::new(pool.clone(), media),
            interactions: InteractionStore::new(pool.clone()),
            users: UserStore::new(pool),
        }
    }
}

pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    // Only the two upload directories are public, never the media root itself
    let config = state.catalog.media().config();
    let covers_service = ServeDir::new(config.covers_path());
    let tracks_service = ServeDir::new(config.tracks_path());
    let covers_url = format!("{}/{}", MEDIA_URL_PREFIX, config.covers_dir);
    let tracks_url = format!("{}/{}", MEDIA_URL_PREFIX, config.tracks_dir);

    Router::new()
        .route("/", get(root))
        .route("/tracks", get(list_tracks).post(create_track))
        .route(
            "/tracks/:id",
            get(get_track).put(update_track).delete(delete_track),
        )
        .route("/tracks/:id/reviews", get(list_reviews).post(create_review))
        .route("/favorites", get(list_favorites))
        .route(
            "/favorites/:track_id",
            post(add_favorite).delete(remove_favorite),
        )
        .route("/dislikes", get(list_dislikes))
        .route(
            "/dislikes/:track_id",
            post(add_dislike).delete(remove_dislike),
        )
        .nest_service(&covers_url, covers_service)
        .nest_service(&tracks_url, tracks_service)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Music Catalog API v0.1.0"
}

// ========== TRACK ENDPOINTS ==========

/// List tracks with optional genre/artist/search filters, paginated
async fn list_tracks(
    State(state): State<AppState>,
    Query(params): Query<TrackListParams>,
) -> Result<Json<TrackPage>> {
    tracing::debug!(
        "Listing tracks: genre={:?}, artist={:?}, search={:?}, page={:?}, size={:?}",
        params.genre,
        params.artist,
        params.search,
        params.page,
        params.size
    );

    let page = state.catalog.list(params).await?;

    tracing::debug!(
        "Returning {} of {} tracks (page {}/{})",
        page.items.len(),
        page.total,
        page.page,
        page.pages
    );
    Ok(Json(page))
}

/// Get a track with its favorite/dislike/review counts
async fn get_track(
    user: Option<CurrentUser>,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TrackWithStats>> {
    tracing::debug!("Fetching track with id: {}", id);
    let user_id = user.map(|CurrentUser(u)| u.id);
    let track = state.catalog.get_with_stats(id, user_id).await?;
    Ok(Json(track))
}

/// Fields of the create/update multipart form
#[derive(Debug, Default)]
struct TrackForm {
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    duration: Option<String>,
    cover: Option<Upload>,
    audio: Option<Upload>,
}

async fn read_track_form(mut multipart: Multipart) -> Result<TrackForm> {
    let mut form = TrackForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "cover" | "audio" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await?;
                // Browsers send an empty part for an untouched file input
                if filename.is_empty() && data.is_empty() {
                    continue;
                }
                tracing::debug!("Received {} file '{}' ({} bytes)", name, filename, data.len());
                let upload = Some(Upload::new(filename, data));
                if name == "cover" {
                    form.cover = upload;
                } else {
                    form.audio = upload;
                }
            }
            "title" => form.title = Some(field.text().await?),
            "artist" => form.artist = Some(field.text().await?),
            "genre" => form.genre = Some(field.text().await?),
            "duration" => form.duration = Some(field.text().await?),
            other => tracing::debug!("Ignoring unknown form field: {}", other),
        }
    }

    Ok(form)
}

fn parse_duration(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Ok(d),
        _ => Err(AppError::BadRequest(format!("Invalid duration: '{}'", raw))),
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| AppError::BadRequest(format!("Missing field: {}", name)))
}

/// Create a track from a multipart upload (admin only)
async fn create_track(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Track>)> {
    tracing::debug!("Creating track on behalf of {}", admin.username);

    let form = read_track_form(multipart).await?;
    let new = NewTrack {
        title: required(form.title, "title")?,
        artist: required(form.artist, "artist")?,
        genre: required(form.genre, "genre")?,
        duration: parse_duration(&required(form.duration, "duration")?)?,
        cover: required(form.cover, "cover")?,
        audio: required(form.audio, "audio")?,
    };

    let track = state.catalog.create(new).await?;
    tracing::debug!("Successfully created track {}", track.id);
    Ok((StatusCode::CREATED, Json(track)))
}

/// Partially update a track; any field may be omitted (admin only)
async fn update_track(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<Track>> {
    tracing::debug!("Updating track {} on behalf of {}", id, admin.username);

    let form = read_track_form(multipart).await?;
    let update = TrackUpdate {
        title: form.title,
        artist: form.artist,
        genre: form.genre,
        duration: form.duration.as_deref().map(parse_duration).transpose()?,
        cover: form.cover,
        audio: form.audio,
    };

    let track = state.catalog.update(id, update).await?;
    tracing::debug!("Successfully updated track {}", id);
    Ok(Json(track))
}

/// Delete a track and its media files (admin only)
async fn delete_track(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    tracing::debug!("Deleting track {} on behalf of {}", id, admin.username);
    state.catalog.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ========== REVIEW ENDPOINTS ==========

async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Review>>> {
    state.catalog.get(id).await?;
    let reviews = state.interactions.reviews(id).await?;
    tracing::debug!("Returning {} reviews for track {}", reviews.len(), id);
    Ok(Json(reviews))
}

async fn create_review(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(create): Json<ReviewCreate>,
) -> Result<(StatusCode, Json<Review>)> {
    let content = create.content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("Review content must not be empty".to_string()));
    }

    state.catalog.get(id).await?;
    let review = state
        .interactions
        .add_review(user.id, &user.username, id, content)
        .await?;

    tracing::debug!("User {} reviewed track {}", user.username, id);
    Ok((StatusCode::CREATED, Json(review)))
}

// ========== FAVORITE / DISLIKE ENDPOINTS ==========

async fn list_reacted(state: &AppState, reaction: Reaction, user: &User) -> Result<Json<Vec<Track>>> {
    let tracks = state.interactions.tracks(reaction, user.id).await?;
    tracing::debug!("User {} has {} {:?} tracks", user.username, tracks.len(), reaction);
    Ok(Json(tracks))
}

async fn add_reaction(
    state: &AppState,
    reaction: Reaction,
    user: &User,
    track_id: i64,
) -> Result<StatusCode> {
    state.catalog.get(track_id).await?;
    state.interactions.add(reaction, user.id, track_id).await?;
    tracing::debug!("User {} added {:?} for track {}", user.username, reaction, track_id);
    Ok(StatusCode::CREATED)
}

async fn remove_reaction(
    state: &AppState,
    reaction: Reaction,
    user: &User,
    track_id: i64,
) -> Result<StatusCode> {
    if state.interactions.remove(reaction, user.id, track_id).await? {
        tracing::debug!("User {} removed {:?} for track {}", user.username, reaction, track_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "Track {} has no {:?} from this user",
            track_id, reaction
        )))
    }
}

async fn list_favorites(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Track>>> {
    list_reacted(&state, Reaction::Favorite, &user).await
}

async fn add_favorite(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(track_id): Path<i64>,
) -> Result<StatusCode> {
    add_reaction(&state, Reaction::Favorite, &user, track_id).await
}

async fn remove_favorite(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(track_id): Path<i64>,
) -> Result<StatusCode> {
    remove_reaction(&state, Reaction::Favorite, &user, track_id).await
}

async fn list_dislikes(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Track>>> {
    list_reacted(&state, Reaction::Dislike, &user).await
}

async fn add_dislike(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(track_id): Path<i64>,
) -> Result<StatusCode> {
    add_reaction(&state, Reaction::Dislike, &user, track_id).await
}

async fn remove_dislike(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(track_id): Path<i64>,
) -> Result<StatusCode> {
    remove_reaction(&state, Reaction::Dislike, &user, track_id).await
}
