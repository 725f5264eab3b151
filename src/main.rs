use anyhow::{Context, Result};
use clap::Parser;
use music_catalog::config::{MediaArgs, MediaConfig};
use music_catalog::media::MediaStorage;
use music_catalog::{db, server};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "music-catalog")]
#[command(about = "Music Catalog Server", long_about = None)]
struct Cli {
    #[command(flatten)]
    media: MediaArgs,

    /// Path to the SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "catalog.db")]
    database: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Largest accepted request body, in megabytes
    #[arg(long, default_value = "100")]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins, otherwise log everything at debug level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = MediaConfig::try_from(cli.media).context("Invalid media configuration")?;
    if config.media_root.exists() && !config.media_root.is_dir() {
        anyhow::bail!(
            "Media root is not a directory: {}",
            config.media_root.display()
        );
    }

    tracing::info!("Starting Music Catalog");
    tracing::info!("Media root: {}", config.media_root.display());
    tracing::info!(
        "Allowed cover extensions: {}",
        config.allowed_cover_extensions.join(", ")
    );
    tracing::info!(
        "Allowed audio extensions: {}",
        config.allowed_track_extensions.join(", ")
    );

    let media = MediaStorage::new(config);
    media
        .ensure_dirs()
        .await
        .context("Failed to prepare media directories")?;

    let pool = db::connect(&cli.database)
        .await
        .context("Failed to open catalog database")?;

    let state = server::AppState::new(pool, media);
    let app = server::create_router(state, cli.max_upload_mb * 1024 * 1024);
    let addr = format!("0.0.0.0:{}", cli.port);

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  GET    /tracks              - List tracks (genre, artist, search, page, size)");
    tracing::info!("  GET    /tracks/:id          - Get track with stats");
    tracing::info!("  POST   /tracks              - Create track (admin, multipart)");
    tracing::info!("  PUT    /tracks/:id          - Update track (admin, multipart)");
    tracing::info!("  DELETE /tracks/:id          - Delete track (admin)");
    tracing::info!("  GET    /tracks/:id/reviews  - List reviews");
    tracing::info!("  POST   /tracks/:id/reviews  - Add review");
    tracing::info!("  *      /favorites, /dislikes - Per-user reactions");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
