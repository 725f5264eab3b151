use anyhow::{Context, Result};
use clap::Parser;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
struct Track {
    id: i64,
    title: String,
    artist: String,
    genre: String,
    duration: f64,
    cover_path: String,
    audio_path: String,
}

#[derive(Debug, Deserialize)]
struct TrackWithStats {
    #[serde(flatten)]
    track: Track,
    favorites_count: i64,
    dislikes_count: i64,
    reviews_count: i64,
    is_favorited: Option<bool>,
    is_disliked: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TrackPage {
    items: Vec<Track>,
    total: u64,
    page: u32,
    pages: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: Option<String>,
}

#[derive(Parser)]
#[command(name = "catalog-client")]
#[command(about = "Music Catalog CLI Client", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(short, long, default_value = "http://localhost:8000")]
    server: String,

    /// API token, required for admin commands
    #[arg(short, long, env = "CATALOG_TOKEN")]
    token: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser)]
enum Command {
    /// List tracks
    List {
        #[arg(short, long)]
        genre: Option<String>,
        #[arg(short, long)]
        artist: Option<String>,
        /// Match against title or artist
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        size: u32,
    },
    /// Show track details
    Info { id: i64 },
    /// Upload a new track
    Upload {
        #[arg(long)]
        title: String,
        #[arg(long)]
        artist: String,
        #[arg(long)]
        genre: String,
        /// Duration in seconds
        #[arg(long)]
        duration: f64,
        /// Cover image file
        #[arg(long)]
        cover: PathBuf,
        /// Audio file
        #[arg(long)]
        audio: PathBuf,
    },
    /// Update some fields of a track
    Update {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        duration: Option<f64>,
        #[arg(long)]
        cover: Option<PathBuf>,
        #[arg(long)]
        audio: Option<PathBuf>,
    },
    /// Delete a track
    Delete { id: i64 },
}

struct ApiClient {
    server: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient {
        server: cli.server,
        token: cli.token,
        http: reqwest::Client::new(),
    };

    match cli.command.unwrap_or(Command::List {
        genre: None,
        artist: None,
        search: None,
        page: 1,
        size: 20,
    }) {
        Command::List {
            genre,
            artist,
            search,
            page,
            size,
        } => list_tracks(&client, genre, artist, search, page, size).await?,
        Command::Info { id } => show_track_info(&client, id).await?,
        Command::Upload {
            title,
            artist,
            genre,
            duration,
            cover,
            audio,
        } => {
            let form = Form::new()
                .text("title", title)
                .text("artist", artist)
                .text("genre", genre)
                .text("duration", duration.to_string())
                .part("cover", file_part(&cover).await?)
                .part("audio", file_part(&audio).await?);
            upload_track(&client, form).await?
        }
        Command::Update {
            id,
            title,
            artist,
            genre,
            duration,
            cover,
            audio,
        } => {
            let mut form = Form::new();
            for (name, value) in [("title", title), ("artist", artist), ("genre", genre)] {
                if let Some(value) = value {
                    form = form.text(name, value);
                }
            }
            if let Some(duration) = duration {
                form = form.text("duration", duration.to_string());
            }
            if let Some(cover) = cover {
                form = form.part("cover", file_part(&cover).await?);
            }
            if let Some(audio) = audio {
                form = form.part("audio", file_part(&audio).await?);
            }
            update_track(&client, id, form).await?
        }
        Command::Delete { id } => delete_track(&client, id).await?,
    }

    Ok(())
}

async fn file_part(path: &Path) -> Result<Part> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Part::bytes(data).file_name(filename))
}

/// Turn a non-success response into an error carrying the server's message
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ErrorBody>().await {
        Ok(body) => anyhow::bail!(
            "Server returned {}: {}",
            status,
            body.message.unwrap_or(body.error)
        ),
        Err(_) => anyhow::bail!("Server returned error: {}", status),
    }
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

async fn list_tracks(
    client: &ApiClient,
    genre: Option<String>,
    artist: Option<String>,
    search: Option<String>,
    page: u32,
    size: u32,
) -> Result<()> {
    let mut query = vec![("page", page.to_string()), ("size", size.to_string())];
    for (name, value) in [("genre", genre), ("artist", artist), ("search", search)] {
        if let Some(value) = value {
            query.push((name, value));
        }
    }

    let response = client
        .request(reqwest::Method::GET, "/tracks")
        .query(&query)
        .send()
        .await
        .context("Failed to connect to server")?;
    let page: TrackPage = check(response)
        .await?
        .json()
        .await
        .context("Failed to parse response")?;

    if page.items.is_empty() {
        println!("No tracks found.");
        return Ok(());
    }

    println!(
        "Music Catalog ({} tracks, page {}/{}):",
        page.total, page.page, page.pages
    );
    println!("{:-<80}", "");

    for track in &page.items {
        println!("{}. {} - {}", track.id, track.artist, track.title);
        println!(
            "   Genre: {}  Duration: {}",
            track.genre,
            format_duration(track.duration)
        );
        println!("   Audio: {}{}", client.server, track.audio_path);
        println!();
    }

    Ok(())
}

async fn show_track_info(client: &ApiClient, id: i64) -> Result<()> {
    let response = client
        .request(reqwest::Method::GET, &format!("/tracks/{}", id))
        .send()
        .await
        .context("Failed to connect to server")?;
    let stats: TrackWithStats = check(response)
        .await?
        .json()
        .await
        .context("Failed to parse response")?;
    let track = &stats.track;

    println!("Track Information:");
    println!("{:-<80}", "");
    println!("Title:     {}", track.title);
    println!("Artist:    {}", track.artist);
    println!("Genre:     {}", track.genre);
    println!("Duration:  {}", format_duration(track.duration));
    println!("Cover:     {}{}", client.server, track.cover_path);
    println!("Audio:     {}{}", client.server, track.audio_path);
    println!("Favorites: {}", stats.favorites_count);
    println!("Dislikes:  {}", stats.dislikes_count);
    println!("Reviews:   {}", stats.reviews_count);
    if let (Some(fav), Some(dis)) = (stats.is_favorited, stats.is_disliked) {
        println!("You:       favorited={} disliked={}", fav, dis);
    }
    println!("ID:        {}", track.id);

    Ok(())
}

async fn upload_track(client: &ApiClient, form: Form) -> Result<()> {
    let response = client
        .request(reqwest::Method::POST, "/tracks")
        .multipart(form)
        .send()
        .await
        .context("Failed to connect to server")?;
    let track: Track = check(response)
        .await?
        .json()
        .await
        .context("Failed to parse response")?;

    println!("Track uploaded successfully!");
    println!("ID: {}", track.id);
    println!("{} - {}", track.artist, track.title);

    Ok(())
}

async fn update_track(client: &ApiClient, id: i64, form: Form) -> Result<()> {
    let response = client
        .request(reqwest::Method::PUT, &format!("/tracks/{}", id))
        .multipart(form)
        .send()
        .await
        .context("Failed to connect to server")?;
    let track: Track = check(response)
        .await?
        .json()
        .await
        .context("Failed to parse response")?;

    println!("Track {} updated: {} - {}", track.id, track.artist, track.title);

    Ok(())
}

async fn delete_track(client: &ApiClient, id: i64) -> Result<()> {
    let response = client
        .request(reqwest::Method::DELETE, &format!("/tracks/{}", id))
        .send()
        .await
        .context("Failed to connect to server")?;
    check(response).await?;

    println!("Track {} deleted.", id);

    Ok(())
}
