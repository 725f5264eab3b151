use anyhow::Result;
use clap::Args;
use std::path::{Component, Path, PathBuf};

/// Media storage options, shared by the server binary and tests.
#[derive(Args, Debug, Clone)]
pub struct MediaArgs {
    /// Base directory for uploaded covers and audio files
    #[arg(long, env = "MEDIA_ROOT", default_value = "media")]
    pub media_root: PathBuf,

    /// Subdirectory of the media root holding cover images
    #[arg(long, env = "COVERS_DIR", default_value = "covers")]
    pub covers_dir: String,

    /// Subdirectory of the media root holding audio files
    #[arg(long, env = "TRACKS_DIR", default_value = "tracks")]
    pub tracks_dir: String,

    /// Comma separated list of accepted cover extensions
    #[arg(
        long,
        env = "ALLOWED_COVER_EXTENSIONS",
        value_delimiter = ',',
        default_value = "jpg,jpeg,png,webp"
    )]
    pub allowed_cover_extensions: Vec<String>,

    /// Comma separated list of accepted audio extensions
    #[arg(
        long,
        env = "ALLOWED_TRACK_EXTENSIONS",
        value_delimiter = ',',
        default_value = "mp3,wav,ogg,flac,m4a"
    )]
    pub allowed_track_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub media_root: PathBuf,
    pub covers_dir: String,
    pub tracks_dir: String,
    pub allowed_cover_extensions: Vec<String>,
    pub allowed_track_extensions: Vec<String>,
}

impl MediaConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            covers_dir: "covers".to_string(),
            tracks_dir: "tracks".to_string(),
            allowed_cover_extensions: normalize_extensions(["jpg", "jpeg", "png", "webp"]),
            allowed_track_extensions: normalize_extensions(["mp3", "wav", "ogg", "flac", "m4a"]),
        }
    }

    pub fn covers_path(&self) -> PathBuf {
        self.media_root.join(&self.covers_dir)
    }

    pub fn tracks_path(&self) -> PathBuf {
        self.media_root.join(&self.tracks_dir)
    }
}

impl TryFrom<MediaArgs> for MediaConfig {
    type Error = anyhow::Error;

    fn try_from(args: MediaArgs) -> Result<Self> {
        Ok(Self {
            media_root: args.media_root,
            covers_dir: subdir_name(&args.covers_dir)?,
            tracks_dir: subdir_name(&args.tracks_dir)?,
            allowed_cover_extensions: normalize_extensions(args.allowed_cover_extensions),
            allowed_track_extensions: normalize_extensions(args.allowed_track_extensions),
        })
    }
}

/// A media subdirectory must stay inside the media root
fn subdir_name(raw: &str) -> Result<String> {
    let name = raw.trim_matches('/');
    let path = Path::new(name);
    if name.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        anyhow::bail!("Invalid media subdirectory: '{}'", raw);
    }
    Ok(name.to_string())
}

/// Lowercase, strip leading dots, drop empty entries
fn normalize_extensions<I, S>(extensions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
