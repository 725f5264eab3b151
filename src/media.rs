//! Blob storage for uploaded covers and audio files.
//!
//! Files live under `MEDIA_ROOT/<subdir>/<uuid>.<ext>` and are referenced
//! from track rows by their media-relative path, `/media/<subdir>/<file>`.

use anyhow::{Context, Result};
use axum::body::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::MediaConfig;

/// URL prefix of every stored media path
pub const MEDIA_URL_PREFIX: &str = "/media";

/// An uploaded file held in memory until validation has passed
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Cover,
    Audio,
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Cover => "cover",
            MediaKind::Audio => "audio",
        }
    }
}

/// A file slot allocated for an upload: where it goes on disk and how the
/// track row refers to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub media_path: String,
    pub full_path: PathBuf,
}

/// Lowercased suffix after the last `.`, if there is a non-empty one
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

#[derive(Clone)]
pub struct MediaStorage {
    config: Arc<MediaConfig>,
}

impl MediaStorage {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Create the covers and tracks directories if they are missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.config.covers_path(), self.config.tracks_path()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create media directory: {}", dir.display()))?;
        }
        Ok(())
    }

    fn subdir(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Cover => &self.config.covers_dir,
            MediaKind::Audio => &self.config.tracks_dir,
        }
    }

    fn allowed(&self, kind: MediaKind) -> &[String] {
        match kind {
            MediaKind::Cover => &self.config.allowed_cover_extensions,
            MediaKind::Audio => &self.config.allowed_track_extensions,
        }
    }

    /// Validation message naming the accepted extensions for `kind`
    pub fn invalid_format_message(&self, kind: MediaKind) -> String {
        format!(
            "Invalid {} file format. Allowed formats: {}",
            kind.label(),
            self.allowed(kind).join(", ")
        )
    }

    /// Returns the accepted extension of `filename`, or `None` if it is not allowed
    pub fn check_extension(&self, kind: MediaKind, filename: &str) -> Option<String> {
        let ext = file_extension(filename)?;
        self.allowed(kind).contains(&ext).then_some(ext)
    }

    /// Reserve a fresh, uniquely named file for an upload with extension `ext`
    pub fn allocate(&self, kind: MediaKind, ext: &str) -> StoredFile {
        let subdir = self.subdir(kind);
        let filename = format!("{}.{}", uuid::Uuid::new_v4(), ext);
        StoredFile {
            media_path: format!("{}/{}/{}", MEDIA_URL_PREFIX, subdir, filename),
            full_path: self.config.media_root.join(subdir).join(filename),
        }
    }

    pub async fn write(&self, file: &StoredFile, data: &[u8]) -> Result<()> {
        tokio::fs::write(&file.full_path, data)
            .await
            .with_context(|| format!("Failed to write {}", file.full_path.display()))?;
        tracing::debug!("Wrote {} bytes to {}", data.len(), file.full_path.display());
        Ok(())
    }

    /// Remove an allocated file if it made it to disk
    pub async fn discard(&self, file: &StoredFile) {
        remove_quietly(&file.full_path).await;
    }

    /// Map a media-relative path back onto the filesystem.
    ///
    /// Returns `None` for paths outside the media prefix or containing
    /// anything other than plain components.
    pub fn resolve(&self, media_path: &str) -> Option<PathBuf> {
        let relative = media_path
            .strip_prefix(MEDIA_URL_PREFIX)?
            .trim_start_matches('/');
        let relative = Path::new(relative);
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.config.media_root.join(relative))
    }

    /// Delete the file behind a media-relative path. Missing files are not an error.
    pub async fn remove(&self, media_path: &str) {
        match self.resolve(media_path) {
            Some(path) => remove_quietly(&path).await,
            None => tracing::warn!("Refusing to remove unexpected media path: {}", media_path),
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
