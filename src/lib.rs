//! Music Catalog - a track catalog server with cover and audio uploads
//!
//! This library provides the core functionality for the Music Catalog server:
//! track CRUD backed by SQLite, media file storage, bearer-token identities
//! and per-user favorites, dislikes and reviews.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod genre;
pub mod interactions;
pub mod media;
pub mod server;
