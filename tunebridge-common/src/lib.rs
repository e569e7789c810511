//! # Tunebridge Common Library
//!
//! Shared code for the tunebridge services:
//! - Domain models (providers, service connections, transfers, tracks)
//! - Common error type
//! - Configuration loading (TOML file + environment overrides)

pub mod config;
pub mod db;
pub mod error;

pub use db::models::{Provider, ServiceConnection, Track, Transfer, TransferStatus, TransferTrack, TrackStatus};
pub use error::{Error, Result};
