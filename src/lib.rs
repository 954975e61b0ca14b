//! file-share - A file sharing API with per-owner ordering
//!
//! This crate provides image/video upload, tagging, drag-and-drop style
//! reordering and public share links with:
//! - redb embedded database for metadata (ACID, single-writer transactions)
//! - Dense per-owner positions maintained transactionally
//! - Pluggable object storage for file content (local filesystem)
//! - REST API with multipart upload support

pub mod api;
pub mod config;
pub mod object_store;
pub mod ordering;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn object_store::ObjectStore>,
}
