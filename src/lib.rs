pub mod analysis;
pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod models;
pub mod sweeper;
pub mod verdict;
pub mod vision;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::vision::VisionClient;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub vision: VisionClient,
    /// Shared client for outbound calls other than the vision model.
    pub http: reqwest::Client,
}
