//! Monetoile 客户端库
//! 带令牌自动刷新的后端 API 客户端

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod telemetry;

pub use client::{ApiClient, ApiRequest, RequestState};
pub use config::ClientConfig;
pub use error::{ApiError, RefreshError};
pub use events::{AuthEvent, EventBus};
