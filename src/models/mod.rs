//! 数据模型

pub mod auth;

pub use auth::{AuthResponse, LoginRequest, MeResponse, RefreshTokenResponse, RegisterRequest, User};
