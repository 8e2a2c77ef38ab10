//! 测试公共模块
//! 提供测试配置、令牌生成和客户端构建

#![allow(dead_code)]

use jsonwebtoken::{encode, EncodingKey, Header};
use monetoile_client::{auth::TokenStorage, ApiClient, ClientConfig};

/// 生成 `secs` 秒后过期的 HS256 令牌（客户端不校验签名）
pub fn token_expiring_in(subject: &str, secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": subject,
        "iat": now,
        "exp": now + secs,
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret-key-for-testing-only"),
    )
    .expect("Failed to encode test token")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// 创建指向 mock 服务器的测试配置
pub fn create_test_config(base_url: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api.base_url = base_url.to_string();
    config.api.timeout_secs = 5;
    config.logging.level = "debug".to_string();
    config
}

/// 创建带有预置令牌的客户端
pub fn create_test_client(
    base_url: &str,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
) -> ApiClient {
    let storage = TokenStorage::in_memory();
    if let Some(token) = access_token {
        storage.set_access_token(token);
    }
    if let Some(token) = refresh_token {
        storage.set_refresh_token(token);
    }
    ApiClient::new(create_test_config(base_url), storage).expect("Failed to create test client")
}
