//! 配置系统
//! 从默认值与环境变量（前缀 MONETOILE_）加载客户端配置

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// 后端 API 配置
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// 后端基础地址，例如 "https://api.monetoile.com"
    pub base_url: String,
    /// API 版本，拼接为 `{base_url}/api/{version}`
    pub version: String,
    /// 单个请求超时时间（秒）
    pub timeout_secs: u64,
}

/// 认证配置
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// 访问令牌剩余有效期低于该值时主动刷新（秒）
    pub refresh_buffer_secs: u64,
    /// 会话失效后跳转的登录路由
    pub login_route: String,
    /// 刷新端点（相对 API 根路径）
    pub refresh_path: String,
    /// 不附加 Authorization 头的公开路由（子串匹配）
    pub public_routes: Vec<String>,
}

/// 令牌存储配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// 持久化文件路径（未设置时使用内存存储）
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000".to_string(),
                version: "v1".to_string(),
                timeout_secs: 300,
            },
            auth: AuthConfig {
                refresh_buffer_secs: 360,
                login_route: "/login".to_string(),
                refresh_path: "/auth/refresh".to_string(),
                public_routes: default_public_routes(),
            },
            storage: StorageConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

fn default_public_routes() -> Vec<String> {
    vec![
        "/auth/login".to_string(),
        "/auth/register".to_string(),
        "/services".to_string(),
    ]
}

impl ApiConfig {
    /// API 根路径：去除末尾斜杠后拼接 `/api/{version}`
    pub fn api_root(&self) -> String {
        format!(
            "{}/api/{}",
            self.base_url.trim_end_matches('/'),
            self.version.trim_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AuthConfig {
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    /// 判断 URL 是否属于公开路由
    pub fn is_public_route(&self, url: &str) -> bool {
        self.public_routes
            .iter()
            .any(|route| !route.is_empty() && url.contains(route.as_str()))
    }
}

impl ClientConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("api.base_url", "http://localhost:8000")?
            .set_default("api.version", "v1")?
            .set_default("api.timeout_secs", 300)?
            .set_default("auth.refresh_buffer_secs", 360)?
            .set_default("auth.login_route", "/login")?
            .set_default("auth.refresh_path", "/auth/refresh")?
            .set_default("auth.public_routes", default_public_routes())?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // 从环境变量加载配置（前缀为 MONETOILE_）
            .add_source(
                Environment::with_prefix("MONETOILE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.public_routes")
                    .try_parsing(true),
            );

        let config: ClientConfig = settings.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = url::Url::parse(&self.api.base_url).map_err(|e| {
            ConfigError::Message(format!("Invalid api.base_url '{}': {}", self.api.base_url, e))
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(ConfigError::Message(format!(
                "api.base_url must use http or https, got '{}'",
                base.scheme()
            )));
        }

        if self.api.version.trim_matches('/').is_empty() {
            return Err(ConfigError::Message("api.version must not be empty".to_string()));
        }

        if self.api.timeout_secs == 0 || self.api.timeout_secs > 3600 {
            return Err(ConfigError::Message(
                "api.timeout_secs must be between 1 and 3600".to_string(),
            ));
        }

        if self.auth.refresh_buffer_secs >= 86400 {
            return Err(ConfigError::Message(
                "auth.refresh_buffer_secs must be less than 86400 (24 hours)".to_string(),
            ));
        }

        if !self.auth.login_route.starts_with('/') {
            return Err(ConfigError::Message(
                "auth.login_route must start with '/'".to_string(),
            ));
        }

        if !self.auth.refresh_path.starts_with('/') {
            return Err(ConfigError::Message(
                "auth.refresh_path must start with '/'".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "MONETOILE_API__BASE_URL",
            "MONETOILE_API__VERSION",
            "MONETOILE_API__TIMEOUT_SECS",
            "MONETOILE_AUTH__REFRESH_BUFFER_SECS",
            "MONETOILE_AUTH__PUBLIC_ROUTES",
            "MONETOILE_LOGGING__LEVEL",
            "MONETOILE_LOGGING__FORMAT",
            "MONETOILE_STORAGE__PATH",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env();

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.timeout_secs, 300);
        assert_eq!(config.auth.refresh_buffer_secs, 360);
        assert_eq!(config.auth.public_routes.len(), 3);
        assert!(config.storage.path.is_none());
    }

    #[test]
    #[serial]
    fn test_config_env_override() {
        clear_env();
        std::env::set_var("MONETOILE_API__BASE_URL", "https://api.example.com/");
        std::env::set_var("MONETOILE_AUTH__REFRESH_BUFFER_SECS", "120");
        std::env::set_var("MONETOILE_AUTH__PUBLIC_ROUTES", "/auth/login,/health");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api.api_root(), "https://api.example.com/api/v1");
        assert_eq!(config.auth.refresh_buffer_secs, 120);
        assert_eq!(
            config.auth.public_routes,
            vec!["/auth/login".to_string(), "/health".to_string()]
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_validation_invalid_log_level() {
        clear_env();
        std::env::set_var("MONETOILE_LOGGING__LEVEL", "verbose");

        assert!(ClientConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_validation_rejects_bad_base_url() {
        let mut config = ClientConfig::default();
        config.api.base_url = "ftp://files.example.com".to_string();
        assert!(config.validate().is_err());

        config.api.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let mut config = ClientConfig::default();
        config.api.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_root_strips_trailing_slashes() {
        let mut config = ClientConfig::default();
        config.api.base_url = "http://localhost:8000///".to_string();
        assert_eq!(config.api.api_root(), "http://localhost:8000/api/v1");
    }

    #[test]
    fn test_public_route_matching() {
        let config = ClientConfig::default();
        assert!(config.auth.is_public_route("http://x/api/v1/auth/login"));
        assert!(config.auth.is_public_route("/services?page=2"));
        assert!(!config.auth.is_public_route("/auth/me"));
        assert!(!config.auth.is_public_route("/consultations"));
    }
}
