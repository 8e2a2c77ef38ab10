//! 令牌存储
//! 访问令牌、刷新令牌与缓存用户的持久化读写

use crate::error::StorageError;
use crate::models::auth::User;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const ACCESS_TOKEN_KEY: &str = "monetoile_access_token";
pub const REFRESH_TOKEN_KEY: &str = "monetoile_refresh_token";
pub const USER_KEY: &str = "monetoile_user";

/// 字符串键值存储后端
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// 内存存储（进程内，测试与临时会话使用）
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// 文件存储：整个键值表序列化为一个 JSON 文件
///
/// 每次写入先写临时文件再重命名，避免进程中断留下半个文件。
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// 打开（或创建）存储文件
    ///
    /// 文件内容损坏时从空表开始，而不是拒绝启动。
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), "Token store is corrupt, starting empty: {}", e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), keys = entries.len(), "Token store opened");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;

        // 令牌文件仅所有者可读写
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut entries);
        self.persist(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// 认证状态存储
///
/// 没有可用后端时（`unavailable`）所有读取返回 `None`、所有写入静默忽略。
/// 后端写入失败只记录日志，不向调用方抛出。
#[derive(Clone)]
pub struct TokenStorage {
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl std::fmt::Debug for TokenStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStorage")
            .field("available", &self.backend.is_some())
            .finish()
    }
}

impl TokenStorage {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    /// 根据配置选择文件或内存后端
    pub fn from_path(path: Option<&Path>) -> Result<Self, StorageError> {
        match path {
            Some(path) => Ok(Self::new(Arc::new(FileStore::open(path)?))),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    fn read(&self, key: &str) -> Option<String> {
        self.backend.as_ref()?.get(key)
    }

    fn write(&self, key: &str, value: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.set(key, value) {
                warn!(key, "Failed to write token store: {}", e);
            }
        }
    }

    fn delete(&self, key: &str) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.remove(key) {
                warn!(key, "Failed to remove from token store: {}", e);
            }
        }
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn set_access_token(&self, token: &str) {
        self.write(ACCESS_TOKEN_KEY, token)
    }

    pub fn remove_access_token(&self) {
        self.delete(ACCESS_TOKEN_KEY)
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.write(REFRESH_TOKEN_KEY, token)
    }

    pub fn remove_refresh_token(&self) {
        self.delete(REFRESH_TOKEN_KEY)
    }

    /// 缓存的用户信息；内容无法解析时视为不存在
    pub fn get_user(&self) -> Option<User> {
        let raw = self.read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                debug!("Cached user is not valid JSON: {}", e);
                None
            }
        }
    }

    pub fn set_user(&self, user: &User) {
        match serde_json::to_string(user) {
            Ok(raw) => self.write(USER_KEY, &raw),
            Err(e) => warn!("Failed to serialize user for cache: {}", e),
        }
    }

    pub fn remove_user(&self) {
        self.delete(USER_KEY)
    }

    /// 同时保存访问令牌与（可选的）新刷新令牌
    pub fn set_tokens(&self, access_token: &str, refresh_token: Option<&str>) {
        self.set_access_token(access_token);
        if let Some(refresh_token) = refresh_token {
            self.set_refresh_token(refresh_token);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_access_token().is_some()
    }

    /// 清除全部认证状态
    pub fn clear_auth(&self) {
        self.remove_access_token();
        self.remove_refresh_token();
        self.remove_user();
        debug!("Auth state cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        serde_json::from_value(serde_json::json!({
            "id": "u-1",
            "email": "ade@example.com",
            "firstName": "Ade",
            "role": "USER"
        }))
        .unwrap()
    }

    #[test]
    fn test_access_token_round_trip() {
        let storage = TokenStorage::in_memory();
        storage.set_access_token("abc");
        assert_eq!(storage.get_access_token().as_deref(), Some("abc"));
        assert!(storage.is_authenticated());
    }

    #[test]
    fn test_clear_auth_removes_everything() {
        let storage = TokenStorage::in_memory();
        storage.set_tokens("abc", Some("def"));
        storage.set_user(&sample_user());

        storage.clear_auth();

        assert!(storage.get_access_token().is_none());
        assert!(storage.get_refresh_token().is_none());
        assert!(storage.get_user().is_none());
        assert!(!storage.is_authenticated());
    }

    #[test]
    fn test_set_tokens_keeps_refresh_when_not_rotated() {
        let storage = TokenStorage::in_memory();
        storage.set_tokens("a1", Some("r1"));
        storage.set_tokens("a2", None);
        assert_eq!(storage.get_access_token().as_deref(), Some("a2"));
        assert_eq!(storage.get_refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_unavailable_storage_is_noop() {
        let storage = TokenStorage::unavailable();
        storage.set_access_token("abc");
        storage.set_user(&sample_user());
        assert!(!storage.is_available());
        assert!(storage.get_access_token().is_none());
        assert!(storage.get_user().is_none());
        storage.clear_auth();
    }

    #[test]
    fn test_corrupt_user_is_ignored() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(USER_KEY, "{not json").unwrap();
        let storage = TokenStorage::new(backend);
        assert!(storage.get_user().is_none());
    }

    #[test]
    fn test_user_round_trip() {
        let storage = TokenStorage::in_memory();
        storage.set_user(&sample_user());
        let user = storage.get_user().unwrap();
        assert_eq!(user.email.as_deref(), Some("ade@example.com"));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("tokens.json");

        let storage = TokenStorage::from_path(Some(&path)).unwrap();
        storage.set_tokens("abc", Some("def"));

        let reopened = TokenStorage::from_path(Some(&path)).unwrap();
        assert_eq!(reopened.get_access_token().as_deref(), Some("abc"));
        assert_eq!(reopened.get_refresh_token().as_deref(), Some("def"));

        reopened.clear_auth();
        let reopened = TokenStorage::from_path(Some(&path)).unwrap();
        assert!(reopened.get_refresh_token().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let storage = TokenStorage::from_path(Some(&path)).unwrap();
        storage.set_tokens("abc", Some("def"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"garbage").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get(ACCESS_TOKEN_KEY).is_none());
        store.set(ACCESS_TOKEN_KEY, "abc").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("abc"));
    }
}
