//! Authentication state: token storage, inspection and refresh

pub mod jwt;
pub mod refresh;
pub mod storage;

pub use jwt::{
    decode_token, is_token_expired, is_token_expiring_soon, token_time_remaining, TokenClaims,
    DEFAULT_REFRESH_BUFFER,
};
pub use refresh::{HttpRefreshTransport, RefreshCoordinator, RefreshTransport, RefreshedTokens};
pub use storage::{FileStore, KeyValueStore, MemoryStore, TokenStorage};
