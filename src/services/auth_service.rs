//! 认证服务：登录、注册、获取当前用户、登出

use crate::{
    client::{ApiClient, ApiRequest},
    error::Result,
    events::AuthEvent,
    models::auth::{AuthResponse, LoginRequest, MeResponse, RegisterRequest, User},
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthService {
    client: ApiClient,
}

impl AuthService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// 用户登录
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse> {
        let resp: AuthResponse = self
            .client
            .request_json(ApiRequest::post("/auth/login").json(&req.to_body())?)
            .await?;

        self.persist_session(&resp);
        info!(email = %req.email, "Logged in");
        Ok(resp)
    }

    /// 注册新账户（成功后即为登录状态）
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse> {
        let resp: AuthResponse = self
            .client
            .request_json(ApiRequest::post("/auth/register").json(&req.to_body())?)
            .await?;

        self.persist_session(&resp);
        info!(email = %req.email, "Account registered");
        Ok(resp)
    }

    /// 获取当前用户并覆盖本地缓存
    pub async fn me(&self) -> Result<User> {
        let resp: MeResponse = self.client.get("/auth/me").await?;
        let user = resp.into_user();
        self.client.storage().set_user(&user);
        Ok(user)
    }

    /// 登出
    ///
    /// 服务端登出失败只记录日志，本地会话总是被清除。
    pub async fn logout(&self) {
        if self.client.storage().is_authenticated() {
            if let Err(e) = self
                .client
                .send(ApiRequest::post("/auth/logout"))
                .await
            {
                warn!("Server-side logout failed: {}", e);
            }
        }

        self.client.storage().clear_auth();
        self.client.clear_session_cookie();
        self.client.events().publish(AuthEvent::LoggedOut);
        info!("Logged out");
    }

    /// 本地缓存的用户（非权威）
    pub fn current_user(&self) -> Option<User> {
        self.client.storage().get_user()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.storage().is_authenticated()
    }

    fn persist_session(&self, resp: &AuthResponse) {
        let storage = self.client.storage();
        storage.set_tokens(&resp.access_token, Some(&resp.refresh_token));
        if let Some(user) = &resp.user {
            storage.set_user(user);
        }
        self.client.set_session_cookie(&resp.access_token);
        self.client.events().publish(AuthEvent::LoggedIn);
    }
}
