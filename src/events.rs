//! 认证事件
//! 会话状态变化的广播（登录、登出、刷新、会话失效）

use tokio::sync::broadcast;

/// 认证事件类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// 登录或注册成功
    LoggedIn,
    /// 主动登出
    LoggedOut,
    /// 访问令牌已刷新
    TokenRefreshed,
    /// 刷新失败，会话已清除，界面应跳转到登录页
    SessionExpired { redirect_to: String },
}

impl AuthEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::LoggedIn => "logged_in",
            AuthEvent::LoggedOut => "logged_out",
            AuthEvent::TokenRefreshed => "token_refreshed",
            AuthEvent::SessionExpired { .. } => "session_expired",
        }
    }
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件；没有订阅者时直接丢弃
    pub fn publish(&self, event: AuthEvent) {
        let event_type = event.event_type();
        if self.sender.send(event).is_err() {
            tracing::trace!(event_type, "No auth event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(AuthEvent::SessionExpired {
            redirect_to: "/login".to_string(),
        });

        assert_eq!(
            rx.recv().await.unwrap(),
            AuthEvent::SessionExpired {
                redirect_to: "/login".to_string()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(AuthEvent::LoggedOut);
    }
}
