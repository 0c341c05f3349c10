use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::RouteConfig;
use crate::history::{NavigationObserver, Navigator, Subscription};
use crate::services::AuthServices;
use crate::session::UserSession;

/// 已登录用户访问登录页或首页时，替换到自己的控制台
///
/// 使用 replace，后退不会回到登录页。
pub struct AuthRedirect {
    session: Arc<UserSession>,
    navigator: Arc<dyn Navigator>,
    routes: RouteConfig,
}

impl AuthRedirect {
    pub fn new(services: &AuthServices) -> Self {
        Self {
            session: Arc::clone(&services.session),
            navigator: Arc::clone(&services.navigator),
            routes: services.routes.clone(),
        }
    }

    /// 返回跳转目标（如果发生了跳转）
    pub fn check(&self, path: &str) -> Option<String> {
        let user = self.session.get()?;
        if !self.routes.is_public_only(path) {
            return None;
        }
        let target = self.routes.default_dashboard(Some(&user)).to_string();
        debug!(from = %path, to = %target, "已登录，离开公开页");
        self.navigator.replace(&target);
        Some(target)
    }

    pub fn on_mount(&self) -> Option<String> {
        self.check(&self.navigator.current_path())
    }

    /// 订阅前进/后退；回调只持有弱引用
    pub fn attach(self: &Arc<Self>, observer: &dyn NavigationObserver) -> Subscription {
        let weak = Arc::downgrade(self);
        observer.on_location_change(Arc::new(move |path: &str| {
            if let Some(redirect) = weak.upgrade() {
                redirect.check(path);
            }
        }))
    }

    /// 会话变化时重新检查当前路径，直到取消
    pub async fn follow_session(self: Arc<Self>, cancel: CancellationToken) {
        let mut rx = self.session.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_mount();
                }
            }
        }
    }
}
