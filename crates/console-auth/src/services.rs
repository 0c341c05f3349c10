use std::sync::Arc;

use crate::config::{ConsoleConfig, RouteConfig};
use crate::history::Navigator;
use crate::identity::{HttpIdentityClient, IdentityClient};
use crate::session::UserSession;
use crate::store::{KeyValueStorage, PendingRedirect, SessionStore, StorageSessionStore};

/// 认证组件共享的依赖
#[derive(Clone)]
pub struct AuthServices {
    pub session: Arc<UserSession>,
    pub store: Arc<dyn SessionStore>,
    pub pending: Arc<PendingRedirect>,
    pub identity: Arc<dyn IdentityClient>,
    pub navigator: Arc<dyn Navigator>,
    pub routes: RouteConfig,
}

impl AuthServices {
    pub fn new(
        session: Arc<UserSession>,
        store: Arc<dyn SessionStore>,
        pending: Arc<PendingRedirect>,
        identity: Arc<dyn IdentityClient>,
        navigator: Arc<dyn Navigator>,
        routes: RouteConfig,
    ) -> Self {
        Self {
            session,
            store,
            pending,
            identity,
            navigator,
            routes,
        }
    }

    /// 按配置组装：持久存储放会话缓存，会话级存储放登录后跳转目标
    pub fn from_config(
        config: &ConsoleConfig,
        local: Arc<dyn KeyValueStorage>,
        session_scoped: Arc<dyn KeyValueStorage>,
        identity: Arc<dyn IdentityClient>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::new(
            Arc::new(UserSession::new()),
            Arc::new(StorageSessionStore::new(local, config.storage.clone())),
            Arc::new(PendingRedirect::new(
                session_scoped,
                config.storage.pending_redirect.clone(),
            )),
            identity,
            navigator,
            config.routes.clone(),
        )
    }

    /// 使用 HTTP 身份服务
    pub fn with_http(
        config: &ConsoleConfig,
        local: Arc<dyn KeyValueStorage>,
        session_scoped: Arc<dyn KeyValueStorage>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let identity = Arc::new(HttpIdentityClient::new(config.api.clone()));
        Self::from_config(config, local, session_scoped, identity, navigator)
    }
}
