use chrono::{DateTime, Utc};
use console_core::{Credentials, LoginGrant, LoginRoute, UserRecord};
use console_error::{ConsoleError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::services::AuthServices;
use crate::store::SessionStore;

/// 进程内的当前用户，所有页面共享同一份
///
/// 变更通过 watch 通道广播，订阅者总能读到最新值。
pub struct UserSession {
    tx: watch::Sender<Option<UserRecord>>,
    verified_at: RwLock<Option<DateTime<Utc>>>,
    hydrated: AtomicBool,
}

impl Default for UserSession {
    fn default() -> Self {
        Self::new()
    }
}

impl UserSession {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            verified_at: RwLock::new(None),
            hydrated: AtomicBool::new(false),
        }
    }

    pub fn get(&self) -> Option<UserRecord> {
        self.tx.borrow().clone()
    }

    pub fn is_present(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// 没有 userId 的记录按“无会话”处理
    pub fn set(&self, user: Option<UserRecord>) {
        let user = user.filter(UserRecord::is_authenticated);
        if user.is_none() {
            self.write_verified_at(None);
        }
        self.tx.send_replace(user);
    }

    /// 写入经过远端确认的用户
    pub fn confirm(&self, user: UserRecord) {
        self.set(Some(user));
        if self.is_present() {
            self.write_verified_at(Some(Utc::now()));
        }
    }

    pub fn clear(&self) {
        self.set(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserRecord>> {
        self.tx.subscribe()
    }

    /// 最近一次远端确认的时间；降级放行或纯缓存命中时保持不变
    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at.read().ok().and_then(|at| *at)
    }

    fn write_verified_at(&self, at: Option<DateTime<Utc>>) {
        if let Ok(mut slot) = self.verified_at.write() {
            *slot = at;
        }
    }

    /// 启动时从缓存恢复一次，之后的调用不再读取缓存
    ///
    /// 返回本次调用是否恢复出了用户。
    pub fn hydrate(&self, store: &dyn SessionStore) -> bool {
        if self.hydrated.swap(true, Ordering::SeqCst) {
            return false;
        }
        match store.get() {
            Some(entry) => {
                debug!(user_id = %entry.user.user_id(), "从缓存恢复会话");
                self.set(Some(entry.user));
                self.is_present()
            }
            None => false,
        }
    }
}

/// 登录成功后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub user: UserRecord,
    pub destination: String,
}

/// 会话服务：登录、登出与资料刷新
pub struct SessionService {
    services: AuthServices,
}

impl SessionService {
    pub fn new(services: AuthServices) -> Self {
        Self { services }
    }

    pub fn bootstrap(&self) -> bool {
        self.services.session.hydrate(self.services.store.as_ref())
    }

    /// 依次尝试管理员登录与客户用户登录
    ///
    /// 两条路径都失败时会话保持不变，返回最后一次的错误。
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginOutcome> {
        let mut last_error = None;
        for route in LoginRoute::SEQUENCE {
            match self.services.identity.login(route, credentials).await {
                Ok(grant) => return self.complete_login(route, grant),
                Err(e) => {
                    debug!(route = ?route, error = %e, "登录路径未通过");
                    last_error = Some(e);
                }
            }
        }
        let error = last_error.unwrap_or_else(|| ConsoleError::InvalidCredentials {
            message: String::new(),
        });
        error.log("session_service");
        Err(error)
    }

    fn complete_login(&self, route: LoginRoute, grant: LoginGrant) -> Result<LoginOutcome> {
        self.services.store.set(&grant.user, &grant.token)?;
        self.services.session.confirm(grant.user.clone());

        let routes = &self.services.routes;
        let destination = self
            .services
            .pending
            .take()
            .filter(|path| !routes.is_public_only(path))
            .unwrap_or_else(|| routes.default_dashboard(Some(&grant.user)).to_string());
        self.services.navigator.push(&destination);

        info!(
            user_id = %grant.user.user_id(),
            user_type = %grant.user.user_type(),
            route = ?route,
            destination = %destination,
            "登录成功"
        );
        Ok(LoginOutcome {
            user: grant.user,
            destination,
        })
    }

    /// 登出：远端失败不影响本地清理
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let token = self.services.store.token();
        if let Err(e) = self.services.identity.logout(token.as_ref()).await {
            warn!(error = %e, "远端登出失败，继续清理本地会话");
        }
        self.services.store.clear();
        self.services.session.clear();
        self.services.pending.clear();
        self.services.navigator.push(&self.services.routes.sign_in);
        info!("已登出");
    }

    /// 资料编辑后覆盖当前用户，token 保持不变
    pub fn refresh_profile(&self, user: UserRecord) -> Result<()> {
        if !user.is_authenticated() {
            return Err(ConsoleError::Internal {
                message: "profile refresh without userId".to_string(),
                details: None,
            });
        }
        match self.services.store.token() {
            Some(token) => self.services.store.set(&user, &token)?,
            None => debug!("没有 token，只更新内存中的会话"),
        }
        self.services.session.set(Some(user));
        Ok(())
    }
}
