//! 受保护路由的会话校验
//!
//! `transition` 是纯函数：输入当前状态与一个事件，输出下一状态和需要执行的副作用。
//! `AuthGuard` 负责读取本地会话、调用远端身份服务，并执行副作用。

use console_core::{SessionEntry, Token, UserRecord, UserType};
use console_error::{ConsoleError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::RouteConfig;
use crate::rbac::AccessPolicy;
use crate::services::AuthServices;

/// 一次路由挂载的校验请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardRequest {
    pub path: String,
    pub require_auth: bool,
    pub policy: AccessPolicy,
}

impl GuardRequest {
    pub fn protected(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            require_auth: true,
            policy: AccessPolicy::default(),
        }
    }

    pub fn public(path: impl Into<String>) -> Self {
        Self {
            require_auth: false,
            ..Self::protected(path)
        }
    }

    pub fn allow_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy.allowed_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_types(mut self, types: impl IntoIterator<Item = UserType>) -> Self {
        self.policy.allowed_types = types.into_iter().collect();
        self
    }
}

/// 认证结论的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVia {
    Memory,
    Cache,
    Remote,
    /// 身份服务不可用时的乐观放行
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Authenticated {
        user: Option<UserRecord>,
        via: AuthVia,
    },
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Initializing,
    Resolved(Resolution),
    Redirecting { to: String },
}

/// 渲染指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    Loading,
    Nothing,
    Children,
}

impl GuardState {
    pub fn render(&self, require_auth: bool) -> Render {
        match self {
            GuardState::Initializing => Render::Loading,
            GuardState::Redirecting { .. } => Render::Nothing,
            GuardState::Resolved(Resolution::Authenticated { .. }) => Render::Children,
            GuardState::Resolved(Resolution::Unauthenticated) if require_auth => Render::Nothing,
            GuardState::Resolved(Resolution::Unauthenticated) => Render::Children,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            GuardState::Resolved(Resolution::Authenticated { .. })
        )
    }

    pub fn user(&self) -> Option<&UserRecord> {
        match self {
            GuardState::Resolved(Resolution::Authenticated { user, .. }) => user.as_ref(),
            _ => None,
        }
    }

    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            GuardState::Redirecting { to } => Some(to),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    SessionFound(UserRecord),
    CacheFound(SessionEntry),
    CacheEmpty,
    IdentityConfirmed {
        user: UserRecord,
        token: Option<Token>,
    },
    /// 401/403
    IdentityRejected {
        status: u16,
    },
    /// 身份服务有响应，但不是可用的结论
    IdentityUnavailable {
        status: Option<u16>,
        cached: Option<UserRecord>,
    },
    TransportFailed {
        cached: Option<UserRecord>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEffect {
    /// 只写入内存会话
    AdoptSession(UserRecord),
    /// 写入内存会话，并在有 token 时写入缓存
    PersistSession {
        user: UserRecord,
        token: Option<Token>,
    },
    ClearSession,
    RecordPendingRedirect(String),
    CheckIdentity,
    Navigate(String),
}

/// 状态迁移
///
/// 离开 `Initializing` 之后的事件一律忽略，不产生副作用。
pub fn transition(
    state: &GuardState,
    event: GuardEvent,
    request: &GuardRequest,
    routes: &RouteConfig,
) -> (GuardState, Vec<GuardEffect>) {
    if *state != GuardState::Initializing {
        return (state.clone(), Vec::new());
    }

    match event {
        GuardEvent::SessionFound(user) => {
            authenticate(Some(user), AuthVia::Memory, request, routes, Vec::new())
        }
        GuardEvent::CacheFound(entry) => {
            let effects = vec![GuardEffect::AdoptSession(entry.user.clone())];
            authenticate(Some(entry.user), AuthVia::Cache, request, routes, effects)
        }
        GuardEvent::CacheEmpty => (GuardState::Initializing, vec![GuardEffect::CheckIdentity]),
        GuardEvent::IdentityConfirmed { user, token } => {
            let effects = vec![GuardEffect::PersistSession {
                user: user.clone(),
                token,
            }];
            authenticate(Some(user), AuthVia::Remote, request, routes, effects)
        }
        GuardEvent::IdentityRejected { .. } => {
            let effects = vec![GuardEffect::ClearSession];
            if request.require_auth {
                send_to_sign_in(request, routes, effects)
            } else {
                (GuardState::Resolved(Resolution::Unauthenticated), effects)
            }
        }
        GuardEvent::IdentityUnavailable { cached, .. } => {
            authenticate(cached, AuthVia::Degraded, request, routes, Vec::new())
        }
        GuardEvent::TransportFailed { cached } => match (request.require_auth, cached) {
            (true, Some(user)) => {
                authenticate(Some(user), AuthVia::Degraded, request, routes, Vec::new())
            }
            (true, None) => send_to_sign_in(request, routes, Vec::new()),
            (false, _) => (GuardState::Resolved(Resolution::Unauthenticated), Vec::new()),
        },
    }
}

fn authenticate(
    user: Option<UserRecord>,
    via: AuthVia,
    request: &GuardRequest,
    routes: &RouteConfig,
    mut effects: Vec<GuardEffect>,
) -> (GuardState, Vec<GuardEffect>) {
    if !request.policy.is_unrestricted() && !request.policy.permits(user.as_ref()) {
        if user.is_none() {
            return send_to_sign_in(request, routes, effects);
        }
        let to = routes.default_dashboard(user.as_ref()).to_string();
        effects.push(GuardEffect::Navigate(to.clone()));
        return (GuardState::Redirecting { to }, effects);
    }
    (
        GuardState::Resolved(Resolution::Authenticated { user, via }),
        effects,
    )
}

fn send_to_sign_in(
    request: &GuardRequest,
    routes: &RouteConfig,
    mut effects: Vec<GuardEffect>,
) -> (GuardState, Vec<GuardEffect>) {
    effects.push(GuardEffect::RecordPendingRedirect(request.path.clone()));
    effects.push(GuardEffect::Navigate(routes.sign_in.clone()));
    (
        GuardState::Redirecting {
            to: routes.sign_in.clone(),
        },
        effects,
    )
}

/// 上一次远端校验的结论，以及它已经执行过的副作用
#[derive(Debug, Clone)]
struct SharedCheck {
    event: GuardEvent,
    applied: Vec<GuardEffect>,
}

impl SharedCheck {
    /// 清理会话与记录回跳只做一次，相同的跳转不重复
    fn covers(&self, effect: &GuardEffect) -> bool {
        self.applied.iter().any(|done| match (done, effect) {
            (GuardEffect::ClearSession, GuardEffect::ClearSession) => true,
            (GuardEffect::RecordPendingRedirect(_), GuardEffect::RecordPendingRedirect(_)) => true,
            (done, effect) => done == effect,
        })
    }
}

/// 事件的来源
enum Origin {
    Local,
    /// 本次挂载自己发起的远端校验
    Remote(GuardEvent),
    /// 等待期间由其他挂载完成的校验
    Joined(SharedCheck),
}

/// 会话校验器
///
/// 同一时刻只有一次远端校验在进行。排队的挂载拿到锁后先重读内存会话；
/// 等待期间有校验完成时直接复用它的结论，不再访问身份服务，
/// 也不重复它已经执行过的副作用。
pub struct AuthGuard {
    services: AuthServices,
    in_flight: Mutex<Option<SharedCheck>>,
    completed: AtomicU64,
}

impl AuthGuard {
    pub fn new(services: AuthServices) -> Self {
        Self {
            services,
            in_flight: Mutex::new(None),
            completed: AtomicU64::new(0),
        }
    }

    pub fn services(&self) -> &AuthServices {
        &self.services
    }

    /// 校验一次路由挂载
    ///
    /// 取消后返回 `Cancelled`，不写会话、不跳转。
    pub async fn verify(
        &self,
        request: &GuardRequest,
        cancel: &CancellationToken,
    ) -> Result<GuardState> {
        let check_id = Uuid::new_v4();
        let span = info_span!(
            "auth_guard",
            %check_id,
            path = %request.path,
            require_auth = request.require_auth
        );
        self.run(request, cancel).instrument(span).await
    }

    async fn run(&self, request: &GuardRequest, cancel: &CancellationToken) -> Result<GuardState> {
        // token 必须先于 store.get() 读取，残缺缓存会被 get() 清除
        let token = self.services.store.token();
        let mut event = self.local_event();
        let mut origin = Origin::Local;
        let mut state = GuardState::Initializing;
        // 持有到远端结论的副作用执行完毕
        let mut slot: Option<MutexGuard<'_, Option<SharedCheck>>> = None;

        loop {
            if cancel.is_cancelled() {
                debug!("校验已取消");
                return Err(ConsoleError::cancelled("auth_guard"));
            }
            let (next, effects) = transition(&state, event, request, &self.services.routes);
            state = next;

            let mut check_identity = false;
            let mut applied = Vec::new();
            for effect in effects {
                match effect {
                    GuardEffect::CheckIdentity => check_identity = true,
                    other => {
                        if let Origin::Joined(shared) = &origin {
                            if shared.covers(&other) {
                                debug!(effect = ?other, "副作用已由并发校验执行");
                                continue;
                            }
                        }
                        self.apply(other.clone());
                        applied.push(other);
                    }
                }
            }
            if let Origin::Remote(checked) = std::mem::replace(&mut origin, Origin::Local) {
                if let Some(guard) = slot.as_mut() {
                    **guard = Some(SharedCheck {
                        event: checked,
                        applied,
                    });
                    self.completed.fetch_add(1, Ordering::SeqCst);
                }
            }
            if !check_identity {
                break;
            }

            let seen = self.completed.load(Ordering::SeqCst);
            let guard = tokio::select! {
                _ = cancel.cancelled() => return Err(ConsoleError::cancelled("identity_check")),
                guard = self.in_flight.lock() => guard,
            };
            let joined = if self.completed.load(Ordering::SeqCst) != seen {
                guard.clone()
            } else {
                None
            };
            (event, origin) = match (self.services.session.get(), joined) {
                (Some(user), _) => {
                    debug!("复用并发校验写入的会话");
                    (GuardEvent::SessionFound(user), Origin::Local)
                }
                (None, Some(shared)) => {
                    debug!(event = ?shared.event, "复用并发校验的结论");
                    (shared.event.clone(), Origin::Joined(shared))
                }
                (None, None) => {
                    let checked = self.check_identity(token.clone(), cancel).await?;
                    (checked.clone(), Origin::Remote(checked))
                }
            };
            slot = Some(guard);
        }

        match &state {
            GuardState::Redirecting { to } => info!(to = %to, "跳转"),
            other => debug!(state = ?other, "校验完成"),
        }
        Ok(state)
    }

    fn local_event(&self) -> GuardEvent {
        if let Some(user) = self.services.session.get() {
            return GuardEvent::SessionFound(user);
        }
        match self.services.store.get() {
            Some(entry) => GuardEvent::CacheFound(entry),
            None => GuardEvent::CacheEmpty,
        }
    }

    /// 降级时可用的用户：内存优先，其次缓存
    fn cached_user(&self) -> Option<UserRecord> {
        self.services
            .session
            .get()
            .or_else(|| self.services.store.get().map(|entry| entry.user))
    }

    async fn check_identity(
        &self,
        token: Option<Token>,
        cancel: &CancellationToken,
    ) -> Result<GuardEvent> {
        let token = token.or_else(|| self.services.store.token());
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ConsoleError::cancelled("identity_check")),
            result = self.services.identity.current_user(token.as_ref()) => result,
        };

        let event = match result {
            Ok(user) => GuardEvent::IdentityConfirmed { user, token },
            Err(ConsoleError::SessionExpired { status }) => {
                info!(status, "身份校验被拒绝，清除会话");
                GuardEvent::IdentityRejected { status }
            }
            Err(e @ ConsoleError::Network { .. }) => {
                e.log("auth_guard");
                GuardEvent::TransportFailed {
                    cached: self.cached_user(),
                }
            }
            Err(e) => {
                e.log("auth_guard");
                GuardEvent::IdentityUnavailable {
                    status: e.http_status(),
                    cached: self.cached_user(),
                }
            }
        };
        Ok(event)
    }

    fn apply(&self, effect: GuardEffect) {
        match effect {
            GuardEffect::AdoptSession(user) => self.services.session.set(Some(user)),
            GuardEffect::PersistSession { user, token } => {
                match &token {
                    Some(token) => {
                        if let Err(e) = self.services.store.set(&user, token) {
                            e.log("auth_guard");
                        }
                    }
                    None => debug!("没有 token，会话只保存在内存中"),
                }
                self.services.session.confirm(user);
            }
            GuardEffect::ClearSession => {
                self.services.store.clear();
                self.services.session.clear();
            }
            GuardEffect::RecordPendingRedirect(path) => self.services.pending.record(&path),
            GuardEffect::Navigate(to) => self.services.navigator.push(&to),
            GuardEffect::CheckIdentity => {}
        }
    }

    /// 在后台校验一次挂载；卸载（或丢弃句柄）即取消
    pub fn mount(self: &Arc<Self>, request: GuardRequest) -> GuardMount {
        let cancel = CancellationToken::new();
        let guard = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move { guard.verify(&request, &token).await });
        GuardMount { cancel, task }
    }
}

/// 一次挂载的句柄
pub struct GuardMount {
    cancel: CancellationToken,
    task: JoinHandle<Result<GuardState>>,
}

impl GuardMount {
    pub fn unmount(&self) {
        self.cancel.cancel();
    }

    pub async fn resolved(mut self) -> Result<GuardState> {
        let task = &mut self.task;
        task.await.map_err(|e| ConsoleError::Internal {
            message: "auth guard task failed".to_string(),
            details: Some(e.to_string()),
        })?
    }
}

impl Drop for GuardMount {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{NavigationKind, Navigator};
    use crate::test_support::{admin, client_admin, client_user, token, Harness, ScriptedIdentity};
    use crate::store::KeyValueStorage;

    fn routes() -> RouteConfig {
        RouteConfig::default()
    }

    async fn wait_for_me_calls(identity: &ScriptedIdentity, n: usize) {
        while identity.me_calls() < n {
            tokio::task::yield_now().await;
        }
    }

    // ========== 纯状态迁移 ==========

    #[test]
    fn test_cache_empty_asks_for_identity_check() {
        let (state, effects) = transition(
            &GuardState::Initializing,
            GuardEvent::CacheEmpty,
            &GuardRequest::protected("/users"),
            &routes(),
        );
        assert_eq!(state, GuardState::Initializing);
        assert_eq!(effects, vec![GuardEffect::CheckIdentity]);
    }

    #[test]
    fn test_events_after_resolution_are_ignored() {
        let resolved = GuardState::Resolved(Resolution::Unauthenticated);
        let (state, effects) = transition(
            &resolved,
            GuardEvent::SessionFound(admin()),
            &GuardRequest::protected("/users"),
            &routes(),
        );
        assert_eq!(state, resolved);
        assert!(effects.is_empty());

        let redirecting = GuardState::Redirecting {
            to: "/signin".to_string(),
        };
        let (state, effects) = transition(
            &redirecting,
            GuardEvent::IdentityRejected { status: 401 },
            &GuardRequest::protected("/users"),
            &routes(),
        );
        assert_eq!(state, redirecting);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_transport_failure_paths() {
        let protected = GuardRequest::protected("/users");
        let (state, _) = transition(
            &GuardState::Initializing,
            GuardEvent::TransportFailed {
                cached: Some(admin()),
            },
            &protected,
            &routes(),
        );
        assert_eq!(
            state,
            GuardState::Resolved(Resolution::Authenticated {
                user: Some(admin()),
                via: AuthVia::Degraded
            })
        );

        let (state, effects) = transition(
            &GuardState::Initializing,
            GuardEvent::TransportFailed { cached: None },
            &protected,
            &routes(),
        );
        assert_eq!(state.redirect_target(), Some("/signin"));
        assert_eq!(
            effects,
            vec![
                GuardEffect::RecordPendingRedirect("/users".to_string()),
                GuardEffect::Navigate("/signin".to_string())
            ]
        );

        let (state, effects) = transition(
            &GuardState::Initializing,
            GuardEvent::TransportFailed {
                cached: Some(admin()),
            },
            &GuardRequest::public("/"),
            &routes(),
        );
        assert_eq!(state, GuardState::Resolved(Resolution::Unauthenticated));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_degraded_without_user_on_gated_route_records_return_path() {
        let request = GuardRequest::protected("/users").allow_types([UserType::Admin]);
        let (state, effects) = transition(
            &GuardState::Initializing,
            GuardEvent::IdentityUnavailable {
                status: Some(500),
                cached: None,
            },
            &request,
            &routes(),
        );
        assert_eq!(state.redirect_target(), Some("/signin"));
        assert_eq!(
            effects,
            vec![
                GuardEffect::RecordPendingRedirect("/users".to_string()),
                GuardEffect::Navigate("/signin".to_string())
            ]
        );
    }

    #[test]
    fn test_render_instructions() {
        assert_eq!(GuardState::Initializing.render(true), Render::Loading);
        assert_eq!(
            GuardState::Redirecting {
                to: "/signin".to_string()
            }
            .render(false),
            Render::Nothing
        );
        let anonymous = GuardState::Resolved(Resolution::Unauthenticated);
        assert_eq!(anonymous.render(true), Render::Nothing);
        assert_eq!(anonymous.render(false), Render::Children);
        let degraded = GuardState::Resolved(Resolution::Authenticated {
            user: None,
            via: AuthVia::Degraded,
        });
        assert_eq!(degraded.render(true), Render::Children);
    }

    // ========== 驱动 ==========

    #[tokio::test]
    async fn test_rejected_identity_redirects_to_sign_in() {
        let h = Harness::new(ScriptedIdentity::new(), "/users");
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(&GuardRequest::protected("/users"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.redirect_target(), Some("/signin"));
        assert_eq!(state.render(true), Render::Nothing);
        assert_eq!(h.identity.me_calls(), 1);
        assert_eq!(h.services.pending.peek().as_deref(), Some("/users"));
        assert_eq!(h.history.current_path(), "/signin");
    }

    #[tokio::test]
    async fn test_valid_cache_skips_network() {
        let h = Harness::new(ScriptedIdentity::new(), "/campaigns");
        let user = client_user(&["view:campaigns"]);
        h.services.store.set(&user, &token("t-1")).unwrap();
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(&GuardRequest::protected("/campaigns"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            state,
            GuardState::Resolved(Resolution::Authenticated {
                user: Some(user.clone()),
                via: AuthVia::Cache
            })
        );
        assert_eq!(h.identity.me_calls(), 0);
        assert_eq!(h.services.session.get(), Some(user));
        assert!(h.history.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_memory_session_wins() {
        let h = Harness::new(ScriptedIdentity::new(), "/dashboard");
        h.services.session.set(Some(admin()));
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(&GuardRequest::protected("/dashboard"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            state,
            GuardState::Resolved(Resolution::Authenticated {
                via: AuthVia::Memory,
                ..
            })
        ));
        assert_eq!(h.identity.me_calls(), 0);
    }

    #[tokio::test]
    async fn test_orphan_token_rejected_with_403() {
        let identity =
            ScriptedIdentity::new().with_me(Err(ConsoleError::SessionExpired { status: 403 }));
        let h = Harness::new(identity, "/client-admin/campaigns");
        h.local.set_item("auth_token", "stale").unwrap();
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(
                &GuardRequest::protected("/client-admin/campaigns"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(h.identity.seen_tokens(), vec![Some(token("stale"))]);
        assert!(h.local.is_empty());
        assert!(h.services.session.get().is_none());
        assert_eq!(
            h.services.pending.peek().as_deref(),
            Some("/client-admin/campaigns")
        );
        assert_eq!(state.redirect_target(), Some("/signin"));
    }

    #[tokio::test]
    async fn test_remote_confirmation_persists_pair() {
        let identity = ScriptedIdentity::new().with_me(Ok(client_admin()));
        let h = Harness::new(identity, "/client-admin/users");
        h.local.set_item("auth_token", "t-9").unwrap();
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(
                &GuardRequest::protected("/client-admin/users"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(state.user(), Some(&client_admin()));
        let entry = h.services.store.get().unwrap();
        assert_eq!(entry.user, client_admin());
        assert_eq!(entry.token, token("t-9"));
        assert!(h.services.session.verified_at().is_some());
    }

    #[tokio::test]
    async fn test_public_route_without_session_renders_children() {
        let identity =
            ScriptedIdentity::new().with_me(Err(ConsoleError::network("connect", "refused")));
        let h = Harness::new(identity, "/");
        let guard = AuthGuard::new(h.services.clone());

        let request = GuardRequest::public("/");
        let state = guard.verify(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(state, GuardState::Resolved(Resolution::Unauthenticated));
        assert_eq!(state.render(request.require_auth), Render::Children);
        assert!(h.history.navigations().is_empty());
        assert_eq!(h.services.pending.peek(), None);
    }

    #[tokio::test]
    async fn test_server_error_degrades_optimistically() {
        let identity = ScriptedIdentity::new().with_me(Err(ConsoleError::Server {
            status: 500,
            message: "boom".to_string(),
        }));
        let h = Harness::new(identity, "/users");
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(&GuardRequest::protected("/users"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            state,
            GuardState::Resolved(Resolution::Authenticated {
                user: None,
                via: AuthVia::Degraded
            })
        );
        assert!(h.services.session.verified_at().is_none());
        assert!(h.history.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_without_cache_redirects() {
        let identity =
            ScriptedIdentity::new().with_me(Err(ConsoleError::network("timeout", "slow")));
        let h = Harness::new(identity, "/reports");
        let guard = AuthGuard::new(h.services.clone());

        let state = guard
            .verify(&GuardRequest::protected("/reports"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.redirect_target(), Some("/signin"));
        assert_eq!(h.services.pending.peek().as_deref(), Some("/reports"));
    }

    #[tokio::test]
    async fn test_type_gate_redirects_to_own_dashboard() {
        let h = Harness::new(ScriptedIdentity::new(), "/users");
        h.services.session.set(Some(client_user(&[])));
        let guard = AuthGuard::new(h.services.clone());

        let request = GuardRequest::protected("/users").allow_types([UserType::Admin]);
        let state = guard.verify(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(state.redirect_target(), Some("/client-admin/dashboard"));
        let navigations = h.history.navigations();
        assert_eq!(navigations.len(), 1);
        assert_eq!(navigations[0].kind, NavigationKind::Push);
        assert_eq!(navigations[0].path, "/client-admin/dashboard");
    }

    #[tokio::test]
    async fn test_role_gate() {
        let h = Harness::new(ScriptedIdentity::new(), "/client-admin/users");
        h.services.session.set(Some(admin()));
        let guard = AuthGuard::new(h.services.clone());

        let request = GuardRequest::protected("/client-admin/users").allow_roles(["client_admin"]);
        let state = guard.verify(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(state.redirect_target(), Some("/dashboard"));

        h.services.session.set(Some(client_admin()));
        let state = guard.verify(&request, &CancellationToken::new()).await.unwrap();
        assert!(state.is_authenticated());
    }

    #[tokio::test]
    async fn test_concurrent_mounts_share_one_identity_check() {
        let identity = ScriptedIdentity::new().with_me(Ok(admin())).gated();
        let h = Harness::new(identity, "/dashboard");
        let guard = Arc::new(AuthGuard::new(h.services.clone()));

        let first = guard.mount(GuardRequest::protected("/dashboard"));
        let second = guard.mount(GuardRequest::protected("/users"));
        wait_for_me_calls(&h.identity, 1).await;
        h.identity.release(1);

        let first = first.resolved().await.unwrap();
        let second = second.resolved().await.unwrap();
        assert!(first.is_authenticated());
        assert!(second.is_authenticated());
        assert_eq!(h.identity.me_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_mounts_share_one_rejection() {
        let identity = ScriptedIdentity::new().gated();
        let h = Harness::new(identity, "/dashboard");
        h.local.set_item("auth_token", "t-stale").unwrap();
        let guard = Arc::new(AuthGuard::new(h.services.clone()));

        let first = guard.mount(GuardRequest::protected("/dashboard"));
        let second = guard.mount(GuardRequest::protected("/users"));
        wait_for_me_calls(&h.identity, 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        h.identity.release(2);

        let first = first.resolved().await.unwrap();
        let second = second.resolved().await.unwrap();
        assert_eq!(first.redirect_target(), Some("/signin"));
        assert_eq!(second.redirect_target(), Some("/signin"));
        assert_eq!(h.identity.me_calls(), 1);

        let navigations = h.history.navigations();
        assert_eq!(navigations.len(), 1);
        assert_eq!(navigations[0].kind, NavigationKind::Push);
        assert_eq!(navigations[0].path, "/signin");
        assert_eq!(h.services.pending.peek().as_deref(), Some("/dashboard"));
        assert!(h.local.is_empty());

        // 之后的挂载重新校验
        let state = guard
            .verify(&GuardRequest::protected("/users"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.redirect_target(), Some("/signin"));
        assert_eq!(h.identity.me_calls(), 2);
    }

    #[tokio::test]
    async fn test_negative_identity_body_keeps_session() {
        use crate::config::{ApiConfig, ConsoleConfig};
        use crate::history::MemoryHistory;
        use crate::identity::HttpIdentityClient;
        use crate::store::MemoryStorage;
        use axum::routing::get;
        use axum::{Json, Router};

        let router = Router::new().route(
            "/api/admin_users/me",
            get(|| async { Json(serde_json::json!({"success": false})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = ConsoleConfig {
            api: ApiConfig {
                base_url: format!("http://{}", addr),
                ..ApiConfig::default()
            },
            ..ConsoleConfig::default()
        };
        let local = MemoryStorage::new();
        local.set_item("auth_token", "t-live").unwrap();
        let history = MemoryHistory::new("/client-admin/campaigns");
        let services = AuthServices::from_config(
            &config,
            Arc::new(local.clone()),
            Arc::new(MemoryStorage::new()),
            Arc::new(HttpIdentityClient::new(config.api.clone())),
            Arc::new(history.clone()),
        );
        let guard = AuthGuard::new(services);

        let state = guard
            .verify(
                &GuardRequest::protected("/client-admin/campaigns"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            state,
            GuardState::Resolved(Resolution::Authenticated {
                user: None,
                via: AuthVia::Degraded
            })
        );
        assert_eq!(local.get_item("auth_token").unwrap().as_deref(), Some("t-live"));
        assert!(history.navigations().is_empty());
        assert_eq!(history.current_path(), "/client-admin/campaigns");
    }

    #[tokio::test]
    async fn test_cancelled_check_mutates_nothing() {
        let identity = ScriptedIdentity::new().with_me(Ok(admin())).gated();
        let h = Harness::new(identity, "/users");
        let guard = Arc::new(AuthGuard::new(h.services.clone()));

        let mount = guard.mount(GuardRequest::protected("/users"));
        wait_for_me_calls(&h.identity, 1).await;
        mount.unmount();

        let err = mount.resolved().await.unwrap_err();
        assert_eq!(err, ConsoleError::cancelled("identity_check"));
        assert!(h.services.session.get().is_none());
        assert!(h.local.is_empty());
        assert_eq!(h.services.pending.peek(), None);
        assert!(h.history.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::new(ScriptedIdentity::new(), "/users");
        let guard = AuthGuard::new(h.services.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = guard
            .verify(&GuardRequest::protected("/users"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Cancelled { .. }));
        assert_eq!(h.identity.me_calls(), 0);
        assert!(h.history.navigations().is_empty());
    }
}
