//! 测试用的用户样例与脚本化的身份服务

use async_trait::async_trait;
use console_core::{
    AdminUser, ClientUser, Credentials, LoginGrant, LoginRoute, Token, UserProfile, UserRecord,
};
use console_error::{ConsoleError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::config::ConsoleConfig;
use crate::history::MemoryHistory;
use crate::identity::IdentityClient;
use crate::services::AuthServices;
use crate::store::MemoryStorage;

fn profile(user_id: &str, role: &str) -> UserProfile {
    UserProfile {
        user_id: user_id.to_string(),
        email: format!("{}@example.com", role),
        display_name: role.to_string(),
        role: role.to_string(),
        avatar_url: None,
    }
}

pub fn admin() -> UserRecord {
    UserRecord::Admin(AdminUser {
        profile: profile("1", "admin"),
        company_name: None,
    })
}

pub fn client_admin() -> UserRecord {
    UserRecord::Client(ClientUser {
        profile: profile("100", "client_admin"),
        client_id: "100".to_string(),
        permissions: None,
    })
}

pub fn client_user(permissions: &[&str]) -> UserRecord {
    UserRecord::Client(ClientUser {
        profile: profile("200", "client_user"),
        client_id: "100".to_string(),
        permissions: Some(permissions.iter().map(|p| p.to_string()).collect()),
    })
}

pub fn token(raw: &str) -> Token {
    Token::new(raw).unwrap()
}

/// 按脚本返回结果的身份服务，记录调用次数
pub struct ScriptedIdentity {
    me: Mutex<Result<UserRecord>>,
    admin_login: Mutex<Result<LoginGrant>>,
    client_login: Mutex<Result<LoginGrant>>,
    logout: Mutex<Result<()>>,
    gate: Option<Arc<Semaphore>>,
    me_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    login_calls: Mutex<Vec<LoginRoute>>,
    seen_tokens: Mutex<Vec<Option<Token>>>,
}

impl ScriptedIdentity {
    /// 默认：身份校验返回 401，两条登录路径都拒绝
    pub fn new() -> Self {
        let rejected = || ConsoleError::InvalidCredentials {
            message: "Invalid credentials".to_string(),
        };
        Self {
            me: Mutex::new(Err(ConsoleError::SessionExpired { status: 401 })),
            admin_login: Mutex::new(Err(rejected())),
            client_login: Mutex::new(Err(rejected())),
            logout: Mutex::new(Ok(())),
            gate: None,
            me_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            login_calls: Mutex::new(Vec::new()),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_me(self, result: Result<UserRecord>) -> Self {
        *self.me.lock().unwrap() = result;
        self
    }

    pub fn with_login(self, route: LoginRoute, result: Result<LoginGrant>) -> Self {
        match route {
            LoginRoute::Admin => *self.admin_login.lock().unwrap() = result,
            LoginRoute::ClientUser => *self.client_login.lock().unwrap() = result,
        }
        self
    }

    pub fn with_logout(self, result: Result<()>) -> Self {
        *self.logout.lock().unwrap() = result;
        self
    }

    /// 身份校验阻塞，直到 `release`
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn me_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> Vec<LoginRoute> {
        self.login_calls.lock().unwrap().clone()
    }

    pub fn seen_tokens(&self) -> Vec<Option<Token>> {
        self.seen_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityClient for ScriptedIdentity {
    async fn current_user(&self, token: Option<&Token>) -> Result<UserRecord> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens.lock().unwrap().push(token.cloned());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.me.lock().unwrap().clone()
    }

    async fn login(&self, route: LoginRoute, _credentials: &Credentials) -> Result<LoginGrant> {
        self.login_calls.lock().unwrap().push(route);
        match route {
            LoginRoute::Admin => self.admin_login.lock().unwrap().clone(),
            LoginRoute::ClientUser => self.client_login.lock().unwrap().clone(),
        }
    }

    async fn logout(&self, _token: Option<&Token>) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout.lock().unwrap().clone()
    }
}

/// 测试日志，`RUST_LOG` 控制级别
pub fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false).with_test_writer();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// 全内存的认证环境
pub struct Harness {
    pub services: AuthServices,
    pub local: MemoryStorage,
    pub session_storage: MemoryStorage,
    pub identity: Arc<ScriptedIdentity>,
    pub history: MemoryHistory,
}

impl Harness {
    pub fn new(identity: ScriptedIdentity, path: &str) -> Self {
        Self::with_history(identity, MemoryHistory::new(path))
    }

    pub fn with_history(identity: ScriptedIdentity, history: MemoryHistory) -> Self {
        init_tracing();
        let local = MemoryStorage::new();
        let session_storage = MemoryStorage::new();
        let identity = Arc::new(identity);
        let services = AuthServices::from_config(
            &ConsoleConfig::default(),
            Arc::new(local.clone()),
            Arc::new(session_storage.clone()),
            identity.clone(),
            Arc::new(history.clone()),
        );
        Self {
            services,
            local,
            session_storage,
            identity,
            history,
        }
    }
}
