use console_core::{UserRecord, UserType};
use console_error::{ConsoleError, Result};
use dotenv::dotenv;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// 认证子系统的全部配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub api: ApiConfig,
    pub storage: StorageKeys,
    pub routes: RouteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,          // e.g. http://localhost:5000
    pub login_path: String,        // 管理员登录
    pub client_login_path: String, // 客户用户登录
    pub logout_path: String,
    pub me_path: String, // "who am I"
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            login_path: "/api/login".to_string(),
            client_login_path: "/api/client-user/login".to_string(),
            logout_path: "/api/logout".to_string(),
            me_path: "/api/admin_users/me".to_string(),
        }
    }
}

impl ApiConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// 客户端持久化使用的存储键
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub user: String,
    pub token: String,
    pub pending_redirect: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            user: "user".to_string(),
            token: "auth_token".to_string(),
            pending_redirect: "redirectAfterLogin".to_string(),
        }
    }
}

/// 与认证相关的路由
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub sign_in: String,
    pub admin_dashboard: String,
    pub client_dashboard: String,
    /// 已登录用户不应再访问的页面
    pub public_only: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            sign_in: "/signin".to_string(),
            admin_dashboard: "/dashboard".to_string(),
            client_dashboard: "/client-admin/dashboard".to_string(),
            public_only: vec!["/signin".to_string(), "/".to_string()],
        }
    }
}

impl RouteConfig {
    /// 用户自己的默认控制台；没有用户时回到登录页
    pub fn default_dashboard(&self, user: Option<&UserRecord>) -> &str {
        match user.map(UserRecord::user_type) {
            Some(UserType::Admin) => &self.admin_dashboard,
            Some(UserType::Client) => &self.client_dashboard,
            None => &self.sign_in,
        }
    }

    pub fn is_public_only(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.public_only
            .iter()
            .any(|candidate| normalize_path(candidate) == path)
    }
}

/// 去掉查询串、片段和结尾的斜杠（根路径除外）
pub(crate) fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

impl ConsoleConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: ConsoleConfig = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从 YAML 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|e| ConsoleError::Configuration {
            key: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let cfg = Self::from_yaml_str(&s)?;
        info!(path = %path.display(), base_url = %cfg.api.base_url, "load_config");
        Ok(cfg)
    }

    /// 默认配置叠加 `.env` / 环境变量
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("CONSOLE_API_BASE_URL") {
            self.api.base_url = base_url;
        }
        if let Some(me_path) = lookup("CONSOLE_ME_PATH") {
            self.api.me_path = me_path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"))
        {
            return Err(ConsoleError::Configuration {
                key: "api.base_url".to_string(),
                reason: format!("not an http(s) url: {}", self.api.base_url),
            });
        }
        let routes = [
            ("routes.sign_in", &self.routes.sign_in),
            ("routes.admin_dashboard", &self.routes.admin_dashboard),
            ("routes.client_dashboard", &self.routes.client_dashboard),
        ];
        for (key, value) in routes {
            if !value.starts_with('/') {
                return Err(ConsoleError::Configuration {
                    key: key.to_string(),
                    reason: format!("route must be an absolute path: {}", value),
                });
            }
        }
        Ok(())
    }
}
