use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use console_error::{ConsoleError as Error, Result};

/// 客户角色中视为“全权限”的角色
pub const ROLE_CLIENT_ADMIN: &str = "client_admin";
/// 客户角色中按权限集合授权的角色
pub const ROLE_CLIENT_USER: &str = "client_user";

/// 用户类型：决定默认跳转的控制台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Admin,
    Client,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::Client => "client",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(UserType::Admin),
            "client" => Ok(UserType::Client),
            other => Err(Error::Serialization {
                format: "user_type".to_string(),
                message: format!("unknown user type: {}", other),
            }),
        }
    }
}

/// 两类用户共有的字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// 平台管理员：隐式拥有所有权限
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

/// 客户组织用户
///
/// `permissions` 只对 `client_user` 生效；`client_admin` 天然拥有全部权限。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUser {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeSet<String>>,
}

/// 当前登录用户记录，以 `type` 字段区分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UserRecord {
    Admin(AdminUser),
    Client(ClientUser),
}

impl UserRecord {
    pub fn profile(&self) -> &UserProfile {
        match self {
            UserRecord::Admin(admin) => &admin.profile,
            UserRecord::Client(client) => &client.profile,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.profile().user_id
    }

    pub fn role(&self) -> &str {
        &self.profile().role
    }

    pub fn email(&self) -> &str {
        &self.profile().email
    }

    pub fn display_name(&self) -> &str {
        &self.profile().display_name
    }

    pub fn user_type(&self) -> UserType {
        match self {
            UserRecord::Admin(_) => UserType::Admin,
            UserRecord::Client(_) => UserType::Client,
        }
    }

    /// userId 为空的记录等同于“没有会话”
    pub fn is_authenticated(&self) -> bool {
        !self.user_id().trim().is_empty()
    }

    /// 仅 `client_user` 的权限集合会被使用
    pub fn scoped_permissions(&self) -> Option<&BTreeSet<String>> {
        match self {
            UserRecord::Client(client) if client.profile.role == ROLE_CLIENT_USER => {
                client.permissions.as_ref()
            }
            _ => None,
        }
    }
}

/// 不透明的 bearer token，只由远端校验
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// 空字符串不是合法 token
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// 一起持久化、一起销毁的会话缓存条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub user: UserRecord,
    pub token: Token,
}

/// 登录表单凭据
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// 两条互斥的登录路径，按顺序尝试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRoute {
    Admin,
    ClientUser,
}

impl LoginRoute {
    pub const SEQUENCE: [LoginRoute; 2] = [LoginRoute::Admin, LoginRoute::ClientUser];
}

/// 登录成功后拿到的 token 与用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub user: UserRecord,
    pub token: Token,
}

// ========== 远端接口的报文 ==========

/// `/me` 与登录接口返回的用户对象
///
/// 两个接口字段命名不一致（`roleName`/`role`、`clientId`/`client_id`），这里统一收口。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteUser {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default, rename = "companyName")]
    pub company_name: Option<String>,
    #[serde(default, alias = "roleName")]
    pub role: Option<String>,
    #[serde(default, rename = "type")]
    pub user_type: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default, rename = "clientId", alias = "client_id")]
    pub client_id: Option<serde_json::Value>,
    #[serde(default)]
    pub permissions: Option<serde_json::Value>,
}

fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RemoteUser {
    fn infer_type(&self) -> UserType {
        if let Some(explicit) = self.user_type.as_deref().and_then(|t| t.parse().ok()) {
            return explicit;
        }
        match self.role.as_deref() {
            Some(ROLE_CLIENT_ADMIN) | Some(ROLE_CLIENT_USER) => UserType::Client,
            _ => UserType::Admin,
        }
    }

    /// 转换为内部的用户记录
    pub fn into_record(self) -> Result<UserRecord> {
        let user_id = self
            .id
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| Error::Serialization {
                format: "json".to_string(),
                message: "user payload is missing `id`".to_string(),
            })?;
        let user_type = self.infer_type();
        let role = self.role.clone().unwrap_or_default();

        let display_name = self
            .name
            .clone()
            .or_else(|| self.full_name.clone())
            .or_else(|| self.company_name.clone())
            .unwrap_or_default();

        let profile = UserProfile {
            user_id,
            email: self.email.clone().unwrap_or_default(),
            display_name,
            role,
            avatar_url: self.avatar_url.clone(),
        };

        let record = match user_type {
            UserType::Admin => UserRecord::Admin(AdminUser {
                profile,
                company_name: self.company_name,
            }),
            UserType::Client => {
                let client_id = self
                    .client_id
                    .as_ref()
                    .and_then(scalar_to_string)
                    .or_else(|| {
                        // client_admin 通过客户表登录，id 即客户 id
                        (profile.role == ROLE_CLIENT_ADMIN).then(|| profile.user_id.clone())
                    })
                    .unwrap_or_default();
                let permissions = if profile.role == ROLE_CLIENT_USER {
                    Some(
                        self.permissions
                            .as_ref()
                            .and_then(|v| v.as_array())
                            .map(|items| {
                                items
                                    .iter()
                                    .filter_map(|p| p.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default(),
                    )
                } else {
                    None
                };
                UserRecord::Client(ClientUser {
                    profile,
                    client_id,
                    permissions,
                })
            }
        };
        Ok(record)
    }
}

/// `GET .../me` 响应
#[derive(Debug, Clone, Deserialize)]
pub struct MeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<RemoteUser>,
    #[serde(default)]
    pub message: Option<String>,
}

/// 登录接口响应
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<RemoteUser>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LoginResponse {
    /// token 和 user 必须同时存在，否则视为登录失败
    pub fn into_grant(self) -> Result<LoginGrant> {
        if !self.success {
            return Err(Error::InvalidCredentials {
                message: self.message.unwrap_or_default(),
            });
        }
        let token = self.token.and_then(Token::new);
        match (self.user, token) {
            (Some(user), Some(token)) => Ok(LoginGrant {
                user: user.into_record()?,
                token,
            }),
            _ => Err(Error::Serialization {
                format: "json".to_string(),
                message: "login response must carry both token and user".to_string(),
            }),
        }
    }
}
