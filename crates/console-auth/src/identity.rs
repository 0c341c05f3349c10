use async_trait::async_trait;
use console_core::{Credentials, LoginGrant, LoginResponse, LoginRoute, MeResponse, Token, UserRecord};
use console_error::{ConsoleError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, instrument};

use crate::config::ApiConfig;

/// 远端身份服务
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// "who am I"；401/403 返回 `SessionExpired`
    async fn current_user(&self, token: Option<&Token>) -> Result<UserRecord>;

    async fn login(&self, route: LoginRoute, credentials: &Credentials) -> Result<LoginGrant>;

    async fn logout(&self, token: Option<&Token>) -> Result<()>;
}

// ========== HTTP 实现 ==========

#[derive(Clone)]
pub struct HttpIdentityClient {
    http: Client,
    api: ApiConfig,
}

impl HttpIdentityClient {
    pub fn new(api: ApiConfig) -> Self {
        Self {
            http: Client::new(),
            api,
        }
    }

    pub fn with_client(http: Client, api: ApiConfig) -> Self {
        Self { http, api }
    }

    fn login_path(&self, route: LoginRoute) -> &str {
        match route {
            LoginRoute::Admin => &self.api.login_path,
            LoginRoute::ClientUser => &self.api.client_login_path,
        }
    }

    /// 有 token 时带上 Bearer 头，否则依赖 cookie
    fn authorize(builder: RequestBuilder, token: Option<&Token>) -> RequestBuilder {
        match token {
            Some(token) => builder.bearer_auth(token.as_str()),
            None => builder,
        }
    }

    async fn send(operation: &str, builder: RequestBuilder) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| match ConsoleError::from(e) {
                ConsoleError::Network { message, .. } => ConsoleError::network(operation, message),
                other => other,
            })
    }

    async fn server_error(resp: Response) -> ConsoleError {
        let status = resp.status();
        let txt = resp.text().await.unwrap_or_default();
        ConsoleError::Server {
            status: status.as_u16(),
            message: format!("status={} body={}", status, txt),
        }
    }
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    #[instrument(skip(self, token), fields(has_token = token.is_some()))]
    async fn current_user(&self, token: Option<&Token>) -> Result<UserRecord> {
        let url = self.api.url(&self.api.me_path);
        let resp = Self::send("identity_check", Self::authorize(self.http.get(url), token)).await?;

        let status = resp.status();
        if is_auth_rejection(status) {
            return Err(ConsoleError::SessionExpired {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(Self::server_error(resp).await);
        }

        let body: MeResponse = resp.json().await?;
        match (body.success, body.data) {
            (true, Some(data)) => data.into_record(),
            // 只有 401/403 会清除会话，2xx 上的否定结论按服务异常处理
            _ => {
                debug!(message = ?body.message, "身份接口返回 success=false");
                Err(ConsoleError::Server {
                    status: status.as_u16(),
                    message: body
                        .message
                        .unwrap_or_else(|| "identity check returned no user".to_string()),
                })
            }
        }
    }

    #[instrument(skip(self, credentials))]
    async fn login(&self, route: LoginRoute, credentials: &Credentials) -> Result<LoginGrant> {
        let url = self.api.url(self.login_path(route));
        let resp = Self::send("login", self.http.post(url).json(credentials)).await?;

        let status = resp.status();
        if is_auth_rejection(status) {
            let txt = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<LoginResponse>(&txt)
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_default();
            return Err(ConsoleError::InvalidCredentials { message });
        }
        if !status.is_success() {
            return Err(Self::server_error(resp).await);
        }

        let body: LoginResponse = resp.json().await?;
        body.into_grant()
    }

    #[instrument(skip(self, token))]
    async fn logout(&self, token: Option<&Token>) -> Result<()> {
        let url = self.api.url(&self.api.logout_path);
        let resp = Self::send("logout", Self::authorize(self.http.post(url), token)).await?;
        if !resp.status().is_success() {
            return Err(Self::server_error(resp).await);
        }
        Ok(())
    }
}
