use console_core::{UserRecord, UserType};
use std::collections::BTreeSet;
use tracing::info;

use crate::config::RouteConfig;
use crate::history::Navigator;
use crate::permissions::SystemRole;

/// 权限检查特质
///
/// - 平台管理员拥有全部权限
/// - 客户管理员在本租户内拥有全部权限
/// - 客户用户只拥有被授予的权限标签
/// - 其余情况（包括没有会话）一律拒绝
pub trait PermissionCheck {
    fn has_permission(&self, permission: &str) -> bool;

    fn has_any_permission(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has_permission(p))
    }

    fn has_all_permissions(&self, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has_permission(p))
    }
}

impl PermissionCheck for UserRecord {
    fn has_permission(&self, permission: &str) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        match self {
            UserRecord::Admin(_) => true,
            UserRecord::Client(client)
                if SystemRole::is_unrestricted_client_role(&client.profile.role) =>
            {
                true
            }
            // 只有 client_user 带权限集合，其他角色拿到 None
            UserRecord::Client(_) => self
                .scoped_permissions()
                .is_some_and(|granted| granted.contains(permission)),
        }
    }
}

impl PermissionCheck for Option<&UserRecord> {
    fn has_permission(&self, permission: &str) -> bool {
        self.is_some_and(|user| user.has_permission(permission))
    }
}

pub fn has_permission(user: Option<&UserRecord>, permission: &str) -> bool {
    user.has_permission(permission)
}

/// 空列表时返回 false
pub fn has_any_permission(user: Option<&UserRecord>, permissions: &[&str]) -> bool {
    user.has_any_permission(permissions)
}

/// 空列表时返回 true
pub fn has_all_permissions(user: Option<&UserRecord>, permissions: &[&str]) -> bool {
    user.has_all_permissions(permissions)
}

/// 路由级别的角色/类型限制，空集合表示不限制
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub allowed_roles: BTreeSet<String>,
    pub allowed_types: BTreeSet<UserType>,
}

impl AccessPolicy {
    pub fn is_unrestricted(&self) -> bool {
        self.allowed_roles.is_empty() && self.allowed_types.is_empty()
    }

    pub fn permits(&self, user: Option<&UserRecord>) -> bool {
        let role_ok = self.allowed_roles.is_empty()
            || user.is_some_and(|u| self.allowed_roles.contains(u.role()));
        let type_ok = self.allowed_types.is_empty()
            || user.is_some_and(|u| self.allowed_types.contains(&u.user_type()));
        role_ok && type_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { redirect_to: String },
    /// 会话尚未就绪，什么都不渲染
    Pending,
}

/// 页面级的权限守卫
#[derive(Debug, Clone)]
pub struct PermissionGuard {
    pub required_permission: String,
    pub fallback_path: String,
}

impl PermissionGuard {
    /// 默认退回客户控制台
    pub fn new(required_permission: impl Into<String>, routes: &RouteConfig) -> Self {
        Self {
            required_permission: required_permission.into(),
            fallback_path: routes.client_dashboard.clone(),
        }
    }

    pub fn with_fallback(mut self, fallback_path: impl Into<String>) -> Self {
        self.fallback_path = fallback_path.into();
        self
    }

    pub fn check(&self, user: Option<&UserRecord>) -> PermissionDecision {
        match user.filter(|u| u.is_authenticated()) {
            None => PermissionDecision::Pending,
            Some(u) if u.has_permission(&self.required_permission) => PermissionDecision::Allow,
            Some(u) => {
                info!(
                    user_id = %u.user_id(),
                    permission = %self.required_permission,
                    "权限不足，跳转到 {}",
                    self.fallback_path
                );
                PermissionDecision::Deny {
                    redirect_to: self.fallback_path.clone(),
                }
            }
        }
    }

    /// 检查并在拒绝时执行跳转
    pub fn enforce(&self, user: Option<&UserRecord>, navigator: &dyn Navigator) -> PermissionDecision {
        let decision = self.check(user);
        if let PermissionDecision::Deny { redirect_to } = &decision {
            navigator.push(redirect_to);
        }
        decision
    }
}

/// 条件渲染：按权限在两份内容之间选择，不做跳转
#[derive(Debug, Clone)]
pub struct PermissionGate {
    pub required_permission: String,
}

impl PermissionGate {
    pub fn new(required_permission: impl Into<String>) -> Self {
        Self {
            required_permission: required_permission.into(),
        }
    }

    pub fn render<T>(&self, user: Option<&UserRecord>, content: T, fallback: T) -> T {
        if user.has_permission(&self.required_permission) {
            content
        } else {
            fallback
        }
    }
}
