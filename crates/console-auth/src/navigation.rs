use console_core::UserRecord;
use serde::{Deserialize, Serialize};

use crate::config::normalize_path;
use crate::permissions::Permission;
use crate::rbac::PermissionCheck;

/// 侧边栏菜单项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavItem {
    pub href: String,
    pub label: String,
    /// 以此为前缀的路径都视为选中
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permission: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NavItem>,
}

impl NavItem {
    pub fn new(href: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            label: label.into(),
            base_path: None,
            required_permission: None,
            children: Vec::new(),
        }
    }

    /// 以自身 href 作为前缀匹配
    pub fn section(href: impl Into<String>, label: impl Into<String>) -> Self {
        let href = href.into();
        Self {
            base_path: Some(href.clone()),
            ..Self::new(href, label)
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permission = Some(permission.into());
        self
    }

    pub fn with_children(mut self, children: Vec<NavItem>) -> Self {
        self.children = children;
        self
    }

    /// 只看自身的权限标签，不看子项
    pub fn is_visible_to(&self, user: Option<&UserRecord>) -> bool {
        match &self.required_permission {
            None => true,
            Some(permission) => user.has_permission(permission),
        }
    }

    pub fn is_active(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if path == normalize_path(&self.href) {
            return true;
        }
        self.base_path.as_deref().is_some_and(|base| {
            let base = normalize_path(base);
            path.strip_prefix(base)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

/// 过滤菜单树
///
/// 每个节点独立判断；父节点可见时即使子项全部被过滤也保留。
pub fn filter_navigation(items: &[NavItem], user: Option<&UserRecord>) -> Vec<NavItem> {
    items
        .iter()
        .filter(|item| item.is_visible_to(user))
        .map(|item| NavItem {
            href: item.href.clone(),
            label: item.label.clone(),
            base_path: item.base_path.clone(),
            required_permission: item.required_permission.clone(),
            children: filter_navigation(&item.children, user),
        })
        .collect()
}

/// 平台管理员侧边栏；管理员拥有全部权限，不打标签
pub fn admin_navigation() -> Vec<NavItem> {
    vec![
        NavItem::new("/dashboard", "Dashboard"),
        NavItem::section("/clients", "Clients"),
        NavItem::section("/plans-billing", "Plans & Billing"),
        NavItem::section("/campaigns", "Campaigns"),
        NavItem::section("/ai-templates", "AI Templates"),
        NavItem::section("/reports-analytics", "Reports & Analytics"),
        NavItem::section("/developer-tools", "Developer Tools"),
        NavItem::section("/test-lab", "Test Lab"),
        NavItem::section("/alerts-logs", "Alerts & Logs"),
        NavItem::section("/system-settings", "System Settings"),
        NavItem::section("/profile", "Profile"),
    ]
}

/// 客户控制台侧边栏
pub fn client_navigation() -> Vec<NavItem> {
    vec![
        NavItem::section("/client-admin/dashboard", "Dashboard")
            .with_permission(Permission::VIEW_DASHBOARD),
        NavItem::section("/client-admin/campaigns", "My Campaigns")
            .with_permission(Permission::VIEW_CAMPAIGNS),
        NavItem::section("/client-admin/users", "Manage Users")
            .with_permission(Permission::MANAGE_USERS),
        NavItem::section("/client-admin/billing", "Billing & Invoices")
            .with_permission(Permission::VIEW_BILLING),
        NavItem::section("/client-admin/profile", "My Profile"),
    ]
}
