/// 权限定义模块
/// 客户用户可以被授予的权限标签，以及控制台识别的角色

/// 权限标签常量
pub struct Permission;

impl Permission {
    // 概览
    pub const VIEW_DASHBOARD: &'static str = "view:dashboard";

    // 活动
    pub const VIEW_CAMPAIGNS: &'static str = "view:campaigns";
    pub const MANAGE_CAMPAIGNS: &'static str = "manage:campaigns";

    // 成员
    pub const VIEW_USERS: &'static str = "view:users";
    pub const MANAGE_USERS: &'static str = "manage:users";

    // 账单与报表
    pub const VIEW_BILLING: &'static str = "view:billing";
    pub const MANAGE_BILLING: &'static str = "manage:billing";
    pub const VIEW_REPORTS: &'static str = "view:reports";

    // 个人资料
    pub const VIEW_PROFILE: &'static str = "view:profile";

    // 返回所有权限标签
    pub fn all() -> Vec<&'static str> {
        vec![
            Self::VIEW_DASHBOARD,
            Self::VIEW_CAMPAIGNS,
            Self::MANAGE_CAMPAIGNS,
            Self::VIEW_USERS,
            Self::MANAGE_USERS,
            Self::VIEW_BILLING,
            Self::MANAGE_BILLING,
            Self::VIEW_REPORTS,
            Self::VIEW_PROFILE,
        ]
    }

    pub fn is_known(permission: &str) -> bool {
        Self::all().contains(&permission)
    }
}

/// 控制台角色
pub struct SystemRole;

impl SystemRole {
    pub const CLIENT_ADMIN: &'static str = console_core::ROLE_CLIENT_ADMIN;

    /// 角色是否自带全部权限
    ///
    /// 客户管理员在本租户内不受权限标签限制；客户用户只拥有被授予的标签。
    pub fn is_unrestricted_client_role(role: &str) -> bool {
        role == Self::CLIENT_ADMIN
    }
}
