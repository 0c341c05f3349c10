pub mod config;
pub mod guard;
pub mod history;
pub mod identity;
pub mod navigation;
pub mod permissions;
pub mod rbac;
pub mod redirect;
pub mod services;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出核心类型
pub use config::{ApiConfig, ConsoleConfig, RouteConfig, StorageKeys};
pub use guard::{
    transition, AuthGuard, AuthVia, GuardEffect, GuardEvent, GuardMount, GuardRequest, GuardState,
    Render, Resolution,
};
pub use history::{
    LocationHandler, MemoryHistory, Navigation, NavigationKind, NavigationObserver, Navigator,
    Subscription,
};
pub use identity::{HttpIdentityClient, IdentityClient};
pub use navigation::{admin_navigation, client_navigation, filter_navigation, NavItem};
pub use permissions::{Permission, SystemRole};
pub use rbac::{
    has_all_permissions, has_any_permission, has_permission, AccessPolicy, PermissionCheck,
    PermissionDecision, PermissionGate, PermissionGuard,
};
pub use redirect::AuthRedirect;
pub use services::AuthServices;
pub use session::{LoginOutcome, SessionService, UserSession};
pub use store::{KeyValueStorage, MemoryStorage, PendingRedirect, SessionStore, StorageSessionStore};

// 错误类型与数据模型
pub use console_core::{Credentials, LoginRoute, SessionEntry, Token, UserRecord, UserType};
pub use console_error::{ConsoleError, Result};
