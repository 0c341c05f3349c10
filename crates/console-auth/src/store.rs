use console_core::{SessionEntry, Token, UserRecord};
use console_error::{ConsoleError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::config::StorageKeys;

/// 浏览器风格的键值存储（localStorage / sessionStorage）
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStorage + ?Sized> KeyValueStorage for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        (**self).remove_item(key)
    }
}

/// 基于内存的键值存储
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    items: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self
            .items
            .read()
            .map_err(|e| ConsoleError::storage("get_item", e.to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self
            .items
            .write()
            .map_err(|e| ConsoleError::storage("set_item", e.to_string()))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self
            .items
            .write()
            .map_err(|e| ConsoleError::storage("remove_item", e.to_string()))?;
        items.remove(key);
        Ok(())
    }
}

/// 持久化的会话缓存：用户记录与 token 成对读写
pub trait SessionStore: Send + Sync {
    /// 读取成对的会话；损坏或残缺的缓存视为不存在，并被清除
    fn get(&self) -> Option<SessionEntry>;

    /// 原样读取 token，不代表存在会话
    fn token(&self) -> Option<Token>;

    fn set(&self, user: &UserRecord, token: &Token) -> Result<()>;

    fn clear(&self);
}

/// 基于键值存储的会话缓存
pub struct StorageSessionStore<S: KeyValueStorage> {
    storage: S,
    keys: StorageKeys,
}

impl<S: KeyValueStorage> StorageSessionStore<S> {
    pub fn new(storage: S, keys: StorageKeys) -> Self {
        Self { storage, keys }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn read_entry(&self) -> Result<Option<SessionEntry>> {
        let user_raw = self.storage.get_item(&self.keys.user)?;
        let token_raw = self.storage.get_item(&self.keys.token)?;

        let (user_raw, token_raw) = match (user_raw, token_raw) {
            (None, None) => return Ok(None),
            (Some(user), Some(token)) => (user, token),
            (user, _) => {
                let missing = if user.is_none() {
                    &self.keys.user
                } else {
                    &self.keys.token
                };
                return Err(ConsoleError::CorruptedCache {
                    key: missing.clone(),
                    reason: "user record and token must be stored together".to_string(),
                });
            }
        };

        let user: UserRecord =
            serde_json::from_str(&user_raw).map_err(|e| ConsoleError::CorruptedCache {
                key: self.keys.user.clone(),
                reason: e.to_string(),
            })?;
        if !user.is_authenticated() {
            return Err(ConsoleError::CorruptedCache {
                key: self.keys.user.clone(),
                reason: "empty userId".to_string(),
            });
        }
        let token = Token::new(token_raw).ok_or_else(|| ConsoleError::CorruptedCache {
            key: self.keys.token.clone(),
            reason: "empty token".to_string(),
        })?;

        Ok(Some(SessionEntry { user, token }))
    }
}

impl<S: KeyValueStorage> SessionStore for StorageSessionStore<S> {
    fn get(&self) -> Option<SessionEntry> {
        match self.read_entry() {
            Ok(entry) => entry,
            Err(e) => {
                e.log("session_store");
                self.clear();
                None
            }
        }
    }

    fn token(&self) -> Option<Token> {
        match self.storage.get_item(&self.keys.token) {
            Ok(raw) => raw.and_then(Token::new),
            Err(e) => {
                e.log("session_store");
                None
            }
        }
    }

    fn set(&self, user: &UserRecord, token: &Token) -> Result<()> {
        if !user.is_authenticated() {
            return Err(ConsoleError::Internal {
                message: "refusing to persist a user record without userId".to_string(),
                details: None,
            });
        }
        let user_json = serde_json::to_string(user)?;
        self.storage.set_item(&self.keys.user, &user_json)?;
        if let Err(e) = self.storage.set_item(&self.keys.token, token.as_str()) {
            // 新旧两半一起清掉
            e.log("session_store");
            self.clear();
            return Err(e);
        }
        debug!(user_id = %user.user_id(), "会话已写入缓存");
        Ok(())
    }

    fn clear(&self) {
        for key in [&self.keys.user, &self.keys.token] {
            if let Err(e) = self.storage.remove_item(key) {
                warn!(key = %key, error = %e, "清除会话缓存失败");
            }
        }
    }
}

/// 登录往返期间暂存的目标路径，只会被消费一次
pub struct PendingRedirect {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl PendingRedirect {
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// 记录目标路径，只接受站内绝对路径
    pub fn record(&self, path: &str) {
        if !is_local_path(path) {
            warn!(path = %path, "忽略非站内的跳转目标");
            return;
        }
        if let Err(e) = self.storage.set_item(&self.key, path) {
            e.log("pending_redirect");
        }
    }

    /// 读取并删除
    pub fn take(&self) -> Option<String> {
        let value = match self.storage.get_item(&self.key) {
            Ok(value) => value,
            Err(e) => {
                e.log("pending_redirect");
                None
            }
        };
        self.clear();
        value.filter(|path| is_local_path(path))
    }

    pub fn peek(&self) -> Option<String> {
        self.storage.get_item(&self.key).ok().flatten()
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_item(&self.key) {
            e.log("pending_redirect");
        }
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}
