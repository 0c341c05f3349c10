use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::debug;

/// 导航端口：由宿主的路由器实现
pub trait Navigator: Send + Sync {
    /// 追加一条历史记录
    fn push(&self, path: &str);

    /// 替换当前历史记录
    fn replace(&self, path: &str);

    fn current_path(&self) -> String;
}

pub type LocationHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// 历史前进/后退事件的订阅端口
pub trait NavigationObserver: Send + Sync {
    fn on_location_change(&self, handler: LocationHandler) -> Subscription;
}

/// 订阅句柄，丢弃时自动退订
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    Push,
    Replace,
    Pop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub kind: NavigationKind,
    pub path: String,
}

struct HistoryState {
    entries: Vec<String>,
    cursor: usize,
    listeners: BTreeMap<u64, LocationHandler>,
    next_listener: u64,
    navigations: Vec<Navigation>,
}

/// 内存中的浏览器历史栈
///
/// `push`/`replace` 只修改栈，不通知订阅者；`back`/`forward` 相当于 popstate，
/// 会通知所有订阅者。
#[derive(Clone)]
pub struct MemoryHistory {
    inner: Arc<Mutex<HistoryState>>,
}

impl MemoryHistory {
    pub fn new(initial: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HistoryState {
                entries: vec![initial.to_string()],
                cursor: 0,
                listeners: BTreeMap::new(),
                next_listener: 0,
                navigations: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn back(&self) -> Option<String> {
        self.pop_to(|cursor, _| cursor.checked_sub(1))
    }

    pub fn forward(&self) -> Option<String> {
        self.pop_to(|cursor, len| (cursor + 1 < len).then_some(cursor + 1))
    }

    fn pop_to(&self, next: impl FnOnce(usize, usize) -> Option<usize>) -> Option<String> {
        let (path, listeners) = {
            let mut state = self.state();
            let cursor = next(state.cursor, state.entries.len())?;
            state.cursor = cursor;
            let path = state.entries[cursor].clone();
            state.navigations.push(Navigation {
                kind: NavigationKind::Pop,
                path: path.clone(),
            });
            let listeners: Vec<LocationHandler> = state.listeners.values().cloned().collect();
            (path, listeners)
        };
        // 订阅者可能回调 replace，必须在锁外调用
        for listener in listeners {
            listener(&path);
        }
        Some(path)
    }

    pub fn entries(&self) -> Vec<String> {
        self.state().entries.clone()
    }

    pub fn navigations(&self) -> Vec<Navigation> {
        self.state().navigations.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    fn record(state: &mut HistoryState, kind: NavigationKind, path: &str) {
        debug!(kind = ?kind, path = %path, "history navigation");
        state.navigations.push(Navigation {
            kind,
            path: path.to_string(),
        });
    }
}

impl Navigator for MemoryHistory {
    fn push(&self, path: &str) {
        let mut state = self.state();
        let keep = state.cursor + 1;
        state.entries.truncate(keep);
        state.entries.push(path.to_string());
        state.cursor = keep;
        Self::record(&mut state, NavigationKind::Push, path);
    }

    fn replace(&self, path: &str) {
        let mut state = self.state();
        let cursor = state.cursor;
        state.entries[cursor] = path.to_string();
        Self::record(&mut state, NavigationKind::Replace, path);
    }

    fn current_path(&self) -> String {
        let state = self.state();
        state.entries[state.cursor].clone()
    }
}

impl NavigationObserver for MemoryHistory {
    fn on_location_change(&self, handler: LocationHandler) -> Subscription {
        let id = {
            let mut state = self.state();
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.insert(id, handler);
            id
        };
        let weak: Weak<Mutex<HistoryState>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                state.listeners.remove(&id);
            }
        })
    }
}
