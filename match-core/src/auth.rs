use std::sync::{Arc, RwLock};

/// Supplies the current bearer credential. Token storage and refresh live
/// outside this crate; callers hand in whatever owns them.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

pub type SharedTokenProvider = Arc<dyn TokenProvider>;

/// A fixed token, mostly for tools and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|t| !t.is_empty())
    }
}

/// Anonymous access: never yields a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn token(&self) -> Option<String> {
        None
    }
}

/// A token slot the host can swap on login/logout.
#[derive(Debug, Default)]
pub struct TokenSlot {
    inner: RwLock<Option<String>>,
}

impl TokenSlot {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            inner: RwLock::new(initial),
        }
    }

    pub fn set(&self, token: Option<String>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl TokenProvider for TokenSlot {
    fn token(&self) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

pub(crate) fn bearer(provider: &dyn TokenProvider) -> Option<String> {
    provider.token().map(|t| format!("Bearer {t}"))
}
