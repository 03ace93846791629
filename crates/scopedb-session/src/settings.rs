//! The application settings mapping.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::factory::SessionFactory;

/// Settings key under which the [`SessionFactory`] is stored.
pub const SESSION_FACTORY_KEY: &str = "session_factory";

type SettingValue = Arc<dyn Any + Send + Sync>;

/// String-keyed configuration mapping owned by an [`Application`](crate::Application).
///
/// Values are type-erased and shared; readers downcast to the type they
/// expect. Session code only ever reads [`SESSION_FACTORY_KEY`].
#[derive(Clone, Default)]
pub struct Settings {
    values: HashMap<String, SettingValue>,
}

impl Settings {
    /// Creates an empty settings mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T) -> &mut Self
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key.into(), Arc::new(value));
        self
    }

    /// Stores `factory` under [`SESSION_FACTORY_KEY`].
    pub fn with_session_factory(mut self, factory: SessionFactory) -> Self {
        self.insert(SESSION_FACTORY_KEY, factory);
        self
    }

    /// Removes the value under `key`, returning whether one was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Returns the value under `key` if it is present and of type `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_raw(key)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    pub(crate) fn get_raw(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Settings").field("keys", &keys).finish()
    }
}
