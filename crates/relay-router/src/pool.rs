//! Live backend connections keyed by backend id.

use crate::types::BackendId;
use relay_abstraction::Backend;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe map from backend id to a live connection.
#[derive(Default)]
pub struct BackendPool {
    backends: RwLock<HashMap<BackendId, Arc<dyn Backend>>>,
}

impl BackendPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one connection.
    pub fn insert(&self, id: BackendId, backend: Arc<dyn Backend>) {
        self.backends.write().unwrap_or_else(PoisonError::into_inner).insert(id, backend);
    }

    /// Replaces every connection at once. Backends missing from `backends`
    /// lose their connection.
    pub fn replace(&self, backends: impl IntoIterator<Item = (BackendId, Arc<dyn Backend>)>) {
        let fresh: HashMap<BackendId, Arc<dyn Backend>> = backends.into_iter().collect();
        *self.backends.write().unwrap_or_else(PoisonError::into_inner) = fresh;
    }

    pub fn get(&self, id: &BackendId) -> Option<Arc<dyn Backend>> {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).get(id).map(Arc::clone)
    }

    pub fn contains(&self, id: &BackendId) -> bool {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.backends.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = backends.keys().map(ToString::to_string).collect();
        ids.sort();
        f.debug_struct("BackendPool").field("backends", &ids).finish()
    }
}
