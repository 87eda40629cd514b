//! Capability registry: the backend catalogue and per-category preferences.
//!
//! Readers take an `Arc` snapshot and work against it for the whole
//! decision, so a concurrent reload never exposes a half-built catalogue.

use crate::config::ConfigError;
use crate::error::UnknownBackend;
use crate::types::{BackendId, BackendProfile, TaskCategory};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Immutable view of the catalogue at one point in time. Never empty.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    profiles: Vec<BackendProfile>,
    index: HashMap<BackendId, usize>,
    preferences: HashMap<TaskCategory, Vec<BackendId>>,
    catalogue_order: Vec<BackendId>,
    version: u64,
}

impl RegistrySnapshot {
    /// Builds a snapshot from profiles (catalogue order) and preference lists.
    ///
    /// Preference entries naming unknown backends are kept. The engine lists
    /// them as candidates failing the `registered` filter, so they show up as
    /// `registered=fail` in the rationale. A list naming no catalogued backend
    /// falls back to catalogue order.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` for an empty catalogue or duplicate ids.
    pub fn new(
        profiles: Vec<BackendProfile>,
        preferences: HashMap<TaskCategory, Vec<BackendId>>,
    ) -> Result<Self, ConfigError> {
        if profiles.is_empty() {
            return Err(ConfigError::Validation("backend catalogue must not be empty".to_string()));
        }

        let mut index = HashMap::with_capacity(profiles.len());
        for (position, profile) in profiles.iter().enumerate() {
            if index.insert(profile.id.clone(), position).is_some() {
                return Err(ConfigError::Validation(format!(
                    "duplicate backend id '{}'",
                    profile.id
                )));
            }
        }

        let mut cleaned = HashMap::with_capacity(preferences.len());
        for (category, ids) in preferences {
            let mut seen = HashSet::new();
            let ids: Vec<BackendId> =
                ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
            for id in ids.iter().filter(|id| !index.contains_key(*id)) {
                warn!(
                    category = %category,
                    backend = %id,
                    "Preference list names unknown backend, it will fail the registered filter"
                );
            }
            cleaned.insert(category, ids);
        }

        let catalogue_order = profiles.iter().map(|p| p.id.clone()).collect();
        Ok(Self { profiles, index, preferences: cleaned, catalogue_order, version: 0 })
    }

    /// Looks up one profile.
    ///
    /// # Errors
    /// Returns `UnknownBackend` when the id is not catalogued.
    pub fn get(&self, id: &BackendId) -> Result<&BackendProfile, UnknownBackend> {
        self.index
            .get(id)
            .map(|&position| &self.profiles[position])
            .ok_or_else(|| UnknownBackend(id.clone()))
    }

    /// Whether the id is catalogued.
    pub fn contains(&self, id: &BackendId) -> bool {
        self.index.contains_key(id)
    }

    /// Ordered candidate ids for a category, possibly including unknown ids.
    ///
    /// Falls back to the `general` list, then to catalogue order, when a list
    /// is missing or names no catalogued backend.
    pub fn preference_order(&self, category: TaskCategory) -> &[BackendId] {
        [category, TaskCategory::General]
            .into_iter()
            .filter_map(|c| self.preferences.get(&c))
            .find(|ids| ids.iter().any(|id| self.contains(id)))
            .map_or(self.catalogue_order.as_slice(), Vec::as_slice)
    }

    /// First catalogued backend for a category, used when every candidate was filtered out.
    pub fn first_preference(&self, category: TaskCategory) -> &BackendId {
        self.preference_order(category)
            .iter()
            .find(|id| self.contains(id))
            // The catalogue is never empty.
            .unwrap_or(&self.catalogue_order[0])
    }

    /// Profiles for a category, in preference order.
    pub fn profiles_for(&self, category: TaskCategory) -> Vec<&BackendProfile> {
        self.preference_order(category).iter().filter_map(|id| self.get(id).ok()).collect()
    }

    /// Every profile, in catalogue order.
    pub fn profiles(&self) -> &[BackendProfile] {
        &self.profiles
    }

    /// Configured preference lists, deduplicated.
    pub fn preferences(&self) -> &HashMap<TaskCategory, Vec<BackendId>> {
        &self.preferences
    }

    /// Number of reloads applied before this snapshot was published.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Shared, hot-reloadable catalogue.
#[derive(Debug)]
pub struct CapabilityRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl CapabilityRegistry {
    /// Creates a registry serving the given snapshot.
    #[must_use]
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self { current: RwLock::new(Arc::new(snapshot)) }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Looks up a profile in the current snapshot.
    ///
    /// # Errors
    /// Returns `UnknownBackend` when the id is not catalogued.
    pub fn get(&self, id: &BackendId) -> Result<BackendProfile, UnknownBackend> {
        self.snapshot().get(id).cloned()
    }

    /// Profiles for a category in preference order, from the current snapshot.
    pub fn profiles_for(&self, category: TaskCategory) -> Vec<BackendProfile> {
        self.snapshot().profiles_for(category).into_iter().cloned().collect()
    }

    /// Atomically replaces the catalogue and returns the snapshot now served.
    /// In-flight readers keep their old snapshot.
    pub fn reload(&self, mut snapshot: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        snapshot.version = guard.version + 1;
        info!(
            version = snapshot.version,
            backends = snapshot.profiles.len(),
            "Capability registry reloaded"
        );
        debug!(preferences = ?snapshot.preferences, "Registry preference lists");
        *guard = Arc::new(snapshot);
        Arc::clone(&guard)
    }
}
