//! In-memory provider and state store
//!
//! Used by tests and dry runs. The provider can inject faults per resource
//! and simulate call latency to make concurrency observable.

use crate::error::{ProviderError, StateError};
use crate::provider::{Observed, Provider};
use crate::resource::ResourceKind;
use crate::state::{RunState, StateStore};
use crate::value::Attributes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Failure to inject for a resource's mutating calls
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with a propagation error this many times, then succeed
    Transient(u32),
    /// Always fail with this error
    Permanent(ProviderError),
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, (ResourceKind, Observed)>,
    faults: HashMap<String, Fault>,
    extra_outputs: HashMap<String, Attributes>,
    mutations: HashMap<String, usize>,
    journal: Vec<String>,
}

/// Provider backed by a map, with fault injection
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every mutating call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fault(self, id: &str, fault: Fault) -> Self {
        self.lock().faults.insert(id.to_string(), fault);
        self
    }

    /// Extra outputs reported for a resource on top of its properties.
    pub fn with_outputs(self, id: &str, outputs: Attributes) -> Self {
        self.lock().extra_outputs.insert(id.to_string(), outputs);
        self
    }

    pub fn clear_fault(&self, id: &str) {
        self.lock().faults.remove(id);
    }

    /// Create or replace a resource out of band.
    pub fn seed(&self, kind: ResourceKind, id: &str, properties: Attributes) {
        let outputs = self.outputs_for(id, &properties);
        self.lock().resources.insert(
            id.to_string(),
            (kind, Observed {
                properties,
                outputs,
            }),
        );
    }

    pub fn exists(&self, id: &str) -> bool {
        self.lock().resources.contains_key(id)
    }

    /// Number of mutating calls (create/update/delete) made for a resource,
    /// including failed ones
    pub fn mutations(&self, id: &str) -> usize {
        self.lock().mutations.get(id).copied().unwrap_or(0)
    }

    /// Successful mutations in completion order, as "action:id"
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// Highest number of mutating calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn outputs_for(&self, id: &str, properties: &Attributes) -> Attributes {
        let mut outputs = properties.clone();
        outputs.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        if let Some(extra) = self.lock().extra_outputs.get(id) {
            outputs.extend(extra.clone());
        }
        outputs
    }

    fn mutate<T>(
        &self,
        id: &str,
        action: &str,
        apply: impl FnOnce(&mut Inner) -> T,
    ) -> Result<T, ProviderError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }

        let result = {
            let mut inner = self.lock();
            *inner.mutations.entry(id.to_string()).or_default() += 1;
            let fault = match inner.faults.get_mut(id) {
                Some(Fault::Permanent(e)) => Some(e.clone()),
                Some(Fault::Transient(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(ProviderError::transient(format!("{id} is not visible yet")))
                }
                _ => None,
            };
            match fault {
                Some(e) => Err(e),
                None => {
                    inner.journal.push(format!("{action}:{id}"));
                    Ok(apply(&mut *inner))
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn read(&self, _kind: ResourceKind, id: &str) -> Result<Option<Observed>, ProviderError> {
        Ok(self.lock().resources.get(id).map(|(_, o)| o.clone()))
    }

    fn create(
        &self,
        kind: ResourceKind,
        id: &str,
        desired: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        let outputs = self.outputs_for(id, desired);
        self.mutate(id, "create", |inner| {
            inner.resources.insert(
                id.to_string(),
                (kind, Observed {
                    properties: desired.clone(),
                    outputs: outputs.clone(),
                }),
            );
            outputs
        })
    }

    fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        desired: &Attributes,
    ) -> Result<Attributes, ProviderError> {
        self.create(kind, id, desired)
    }

    fn delete(&self, _kind: ResourceKind, id: &str) -> Result<(), ProviderError> {
        self.mutate(id, "delete", |inner| {
            inner.resources.remove(id);
        })
    }
}

/// State store that keeps RunState in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<RunState>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `save` was called
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<RunState, StateError> {
        let guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard.clone().unwrap_or_default())
    }

    fn save(&self, state: &RunState) -> Result<(), StateError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transient_fault_clears_after_count() {
        let provider = MemoryProvider::new().with_fault("sa", Fault::Transient(2));
        let desired = Attributes::from([("account_id".to_string(), json!("ci"))]);
        assert!(provider.create(ResourceKind::ServiceAccount, "sa", &desired).unwrap_err().is_transient());
        assert!(provider.create(ResourceKind::ServiceAccount, "sa", &desired).is_err());
        assert!(provider.create(ResourceKind::ServiceAccount, "sa", &desired).is_ok());
        assert_eq!(provider.mutations("sa"), 3);
        assert_eq!(provider.journal(), ["create:sa"]);
    }

    #[test]
    fn test_extra_outputs_are_reported() {
        let provider = MemoryProvider::new().with_outputs(
            "sa",
            Attributes::from([("email".to_string(), json!("ci@hub.iam.gserviceaccount.com"))]),
        );
        let outputs = provider
            .create(ResourceKind::ServiceAccount, "sa", &Attributes::new())
            .unwrap();
        assert_eq!(outputs["email"], json!("ci@hub.iam.gserviceaccount.com"));
        assert_eq!(outputs["id"], json!("sa"));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().resources.is_empty());
        let mut state = RunState::default();
        state.serial = 3;
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap().serial, 3);
        assert_eq!(store.saves(), 1);
    }
}
