//! In-memory CRUD service for tests.
//!
//! [`MockService`] keeps models in a map keyed by [`Keyed::key`], counts
//! every call, can be told to fail the next call of a given verb, and can
//! hold calls open behind a gate so tests can look at busy states.

use crate::fixtures::Keyed;
use parking_lot::Mutex;
use recordkit_core::{
    Capabilities, ConfigurationBuilder, CrudService, ResultEnvelope, ServiceError, ServiceResult,
    ValidationErrors,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The six service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `get_all`
    GetAll,
    /// `get_all_where`
    GetAllWhere,
    /// `create`
    Create,
    /// `read`
    Read,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// A programmed failure for the next call of one verb.
#[derive(Debug, Clone)]
pub enum Failure {
    /// Return a failed envelope.
    Rejected {
        /// Status code of the envelope.
        status: u16,
        /// Error message of the envelope.
        message: String,
        /// Field errors, if any.
        validation_errors: Option<ValidationErrors>,
    },
    /// Raise a fault instead of returning an envelope.
    Fault(ServiceError),
}

impl Failure {
    /// A failed envelope with a message.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Failure::Rejected {
            status,
            message: message.into(),
            validation_errors: None,
        }
    }

    /// A 400 envelope carrying field errors.
    pub fn invalid(message: impl Into<String>, errors: ValidationErrors) -> Self {
        Failure::Rejected {
            status: 400,
            message: message.into(),
            validation_errors: Some(errors),
        }
    }

    fn into_result<T>(self) -> ServiceResult<T> {
        match self {
            Failure::Rejected {
                status,
                message,
                validation_errors,
            } => {
                let envelope = ResultEnvelope::failure(status, message);
                Ok(match validation_errors {
                    Some(errors) => envelope.with_validation_errors(errors),
                    None => envelope,
                })
            }
            Failure::Fault(fault) => Err(fault),
        }
    }
}

type FilterPredicate<M> = Arc<dyn Fn(&M, &str) -> bool + Send + Sync>;

/// An in-memory, programmable CRUD service.
pub struct MockService<M> {
    capabilities: Capabilities,
    store: Mutex<BTreeMap<i64, M>>,
    next_key: Mutex<i64>,
    calls: Mutex<HashMap<Verb, usize>>,
    failures: Mutex<HashMap<Verb, VecDeque<Failure>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    filter: Option<FilterPredicate<M>>,
}

impl<M> fmt::Debug for MockService<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockService")
            .field("capabilities", &self.capabilities)
            .field("stored", &self.store.lock().len())
            .field("calls", &*self.calls.lock())
            .finish()
    }
}

impl<M> MockService<M>
where
    M: Keyed + Clone + Send + Sync + 'static,
{
    /// A service supporting every verb.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::ALL)
    }

    /// A service supporting only the given verbs.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            store: Mutex::new(BTreeMap::new()),
            next_key: Mutex::new(1),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            filter: None,
        }
    }

    /// Sets the predicate `get_all_where` applies to the filter text.
    /// Without one every model matches.
    #[must_use]
    pub fn with_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&M, &str) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Stores models, assigning keys to those without one.
    #[must_use]
    pub fn seeded(self, models: impl IntoIterator<Item = M>) -> Self {
        for model in models {
            self.insert(model);
        }
        self
    }

    /// Stores one model and returns its key.
    pub fn insert(&self, mut model: M) -> i64 {
        let key = match model.key() {
            Some(key) => {
                let mut next = self.next_key.lock();
                *next = (*next).max(key + 1);
                key
            }
            None => {
                let key = self.allocate_key();
                model.set_key(key);
                key
            }
        };
        self.store.lock().insert(key, model);
        key
    }

    fn allocate_key(&self) -> i64 {
        let mut next = self.next_key.lock();
        let key = *next;
        *next += 1;
        key
    }

    /// A stored model.
    pub fn get(&self, key: i64) -> Option<M> {
        self.store.lock().get(&key).cloned()
    }

    /// All stored models in key order.
    pub fn stored(&self) -> Vec<M> {
        self.store.lock().values().cloned().collect()
    }

    /// Number of calls of `verb` so far, including calls still in flight.
    pub fn calls(&self, verb: Verb) -> usize {
        self.calls.lock().get(&verb).copied().unwrap_or(0)
    }

    /// Makes the next call of `verb` fail. Failures queue up in order.
    pub fn fail_next(&self, verb: Verb, failure: Failure) {
        self.failures
            .lock()
            .entry(verb)
            .or_default()
            .push_back(failure);
    }

    /// Holds every following call open until [`release`](Self::release) or
    /// [`open`](Self::open).
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held calls complete.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &*self.gate.lock() {
            gate.add_permits(count);
        }
    }

    /// Releases every held call and stops holding new ones.
    pub fn open(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    /// A builder with every supported slot wired to this service.
    pub fn configuration(self: &Arc<Self>) -> ConfigurationBuilder<M>
    where
        M: Default,
    {
        ConfigurationBuilder::new().with_service(Arc::clone(self))
    }

    /// Counts the call, waits at the gate, then takes a programmed failure.
    async fn enter(&self, verb: Verb) -> Option<Failure> {
        *self.calls.lock().entry(verb).or_insert(0) += 1;

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // a closed gate lets everything through
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.failures
            .lock()
            .get_mut(&verb)
            .and_then(VecDeque::pop_front)
    }

    fn not_found<T>(key: Option<i64>) -> ServiceResult<T> {
        let message = match key {
            Some(key) => format!("entity {key} not found"),
            None => "entity has no key".to_owned(),
        };
        Ok(ResultEnvelope::failure(404, message))
    }
}

impl<M> Default for MockService<M>
where
    M: Keyed + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> CrudService<M> for MockService<M>
where
    M: Keyed + Clone + Send + Sync + 'static,
{
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn get_all(&self) -> ServiceResult<Vec<M>> {
        if let Some(failure) = self.enter(Verb::GetAll).await {
            return failure.into_result();
        }
        Ok(ResultEnvelope::success(self.stored()))
    }

    async fn get_all_where(&self, filter: Option<String>) -> ServiceResult<Vec<M>> {
        if let Some(failure) = self.enter(Verb::GetAllWhere).await {
            return failure.into_result();
        }
        let mut models = self.stored();
        if let (Some(text), Some(predicate)) = (filter, &self.filter) {
            models.retain(|m| predicate(m, &text));
        }
        Ok(ResultEnvelope::success(models))
    }

    async fn create(&self, mut model: M) -> ServiceResult<M> {
        if let Some(failure) = self.enter(Verb::Create).await {
            return failure.into_result();
        }
        let key = self.allocate_key();
        model.set_key(key);
        self.store.lock().insert(key, model.clone());
        Ok(ResultEnvelope::success(model).with_id(key).with_status(201))
    }

    async fn read(&self, model: M) -> ServiceResult<M> {
        if let Some(failure) = self.enter(Verb::Read).await {
            return failure.into_result();
        }
        match model.key().and_then(|key| self.get(key)) {
            Some(stored) => Ok(ResultEnvelope::success(stored)),
            None => Self::not_found(model.key()),
        }
    }

    async fn update(&self, model: M) -> ServiceResult<M> {
        if let Some(failure) = self.enter(Verb::Update).await {
            return failure.into_result();
        }
        let Some(key) = model.key() else {
            return Self::not_found(None);
        };
        let mut store = self.store.lock();
        match store.get_mut(&key) {
            Some(slot) => {
                *slot = model.clone();
                Ok(ResultEnvelope::success(model))
            }
            None => Self::not_found(Some(key)),
        }
    }

    async fn delete(&self, model: M) -> ServiceResult<bool> {
        if let Some(failure) = self.enter(Verb::Delete).await {
            return failure.into_result();
        }
        let removed = model
            .key()
            .is_some_and(|key| self.store.lock().remove(&key).is_some());
        Ok(ResultEnvelope::success(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_people, Person};

    #[tokio::test]
    async fn seeded_store_assigns_keys() {
        let service = MockService::new().seeded(sample_people());

        let stored = service.stored();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].id, Some(1));
        assert_eq!(stored[2].id, Some(3));

        let created = service
            .create(Person::new("Barbara Liskov", "barbara@example.com", 84))
            .await
            .unwrap();
        assert_eq!(created.id(), Some(4));
        assert_eq!(created.status_code(), 201);
        assert_eq!(service.calls(Verb::Create), 1);
    }

    #[tokio::test]
    async fn programmed_failures_are_consumed_in_order() {
        let service = MockService::<Person>::new();
        service.fail_next(Verb::GetAll, Failure::rejected(503, "maintenance"));
        service.fail_next(
            Verb::GetAll,
            Failure::Fault(ServiceError::transport_retryable("reset")),
        );

        let first = service.get_all().await.unwrap();
        assert!(!first.is_success());
        assert_eq!(first.error_message(), Some("maintenance"));

        let second = service.get_all().await.unwrap_err();
        assert!(second.is_retryable());

        assert!(service.get_all().await.unwrap().is_success());
        assert_eq!(service.calls(Verb::GetAll), 3);
    }

    #[tokio::test]
    async fn update_and_delete_missing_entities() {
        let service = MockService::<Person>::new();
        let ghost = Person::new("Nobody", "", 0).stored(42);

        let updated = service.update(ghost.clone()).await.unwrap();
        assert_eq!(updated.status_code(), 404);

        let deleted = service.delete(ghost).await.unwrap();
        assert_eq!(deleted.into_content(), Some(false));
    }

    #[tokio::test]
    async fn filter_predicate_applies_to_text() {
        let service = MockService::new()
            .with_filter(|p: &Person, text| p.name.contains(text))
            .seeded(sample_people());

        let matched = service.get_all_where(Some("Grace".into())).await.unwrap();
        assert_eq!(matched.into_content().unwrap().len(), 1);

        let all = service.get_all_where(None).await.unwrap();
        assert_eq!(all.into_content().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn gate_holds_calls_open() {
        let service = Arc::new(MockService::new().seeded(sample_people()));
        service.hold();

        let pending = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.get_all().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.calls(Verb::GetAll), 1);
        assert!(!pending.is_finished());

        service.release(1);
        let envelope = pending.await.unwrap().unwrap();
        assert!(envelope.is_success());
    }

    #[test]
    fn configuration_reflects_capabilities() {
        let service = Arc::new(MockService::<Person>::with_capabilities(Capabilities::READ_ONLY));
        let config = service.configuration().build().unwrap();

        assert!(config.allow_refresh());
        assert!(!config.allow_update());
    }
}
