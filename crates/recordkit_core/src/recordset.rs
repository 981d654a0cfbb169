//! Record collection, navigation and cascades.

use crate::config::{BoxFuture, Configuration, ListFn, WhereFn};
use crate::error::{RecordsetError, RecordsetResult, ServiceResult};
use crate::events::{
    AfterOperation, ChangeFlags, CrudError, EventHandlers, Operation, OperationEvents,
    RecordsChanged, RecordsetChanged, SubscriptionId,
};
use crate::field::{FieldDescriptor, FieldSchema};
use crate::record::{FocusCursor, OperationOutcome, Origin, Record, RecordId};
use crate::task::spawn_detached;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

struct RecordsetState<M> {
    records: Vec<Record<M>>,
    changed: BTreeSet<RecordId>,
    invalid: BTreeSet<RecordId>,
    new_record: Option<RecordId>,
    subscriptions: HashMap<RecordId, SubscriptionId>,
    filter: Option<String>,
    is_busy: bool,
    has_failed_operation: bool,
    error_message: Option<String>,
}

impl<M> RecordsetState<M> {
    fn index_of(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }

    fn members(&self, ids: &BTreeSet<RecordId>) -> Vec<Record<M>> {
        self.records
            .iter()
            .filter(|r| ids.contains(&r.id()))
            .cloned()
            .collect()
    }
}

struct RecordsetInner<M> {
    config: Arc<Configuration<M>>,
    state: Mutex<RecordsetState<M>>,
    focus: FocusCursor,
    changed: EventHandlers<RecordsetChanged>,
    records_changed: EventHandlers<RecordsChanged>,
    operations: Arc<OperationEvents>,
}

/// Which bulk read a refresh uses.
enum Fetch<M> {
    All(ListFn<M>),
    Where(WhereFn<M>, Option<String>),
}

impl<M> Fetch<M> {
    fn call(self) -> BoxFuture<ServiceResult<Vec<M>>> {
        match self {
            Fetch::All(f) => f(),
            Fetch::Where(f, filter) => f(filter),
        }
    }
}

/// An ordered collection of records bound to one [`Configuration`].
///
/// The recordset owns the collection, the current-record cursor, the
/// pending new record and two derived sets: records with unsaved changes
/// and records with validation errors. Records report every transition to
/// [`on_record_state_changed`](Self::on_record_state_changed), which keeps
/// those in sync and runs the cascades.
///
/// `Recordset` is a cheap handle; clones refer to the same recordset.
///
/// # Example
///
/// ```rust
/// use recordkit_core::{ConfigurationBuilder, Recordset, ResultEnvelope};
///
/// # tokio_test_block(async {
/// let config = ConfigurationBuilder::<String>::new()
///     .with_get_all(|| async { Ok(ResultEnvelope::success(vec!["a".to_owned(), "b".to_owned()])) })
///     .build()
///     .unwrap();
///
/// let recordset = Recordset::new(config);
/// recordset.refresh_data().await;
///
/// assert_eq!(recordset.len(), 2);
/// assert_eq!(recordset.position(), Some(1));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct Recordset<M> {
    inner: Arc<RecordsetInner<M>>,
}

impl<M> Clone for Recordset<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> fmt::Debug for Recordset<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Recordset")
            .field("len", &state.records.len())
            .field("changed", &state.changed.len())
            .field("invalid", &state.invalid.len())
            .field("new_record", &state.new_record)
            .field("current", &*self.inner.focus.read())
            .field("is_busy", &state.is_busy)
            .finish()
    }
}

impl<M> Recordset<M> {
    /// Creates an empty recordset. Call [`refresh_data`](Self::refresh_data)
    /// to load it.
    pub fn new(config: Configuration<M>) -> Self {
        Self {
            inner: Arc::new(RecordsetInner {
                config: Arc::new(config),
                state: Mutex::new(RecordsetState {
                    records: Vec::new(),
                    changed: BTreeSet::new(),
                    invalid: BTreeSet::new(),
                    new_record: None,
                    subscriptions: HashMap::new(),
                    filter: None,
                    is_busy: false,
                    has_failed_operation: false,
                    error_message: None,
                }),
                focus: Arc::new(RwLock::new(None)),
                changed: EventHandlers::new(),
                records_changed: EventHandlers::new(),
                operations: Arc::new(OperationEvents::default()),
            }),
        }
    }

    /// The configuration shared by every record.
    pub fn configuration(&self) -> &Configuration<M> {
        &self.inner.config
    }

    /// Records in collection order.
    pub fn records(&self) -> Vec<Record<M>> {
        self.inner.state.lock().records.clone()
    }

    /// Looks up a member by identity.
    pub fn record(&self, id: RecordId) -> Option<Record<M>> {
        let state = self.inner.state.lock();
        state.index_of(id).map(|i| state.records[i].clone())
    }

    /// Number of records, including a pending new record.
    pub fn len(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().records.is_empty()
    }

    /// The current record.
    pub fn current_record(&self) -> Option<Record<M>> {
        let current = *self.inner.focus.read();
        current.and_then(|id| self.record(id))
    }

    /// 1-based position of the current record.
    pub fn position(&self) -> Option<usize> {
        let current = (*self.inner.focus.read())?;
        self.inner.state.lock().index_of(current).map(|i| i + 1)
    }

    /// The pending new record, if any.
    pub fn new_record(&self) -> Option<Record<M>> {
        let pending = self.inner.state.lock().new_record;
        pending.and_then(|id| self.record(id))
    }

    /// Records with unsaved changes, in collection order.
    pub fn changed_records(&self) -> Vec<Record<M>> {
        let state = self.inner.state.lock();
        state.members(&state.changed)
    }

    /// Records with validation errors, in collection order.
    pub fn invalid_records(&self) -> Vec<Record<M>> {
        let state = self.inner.state.lock();
        state.members(&state.invalid)
    }

    /// Returns true if any record has unsaved changes.
    pub fn has_changes(&self) -> bool {
        !self.inner.state.lock().changed.is_empty()
    }

    /// True while a bulk refresh is in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().is_busy
    }

    /// True if the last bulk refresh failed.
    pub fn has_failed_operation(&self) -> bool {
        self.inner.state.lock().has_failed_operation
    }

    /// Message of the last failed bulk refresh.
    pub fn error_message(&self) -> Option<String> {
        self.inner.state.lock().error_message.clone()
    }

    /// Filter text passed to the `get_all_where` function.
    pub fn filter(&self) -> Option<String> {
        self.inner.state.lock().filter.clone()
    }

    /// Sets the filter text used by the next refresh.
    pub fn set_filter(&self, filter: Option<String>) {
        self.inner.state.lock().filter = filter;
    }

    /// Aggregate "something changed" notifications.
    pub fn changed(&self) -> &EventHandlers<RecordsetChanged> {
        &self.inner.changed
    }

    /// Structural changes (records added, removed, or the collection reset).
    pub fn records_changed(&self) -> &EventHandlers<RecordsChanged> {
        &self.inner.records_changed
    }

    /// Lifecycle and error events of the recordset and all its records.
    pub fn operations(&self) -> &OperationEvents {
        &self.inner.operations
    }

    fn publish(&self, source: Option<RecordId>) {
        self.inner.changed.emit(&RecordsetChanged { source });
    }

    /// Removes a member from the collection without calling the service.
    ///
    /// Clears its set memberships and the pending new record pointer. If it
    /// was current, the cursor moves to the record now at its position, else
    /// to the last record.
    ///
    /// # Errors
    ///
    /// [`RecordsetError::NotAMember`] if the record is not in the collection;
    /// nothing is modified.
    pub fn remove_record(&self, record: &Record<M>) -> RecordsetResult<()> {
        let id = record.id();
        let subscription = {
            let mut state = self.inner.state.lock();
            let index = state
                .index_of(id)
                .ok_or(RecordsetError::NotAMember { record: id })?;
            state.records.remove(index);
            state.changed.remove(&id);
            state.invalid.remove(&id);
            if state.new_record == Some(id) {
                state.new_record = None;
            }

            let mut focus = self.inner.focus.write();
            if *focus == Some(id) {
                *focus = state
                    .records
                    .get(index)
                    .or_else(|| state.records.last())
                    .map(Record::id);
            }
            state.subscriptions.remove(&id)
        };

        if let Some(subscription) = subscription {
            record.state_changed().unsubscribe(subscription);
        }
        debug!(record = %id, "record removed");
        self.inner.records_changed.emit(&RecordsChanged::Removed(id));
        Ok(())
    }
}

impl<M: FieldSchema> Recordset<M> {
    /// Field descriptors of the model type.
    pub fn fields(&self) -> &'static [FieldDescriptor] {
        M::fields()
    }
}

impl<M: Clone + Send + Sync + 'static> Recordset<M> {
    /// Model snapshots in collection order.
    pub fn data(&self) -> Vec<M> {
        self.records().iter().map(Record::model).collect()
    }

    /// Creates a record wired to this recordset. The caller must register the
    /// returned subscription in the state.
    fn materialize(&self, model: M, is_new_record: bool) -> (Record<M>, SubscriptionId) {
        let record = Record::new(
            model,
            is_new_record,
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.focus),
            Arc::clone(&self.inner.operations),
        );
        let weak: Weak<RecordsetInner<M>> = Arc::downgrade(&self.inner);
        let subscription = record.on_state_changed(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let recordset = Recordset { inner };
            if let Err(err) = recordset.on_record_state_changed(&event.record, event.flags) {
                error!(error = %err, "recordset invariant violated");
                panic!("recordset invariant violated: {err}");
            }
        });
        (record, subscription)
    }

    /// Reloads the whole collection through `get_all` / `get_all_where`.
    ///
    /// Existing records are discarded, together with all tracked transient
    /// state. With automatic new records enabled (and creating allowed) a
    /// blank new record is appended. The cursor moves to the first record.
    /// A failed fetch leaves the collection empty.
    pub async fn refresh_data(&self) -> OperationOutcome {
        let config = Arc::clone(&self.inner.config);
        let fetch = {
            let mut state = self.inner.state.lock();
            if state.is_busy {
                return OperationOutcome::Skipped;
            }
            let fetch = match (
                state.filter.clone(),
                config.get_all_where_fn(),
                config.get_all_fn(),
            ) {
                (Some(text), Some(f), _) => Fetch::Where(Arc::clone(f), Some(text)),
                (_, _, Some(f)) => Fetch::All(Arc::clone(f)),
                (filter, Some(f), None) => Fetch::Where(Arc::clone(f), filter),
                (_, None, None) => return OperationOutcome::Skipped,
            };
            state.is_busy = true;
            state.has_failed_operation = false;
            state.error_message = None;
            fetch
        };
        debug!("bulk refresh started");
        self.publish(None);

        if self.inner.operations.fire_before(Operation::Refresh, None) {
            self.inner.state.lock().is_busy = false;
            debug!("bulk refresh cancelled");
            self.publish(None);
            return OperationOutcome::Cancelled;
        }

        let response = match fetch.call().await {
            Ok(envelope) if envelope.is_success() => Ok(envelope.into_content().unwrap_or_default()),
            Ok(envelope) => Err(envelope.into_failure_parts().0),
            Err(fault) => Err(fault.to_string()),
        };
        let (models, failure) = match response {
            Ok(mut models) => {
                config.retain_matching(&mut models);
                (models, None)
            }
            Err(detail) => (Vec::new(), Some(detail)),
        };

        let mut fresh: Vec<(Record<M>, SubscriptionId)> = models
            .into_iter()
            .map(|model| self.materialize(model, false))
            .collect();
        let mut new_record = None;
        if config.add_new_record_automatic() && config.allow_create() {
            let pending = self.materialize(config.new_model(), true);
            new_record = Some(pending.0.id());
            fresh.push(pending);
        }

        let discarded = {
            let mut state = self.inner.state.lock();
            let old_records = std::mem::take(&mut state.records);
            let mut old_subscriptions = std::mem::take(&mut state.subscriptions);
            let discarded: Vec<_> = old_records
                .into_iter()
                .filter_map(|r| old_subscriptions.remove(&r.id()).map(|sub| (r, sub)))
                .collect();

            for (record, subscription) in fresh {
                state.subscriptions.insert(record.id(), subscription);
                state.records.push(record);
            }
            state.changed.clear();
            state.invalid.clear();
            state.new_record = new_record;
            state.is_busy = false;
            if let Some(detail) = &failure {
                state.has_failed_operation = true;
                state.error_message = Some(detail.clone());
            }
            *self.inner.focus.write() = state.records.first().map(Record::id);
            discarded
        };
        for (record, subscription) in discarded {
            record.state_changed().unsubscribe(subscription);
        }

        self.inner.operations.after.emit(&AfterOperation {
            operation: Operation::Refresh,
            record: None,
            success: failure.is_none(),
        });
        self.inner.records_changed.emit(&RecordsChanged::Reset);
        self.publish(None);

        match failure {
            None => {
                debug!(records = self.len(), "bulk refresh succeeded");
                OperationOutcome::Succeeded
            }
            Some(detail) => {
                let message = Operation::Refresh.failure_message(&detail);
                warn!(error = %detail, "bulk refresh failed");
                self.inner.operations.error.emit(&CrudError {
                    operation: Operation::Refresh,
                    record: None,
                    message: message.clone(),
                });
                OperationOutcome::Failed { message }
            }
        }
    }

    /// Starts [`refresh_data`](Self::refresh_data) in the background.
    pub fn start_refresh_data(&self) {
        let recordset = self.clone();
        spawn_detached("Refresh", async move {
            recordset.refresh_data().await;
        });
    }

    /// Appends a blank new record unless one is already pending.
    ///
    /// Returns `None` if a new record exists or creating is not allowed.
    pub fn try_add_new_record(&self) -> Option<Record<M>> {
        self.add_new_record(true)
    }

    /// Appends the pending new record. The router passes `publish = false`
    /// and sends its own aggregate notification.
    fn add_new_record(&self, publish: bool) -> Option<Record<M>> {
        if !self.inner.config.allow_create() || self.inner.state.lock().new_record.is_some() {
            return None;
        }

        let (record, subscription) = self.materialize(self.inner.config.new_model(), true);
        let id = record.id();
        {
            let mut state = self.inner.state.lock();
            if state.new_record.is_some() {
                drop(state);
                record.state_changed().unsubscribe(subscription);
                return None;
            }
            state.records.push(record.clone());
            state.subscriptions.insert(id, subscription);
            state.new_record = Some(id);
        }

        debug!(record = %id, "new record added");
        self.inner.records_changed.emit(&RecordsChanged::Added(id));
        if publish {
            self.publish(Some(id));
        }
        Some(record)
    }

    /// Changed records that are not busy, snapshotted now.
    fn saveable_records(&self, except: Option<RecordId>) -> Vec<Record<M>> {
        let candidates = {
            let state = self.inner.state.lock();
            state.members(&state.changed)
        };
        candidates
            .into_iter()
            .filter(|r| Some(r.id()) != except && !r.is_busy())
            .collect()
    }

    /// Saves every changed record that is not busy, concurrently.
    ///
    /// The target set is taken up front. There is no ordering between the
    /// saves and no all-or-nothing semantics; each record's own state
    /// reflects its own outcome. Returns one outcome per save started.
    pub async fn save_all_changes(&self) -> Vec<OperationOutcome> {
        let targets = self.saveable_records(None);
        debug!(records = targets.len(), "saving all changes");

        let mut saves = JoinSet::new();
        for record in targets {
            saves.spawn(async move { record.save_changes_from(Origin::Cascade).await });
        }

        let mut outcomes = Vec::with_capacity(saves.len());
        while let Some(joined) = saves.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "save task did not complete"),
            }
        }
        outcomes
    }

    /// Starts a save for every changed record that is not busy and returns
    /// immediately.
    pub fn start_save_all_changes(&self) {
        for record in self.saveable_records(None) {
            record.start(Origin::Cascade, Operation::Update);
        }
    }

    /// Moves the cursor to the first record.
    pub fn select_first(&self) -> bool {
        self.move_to(|len, _| (len > 0).then_some(0))
    }

    /// Moves the cursor to the previous record.
    pub fn select_previous(&self) -> bool {
        self.move_to(|_, current| current.and_then(|i| i.checked_sub(1)))
    }

    /// Moves the cursor to the next record, or to the first if none is current.
    pub fn select_next(&self) -> bool {
        self.move_to(|len, current| {
            let next = current.map_or(0, |i| i + 1);
            (next < len).then_some(next)
        })
    }

    /// Moves the cursor to the last record.
    pub fn select_last(&self) -> bool {
        self.move_to(|len, _| len.checked_sub(1))
    }

    /// Moves the cursor to the 1-based `position`. Out of range is a no-op.
    pub fn go_to_index(&self, position: usize) -> bool {
        self.move_to(|len, _| (1..=len).contains(&position).then(|| position - 1))
    }

    /// Moves the cursor to `record`. Non-members are ignored.
    pub fn select_record(&self, record: &Record<M>) -> bool {
        match self.record(record.id()) {
            Some(member) => {
                self.focus_on(&member);
                true
            }
            None => false,
        }
    }

    /// Resolves a target index from `(len, current_index)` and focuses it.
    fn move_to(&self, pick: impl FnOnce(usize, Option<usize>) -> Option<usize>) -> bool {
        let target = {
            let state = self.inner.state.lock();
            let current = (*self.inner.focus.read()).and_then(|id| state.index_of(id));
            pick(state.records.len(), current).and_then(|i| state.records.get(i).cloned())
        };
        match target {
            Some(record) => {
                self.focus_on(&record);
                true
            }
            None => false,
        }
    }

    fn focus_on(&self, record: &Record<M>) {
        *self.inner.focus.write() = Some(record.id());
        record.set_focus(true);
    }

    /// Routes one record notification through the cascades.
    ///
    /// In order:
    ///
    /// 1. on [`ChangeFlags::NEW_RECORD_DIRTIED`] from a new, unchanged, live
    ///    record that is the pending new record, that record is spent; a
    ///    replacement is added when automatic new records are on
    /// 2. a deleted record is removed
    /// 3. a save cascade saves every other changed, idle record (when
    ///    automatic saving is on)
    /// 4. the changed and invalid sets are updated for this record
    /// 5. the cursor follows the record unless the notification suppresses
    ///    that or is itself a focus request
    /// 6. a focus request moves the cursor without re-focusing
    /// 7. one aggregate notification is published
    ///
    /// # Errors
    ///
    /// [`RecordsetError::NotAMember`] if `record` is not in the collection.
    pub fn on_record_state_changed(
        &self,
        record: &Record<M>,
        flags: ChangeFlags,
    ) -> RecordsetResult<()> {
        let id = record.id();
        if self.inner.state.lock().index_of(id).is_none() {
            return Err(RecordsetError::NotAMember { record: id });
        }
        let is_new_record = record.is_new_record();
        let is_changed = record.is_changed();
        let is_deleted = record.is_deleted();
        let config = &self.inner.config;

        if flags.new_record_dirtied && is_new_record && !is_changed && !is_deleted {
            let spent = {
                let mut state = self.inner.state.lock();
                let spent = state.new_record == Some(id);
                if spent {
                    state.new_record = None;
                }
                spent
            };
            if spent {
                debug!(record = %id, "pending new record spent");
                if config.add_new_record_automatic() {
                    self.add_new_record(false);
                }
            }
        }

        if is_deleted {
            self.remove_record(record)?;
        }

        if flags.save_cascade && config.save_changes_automatic() {
            for other in self.saveable_records(Some(id)) {
                debug!(record = %other.id(), trigger = %id, "cascading save");
                other.start(Origin::Cascade, Operation::Update);
            }
        }

        if !is_deleted {
            let has_validation_errors = record.has_validation_errors();
            let mut state = self.inner.state.lock();
            if state.index_of(id).is_some() {
                if is_changed {
                    state.changed.insert(id);
                } else {
                    state.changed.remove(&id);
                }
                if has_validation_errors {
                    state.invalid.insert(id);
                } else {
                    state.invalid.remove(&id);
                }
            }
        }

        if !flags.suppress_focus && !flags.set_focus && !is_deleted && !record.has_focus() {
            self.focus_on(record);
        }

        if flags.set_focus && !is_deleted {
            *self.inner.focus.write() = Some(id);
        }

        self.publish(Some(id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigurationBuilder;
    use crate::ResultEnvelope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn names_config(names: &'static [&'static str]) -> ConfigurationBuilder<String> {
        ConfigurationBuilder::new()
            .with_get_all(move || async move {
                Ok(ResultEnvelope::success(
                    names.iter().map(|n| n.to_string()).collect(),
                ))
            })
            .with_read(|m| async move { Ok(ResultEnvelope::success(m)) })
            .with_update(|m| async move { Ok(ResultEnvelope::success(m)) })
            .with_create(|m| async move { Ok(ResultEnvelope::success(m)) })
            .with_delete(|_| async { Ok(ResultEnvelope::success(true)) })
    }

    async fn loaded(names: &'static [&'static str]) -> Recordset<String> {
        let recordset = Recordset::new(names_config(names).build().unwrap());
        assert!(recordset.refresh_data().await.is_success());
        recordset
    }

    #[tokio::test]
    async fn refresh_builds_records_and_cursor() {
        let recordset = loaded(&["a", "b", "c"]).await;

        assert_eq!(recordset.data(), ["a", "b", "c"]);
        assert_eq!(recordset.position(), Some(1));
        assert!(recordset.new_record().is_none());
        assert!(!recordset.is_busy());
        assert!(recordset.records()[0].has_focus());
    }

    #[tokio::test]
    async fn refresh_applies_client_filter() {
        let config = names_config(&["apple", "banana", "avocado"])
            .with_where_filter(|m: &String| m.starts_with('a'))
            .build()
            .unwrap();
        let recordset = Recordset::new(config);
        recordset.refresh_data().await;

        assert_eq!(recordset.data(), ["apple", "avocado"]);
    }

    #[tokio::test]
    async fn refresh_uses_filter_text_when_set() {
        let config = names_config(&["all"])
            .with_get_all_where(|filter: Option<String>| async move {
                Ok(ResultEnvelope::success(vec![filter.unwrap_or_default()]))
            })
            .build()
            .unwrap();
        let recordset = Recordset::new(config);

        recordset.refresh_data().await;
        assert_eq!(recordset.data(), ["all"]);

        recordset.set_filter(Some("name = 'x'".into()));
        recordset.refresh_data().await;
        assert_eq!(recordset.data(), ["name = 'x'"]);
    }

    #[tokio::test]
    async fn failed_refresh_clears_collection() {
        let config = ConfigurationBuilder::<String>::new()
            .with_get_all(|| async { Ok(ResultEnvelope::failure(500, "db offline")) })
            .build()
            .unwrap();
        let recordset = Recordset::new(config);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        recordset
            .operations()
            .error
            .subscribe(move |e: &CrudError| sink.lock().push(e.message.clone()));

        let outcome = recordset.refresh_data().await;

        assert!(matches!(outcome, OperationOutcome::Failed { .. }));
        assert!(recordset.is_empty());
        assert!(recordset.has_failed_operation());
        assert_eq!(recordset.error_message().as_deref(), Some("db offline"));
        assert!(!recordset.is_busy());
        assert_eq!(*errors.lock(), ["Refresh was not successful: db offline"]);
    }

    #[tokio::test]
    async fn refresh_without_bulk_read_is_skipped() {
        let recordset = Recordset::new(ConfigurationBuilder::<String>::new().build().unwrap());
        assert!(recordset.refresh_data().await.is_skipped());
    }

    #[tokio::test]
    async fn cancelled_refresh_keeps_collection() {
        let recordset = loaded(&["a", "b"]).await;
        recordset.operations().before.subscribe(|e| e.cancel());

        assert_eq!(recordset.refresh_data().await, OperationOutcome::Cancelled);
        assert_eq!(recordset.len(), 2);
        assert!(!recordset.is_busy());
    }

    #[tokio::test]
    async fn refresh_discards_old_records() {
        let recordset = loaded(&["a", "b"]).await;
        let old = recordset.records();
        old[1].on_field_changed("Name");
        assert!(recordset.has_changes());

        recordset.refresh_data().await;

        assert!(!recordset.has_changes());
        assert!(old.iter().all(|r| r.state_changed().is_empty()));
        assert!(recordset.record(old[0].id()).is_none());
    }

    #[tokio::test]
    async fn navigation() {
        let recordset = loaded(&["a", "b", "c"]).await;

        assert!(recordset.select_last());
        assert_eq!(recordset.position(), Some(3));
        assert!(!recordset.select_next());
        assert_eq!(recordset.position(), Some(3));
        assert!(recordset.select_previous());
        assert_eq!(recordset.position(), Some(2));
        assert!(recordset.select_first());
        assert!(!recordset.select_previous());
        assert_eq!(recordset.position(), Some(1));

        assert!(recordset.go_to_index(3));
        assert_eq!(recordset.current_record().unwrap().model(), "c");
        assert!(!recordset.go_to_index(0));
        assert!(!recordset.go_to_index(4));
        assert_eq!(recordset.position(), Some(3));

        let second = recordset.records()[1].clone();
        assert!(recordset.select_record(&second));
        assert!(second.has_focus());
    }

    #[tokio::test]
    async fn navigation_requests_focus() {
        let recordset = loaded(&["a", "b"]).await;
        let focus_requests = Arc::new(AtomicUsize::new(0));
        let target = recordset.records()[1].clone();
        let counter = Arc::clone(&focus_requests);
        target.on_state_changed(move |e| {
            if e.flags.set_focus {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        recordset.select_next();
        assert_eq!(focus_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_and_invalid_membership() {
        let recordset = loaded(&["a", "b"]).await;
        let records = recordset.records();

        records[1].on_field_changed("Name");
        assert_eq!(recordset.changed_records(), [records[1].clone()]);
        assert!(recordset.invalid_records().is_empty());
        // the edit pulled the cursor along
        assert_eq!(recordset.position(), Some(2));

        assert!(records[1].save_changes().await.is_success());
        assert!(recordset.changed_records().is_empty());
    }

    #[tokio::test]
    async fn deleted_record_is_removed() {
        let recordset = loaded(&["a", "b", "c"]).await;
        let middle = recordset.records()[1].clone();
        recordset.select_record(&middle);
        let structural = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&structural);
        recordset
            .records_changed()
            .subscribe(move |e: &RecordsChanged| sink.lock().push(e.clone()));

        assert!(middle.delete().await.is_success());

        assert_eq!(recordset.data(), ["a", "c"]);
        assert_eq!(recordset.current_record().unwrap().model(), "c");
        assert_eq!(*structural.lock(), [RecordsChanged::Removed(middle.id())]);
    }

    #[tokio::test]
    async fn removing_a_non_member_is_an_error() {
        let recordset = loaded(&["a", "b"]).await;
        let other = loaded(&["x"]).await;
        let stranger = other.records()[0].clone();

        let err = recordset.remove_record(&stranger).unwrap_err();

        assert_eq!(err, RecordsetError::NotAMember { record: stranger.id() });
        assert_eq!(recordset.len(), 2);
        assert!(recordset
            .on_record_state_changed(&stranger, ChangeFlags::PLAIN)
            .is_err());
    }

    #[tokio::test]
    async fn one_aggregate_notification_per_routed_event() {
        let recordset = loaded(&["a", "b"]).await;
        let record = recordset.records()[0].clone();
        let published = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&published);
        recordset.changed().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        recordset
            .on_record_state_changed(&record, ChangeFlags::SAVE_CASCADE)
            .unwrap();
        assert_eq!(published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spending_new_record_publishes_once() {
        let config = names_config(&["a"]).add_new_record_automatic(true).build().unwrap();
        let recordset = Recordset::new(config);
        recordset.refresh_data().await;
        let pending = recordset.new_record().unwrap();
        recordset.select_record(&pending);
        let published = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&published);
        recordset.changed().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        recordset
            .on_record_state_changed(&pending, ChangeFlags::NEW_RECORD_DIRTIED)
            .unwrap();

        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert_eq!(recordset.len(), 3);
        assert_ne!(recordset.new_record(), Some(pending));
    }

    #[tokio::test]
    async fn only_the_first_edit_spends_new_record() {
        let config = names_config(&["a"]).add_new_record_automatic(true).build().unwrap();
        let recordset = Recordset::new(config);
        recordset.refresh_data().await;
        let pending = recordset.new_record().unwrap();

        for flags in [ChangeFlags::PLAIN, ChangeFlags::SAVE_CASCADE, ChangeFlags::FOCUS] {
            recordset.on_record_state_changed(&pending, flags).unwrap();
        }
        pending.request_delete();
        pending.cancel_delete();

        assert_eq!(recordset.len(), 2);
        assert_eq!(recordset.new_record(), Some(pending));
    }

    #[tokio::test]
    async fn add_new_record_once() {
        let recordset = loaded(&["a"]).await;

        let added = recordset.try_add_new_record().unwrap();
        assert!(added.is_new_record());
        assert_eq!(recordset.new_record(), Some(added));
        assert_eq!(recordset.len(), 2);
        assert!(recordset.try_add_new_record().is_none());
        assert_eq!(recordset.len(), 2);
    }

    #[tokio::test]
    async fn new_record_requires_create() {
        let config = ConfigurationBuilder::<String>::new()
            .with_get_all(|| async { Ok(ResultEnvelope::success(vec![])) })
            .add_new_record_automatic(true)
            .build()
            .unwrap();
        let recordset = Recordset::new(config);
        recordset.refresh_data().await;

        assert!(recordset.is_empty());
        assert!(recordset.try_add_new_record().is_none());
        assert_eq!(recordset.position(), None);
    }
}
