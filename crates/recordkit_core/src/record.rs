//! Single-entity state machine.
//!
//! A record owns one model snapshot and drives CRUD calls for it through the
//! recordset's [`Configuration`]. Its state is a set of flags rather than an
//! exclusive enum: a record can be new and changed at once, or changed and
//! busy.
//!
//! Every CRUD operation follows the same sequence:
//!
//! 1. guard (busy, deleted, permission and state checks; a failed guard is a
//!    silent no-op)
//! 2. set busy and notify
//! 3. fire the cancellable `before` event
//! 4. call the service unless cancelled
//! 5. interpret the envelope, clear busy
//! 6. fire `after` (not on cancellation), notify, and on failure fire the
//!    error event
//!
//! Faults from the service never escape: the awaitable forms report them in
//! their [`OperationOutcome`], the `start_*` forms only through events.

use crate::config::{BoxFuture, Configuration};
use crate::envelope::ValidationErrors;
use crate::error::ServiceResult;
use crate::events::{
    AfterOperation, ChangeFlags, CrudError, EventHandlers, Operation, OperationEvents,
    StateChanged, SubscriptionId,
};
use crate::task::spawn_detached;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a record.
///
/// Identities are never reused. A full recordset refresh creates new records
/// and therefore new identities.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(u64);

impl RecordId {
    fn next() -> Self {
        Self(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an identity from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The recordset's current-record cursor, readable by every record.
pub(crate) type FocusCursor = Arc<RwLock<Option<RecordId>>>;

/// How an awaitable operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// A guard rejected the call; nothing happened.
    Skipped,
    /// A `before` handler cancelled the call.
    Cancelled,
    /// The service call succeeded.
    Succeeded,
    /// The service reported failure or the call faulted.
    Failed {
        /// The user-facing message sent through the error event.
        message: String,
    },
}

impl OperationOutcome {
    /// Returns true for [`OperationOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Succeeded)
    }

    /// Returns true for [`OperationOutcome::Skipped`].
    pub fn is_skipped(&self) -> bool {
        matches!(self, OperationOutcome::Skipped)
    }
}

/// Who started an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A direct call.
    Caller,
    /// The recordset, on behalf of another record. The cursor must not follow.
    Cascade,
}

impl Origin {
    fn flags(self) -> ChangeFlags {
        match self {
            Origin::Caller => ChangeFlags::PLAIN,
            Origin::Cascade => ChangeFlags::PLAIN.suppressed(),
        }
    }
}

struct RecordState<M> {
    model: M,
    is_changed: bool,
    is_new_record: bool,
    is_deleted: bool,
    is_busy: bool,
    is_saved: bool,
    has_failed_operation: bool,
    delete_requested: bool,
    error_message: Option<String>,
    validation_errors: ValidationErrors,
}

impl<M> RecordState<M> {
    fn new(model: M, is_new_record: bool) -> Self {
        Self {
            model,
            is_changed: false,
            is_new_record,
            is_deleted: false,
            is_busy: false,
            is_saved: false,
            has_failed_operation: false,
            delete_requested: false,
            error_message: None,
            validation_errors: ValidationErrors::new(),
        }
    }

    fn accepts_operations(&self) -> bool {
        !self.is_busy && !self.is_deleted
    }
}

struct RecordInner<M> {
    id: RecordId,
    config: Arc<Configuration<M>>,
    state: Mutex<RecordState<M>>,
    focus: FocusCursor,
    state_changed: EventHandlers<StateChanged<M>>,
    operations: Arc<OperationEvents>,
}

/// One entity plus its CRUD state machine.
///
/// `Record` is a cheap handle; clones refer to the same record. Records are
/// created by a [`Recordset`](crate::Recordset).
pub struct Record<M> {
    inner: Arc<RecordInner<M>>,
}

impl<M> Clone for Record<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> PartialEq for Record<M> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<M> Eq for Record<M> {}

impl<M> fmt::Debug for Record<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Record")
            .field("id", &self.inner.id)
            .field("is_changed", &state.is_changed)
            .field("is_new_record", &state.is_new_record)
            .field("is_deleted", &state.is_deleted)
            .field("is_busy", &state.is_busy)
            .field("has_failed_operation", &state.has_failed_operation)
            .finish()
    }
}

impl<M> Record<M> {
    pub(crate) fn new(
        model: M,
        is_new_record: bool,
        config: Arc<Configuration<M>>,
        focus: FocusCursor,
        operations: Arc<OperationEvents>,
    ) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                id: RecordId::next(),
                config,
                state: Mutex::new(RecordState::new(model, is_new_record)),
                focus,
                state_changed: EventHandlers::new(),
                operations,
            }),
        }
    }

    /// Returns the record's identity.
    pub fn id(&self) -> RecordId {
        self.inner.id
    }

    /// Borrows the model for the duration of `f`.
    pub fn with_model<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.inner.state.lock().model)
    }

    /// True once a field changed and the change was not saved or undone.
    pub fn is_changed(&self) -> bool {
        self.inner.state.lock().is_changed
    }

    /// True until the record is saved through `create`.
    pub fn is_new_record(&self) -> bool {
        self.inner.state.lock().is_new_record
    }

    /// True once the record is deleted. Terminal.
    pub fn is_deleted(&self) -> bool {
        self.inner.state.lock().is_deleted
    }

    /// True while a CRUD call is in flight.
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().is_busy
    }

    /// True after a successful save, until the next edit or reload.
    pub fn is_saved(&self) -> bool {
        self.inner.state.lock().is_saved
    }

    /// True if the last operation failed.
    pub fn has_failed_operation(&self) -> bool {
        self.inner.state.lock().has_failed_operation
    }

    /// Advisory flag for a delete confirmation UI.
    pub fn delete_requested(&self) -> bool {
        self.inner.state.lock().delete_requested
    }

    /// True if this is the recordset's current record.
    pub fn has_focus(&self) -> bool {
        *self.inner.focus.read() == Some(self.inner.id)
    }

    /// Message of the last failure.
    pub fn error_message(&self) -> Option<String> {
        self.inner.state.lock().error_message.clone()
    }

    /// Field validation errors reported by the service.
    pub fn validation_errors(&self) -> ValidationErrors {
        self.inner.state.lock().validation_errors.clone()
    }

    /// True if any field carries a validation error.
    pub fn has_validation_errors(&self) -> bool {
        !self.inner.state.lock().validation_errors.is_empty()
    }

    /// The configuration this record calls through.
    pub fn configuration(&self) -> &Configuration<M> {
        &self.inner.config
    }

    /// State-changed notifications of this record.
    pub fn state_changed(&self) -> &EventHandlers<StateChanged<M>> {
        &self.inner.state_changed
    }

    /// Lifecycle and error events, shared with the owning recordset.
    pub fn operations(&self) -> &OperationEvents {
        &self.inner.operations
    }

    /// Subscribes to this record's state-changed notifications.
    pub fn on_state_changed<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&StateChanged<M>) + Send + Sync + 'static,
    {
        self.inner.state_changed.subscribe(handler)
    }

    fn notify_with(&self, flags: ChangeFlags, by_program: bool) {
        self.inner.state_changed.emit(&StateChanged {
            record: self.clone(),
            flags,
            by_program,
        });
    }

    fn notify(&self, flags: ChangeFlags) {
        self.notify_with(flags, false);
    }

    /// Reports that a field of the model was edited.
    ///
    /// The first edit of a clean record marks it changed and requests the
    /// save cascade. For a new record a [`ChangeFlags::NEW_RECORD_DIRTIED`]
    /// notification goes first, while the record still reads as unchanged,
    /// so the recordset can retire it as the pending new record and add a
    /// replacement. Later edits emit
    /// one plain notification. Validation errors recorded against
    /// `field_key` are cleared.
    pub fn on_field_changed(&self, field_key: &str) {
        let (was_clean, is_new_record) = {
            let mut state = self.inner.state.lock();
            if state.is_deleted {
                return;
            }
            state.validation_errors.remove_field(field_key);
            (!state.is_changed, state.is_new_record)
        };

        if was_clean && is_new_record {
            self.notify(ChangeFlags::NEW_RECORD_DIRTIED);
        }

        {
            let mut state = self.inner.state.lock();
            state.is_changed = true;
            state.is_saved = false;
        }

        debug!(record = %self.inner.id, field = field_key, first = was_clean, "field changed");
        if was_clean {
            self.notify(ChangeFlags::SAVE_CASCADE);
        } else {
            self.notify(ChangeFlags::PLAIN);
        }
    }

    /// Asks to become the recordset's current record.
    ///
    /// Always notifies with the focus and save cascade flags.
    pub fn set_focus(&self, by_program: bool) {
        if self.is_deleted() {
            return;
        }
        self.notify_with(ChangeFlags::FOCUS, by_program);
    }

    /// Stages a delete for confirmation. No data changes.
    pub fn request_delete(&self) {
        self.set_delete_requested(true);
    }

    /// Withdraws a staged delete.
    pub fn cancel_delete(&self) {
        self.set_delete_requested(false);
    }

    fn set_delete_requested(&self, value: bool) {
        {
            let mut state = self.inner.state.lock();
            if state.is_deleted {
                return;
            }
            state.delete_requested = value;
        }
        self.notify(ChangeFlags::PLAIN);
    }
}

impl<M: Clone + Send + Sync + 'static> Record<M> {
    /// Returns a copy of the model snapshot.
    pub fn model(&self) -> M {
        self.inner.state.lock().model.clone()
    }

    /// Edits the model and reports the change of `field_key`.
    ///
    /// `f` works on a copy outside the record lock, so it may read the
    /// record. The copy replaces the model unless the record was deleted
    /// meanwhile.
    pub fn edit(&self, field_key: &str, f: impl FnOnce(&mut M)) {
        let mut model = {
            let state = self.inner.state.lock();
            if state.is_deleted {
                return;
            }
            state.model.clone()
        };
        f(&mut model);
        {
            let mut state = self.inner.state.lock();
            if state.is_deleted {
                return;
            }
            state.model = model;
        }
        self.on_field_changed(field_key);
    }

    /// Saves the record: `create` for a new record, `update` otherwise.
    ///
    /// Skipped while busy, when unchanged, when updating is not allowed, or
    /// when the record is new and creating is not allowed.
    pub async fn save_changes(&self) -> OperationOutcome {
        self.save_changes_from(Origin::Caller).await
    }

    /// Starts [`save_changes`](Self::save_changes) in the background.
    pub fn start_save_changes(&self) {
        self.start(Origin::Caller, Operation::Update);
    }

    /// Discards local edits by reloading through `read`.
    ///
    /// For a new record, undo is delete.
    pub async fn undo_changes(&self) -> OperationOutcome {
        self.undo_changes_from(Origin::Caller).await
    }

    /// Starts [`undo_changes`](Self::undo_changes) in the background.
    pub fn start_undo_changes(&self) {
        self.start(Origin::Caller, Operation::Undo);
    }

    /// Reloads the model through `read`.
    ///
    /// New records have nothing to reload. A changed record is undone
    /// instead, which reloads through the same path and discards the edits.
    pub async fn refresh(&self) -> OperationOutcome {
        self.refresh_from(Origin::Caller).await
    }

    /// Starts [`refresh`](Self::refresh) in the background.
    pub fn start_refresh(&self) {
        self.start(Origin::Caller, Operation::Refresh);
    }

    /// Deletes the record. A new record is deleted locally.
    pub async fn delete(&self) -> OperationOutcome {
        self.delete_from(Origin::Caller).await
    }

    /// Starts [`delete`](Self::delete) in the background.
    pub fn start_delete(&self) {
        self.start(Origin::Caller, Operation::Delete);
    }

    pub(crate) fn start(&self, origin: Origin, operation: Operation) {
        let record = self.clone();
        spawn_detached(operation.label(), async move {
            match operation {
                Operation::Update => record.save_changes_from(origin).await,
                Operation::Undo => record.undo_changes_from(origin).await,
                Operation::Refresh => record.refresh_from(origin).await,
                Operation::Delete => record.delete_from(origin).await,
            };
        });
    }

    pub(crate) async fn save_changes_from(&self, origin: Origin) -> OperationOutcome {
        let config = &self.inner.config;
        let Some(model) = self.try_begin(|state| {
            state.is_changed
                && config.allow_update()
                && (!state.is_new_record || config.allow_create())
        }) else {
            return OperationOutcome::Skipped;
        };

        let creating = self.is_new_record();
        let call = if creating {
            config.create_fn()
        } else {
            config.update_fn()
        }
        .cloned();

        self.execute(
            Operation::Update,
            origin,
            model,
            move |model| call.map(|f| f(model)),
            |state, content| {
                if let Some(model) = content {
                    state.model = model;
                }
                state.is_changed = false;
                state.is_new_record = false;
                state.is_saved = true;
                state.validation_errors = ValidationErrors::new();
                Ok(())
            },
        )
        .await
    }

    pub(crate) async fn undo_changes_from(&self, origin: Origin) -> OperationOutcome {
        let (accepted, is_new_record) = {
            let state = self.inner.state.lock();
            (
                state.accepts_operations() && self.inner.config.allow_read(),
                state.is_new_record,
            )
        };
        if !accepted {
            return OperationOutcome::Skipped;
        }
        if is_new_record {
            return self.delete_from(origin).await;
        }

        let Some(model) = self.try_begin(|state| state.is_changed && !state.is_new_record) else {
            return OperationOutcome::Skipped;
        };
        let call = self.inner.config.read_fn().cloned();

        self.execute(
            Operation::Undo,
            origin,
            model,
            move |model| call.map(|f| f(model)),
            |state, content| {
                if let Some(model) = content {
                    state.model = model;
                }
                state.is_changed = false;
                state.validation_errors = ValidationErrors::new();
                Ok(())
            },
        )
        .await
    }

    pub(crate) async fn refresh_from(&self, origin: Origin) -> OperationOutcome {
        let (accepted, is_new_record, is_changed) = {
            let state = self.inner.state.lock();
            (
                state.accepts_operations(),
                state.is_new_record,
                state.is_changed,
            )
        };
        if !accepted || is_new_record {
            return OperationOutcome::Skipped;
        }
        if is_changed {
            return self.undo_changes_from(origin).await;
        }

        let config = &self.inner.config;
        let Some(model) = self.try_begin(|state| {
            config.allow_read() && !state.is_new_record && !state.is_changed
        }) else {
            return OperationOutcome::Skipped;
        };
        let call = config.read_fn().cloned();

        self.execute(
            Operation::Refresh,
            origin,
            model,
            move |model| call.map(|f| f(model)),
            |state, content| {
                if let Some(model) = content {
                    state.model = model;
                }
                state.is_saved = false;
                Ok(())
            },
        )
        .await
    }

    pub(crate) async fn delete_from(&self, origin: Origin) -> OperationOutcome {
        let config = &self.inner.config;
        let Some(model) = self.try_begin(|_| config.allow_delete()) else {
            return OperationOutcome::Skipped;
        };
        let local = self.is_new_record();
        let call = config.delete_fn().cloned();

        self.execute(
            Operation::Delete,
            origin,
            model,
            move |model| {
                if local {
                    None
                } else {
                    call.map(|f| f(model))
                }
            },
            |state, content| {
                if content == Some(false) {
                    return Err("the service did not delete the entity".to_owned());
                }
                state.is_deleted = true;
                state.delete_requested = false;
                Ok(())
            },
        )
        .await
    }

    /// Checks the guard and marks the record busy in one step.
    ///
    /// Returns the model snapshot to send, or `None` if the guard rejected
    /// the call.
    fn try_begin(&self, precondition: impl FnOnce(&RecordState<M>) -> bool) -> Option<M> {
        let mut state = self.inner.state.lock();
        if !state.accepts_operations() || !precondition(&*state) {
            return None;
        }
        state.is_busy = true;
        state.has_failed_operation = false;
        state.error_message = None;
        Some(state.model.clone())
    }

    /// Runs steps 2–6 of the operation sequence for a record already marked
    /// busy.
    ///
    /// `call` returns `None` when the operation completes locally.
    async fn execute<T, C, A>(
        &self,
        operation: Operation,
        origin: Origin,
        model: M,
        call: C,
        apply: A,
    ) -> OperationOutcome
    where
        C: FnOnce(M) -> Option<BoxFuture<ServiceResult<T>>>,
        A: FnOnce(&mut RecordState<M>, Option<T>) -> Result<(), String>,
    {
        let id = self.inner.id;
        let flags = origin.flags();
        debug!(record = %id, %operation, "operation started");
        self.notify(flags);

        if self.inner.operations.fire_before(operation, Some(id)) {
            self.inner.state.lock().is_busy = false;
            debug!(record = %id, %operation, "operation cancelled");
            self.notify(flags);
            return OperationOutcome::Cancelled;
        }

        let response = match call(model) {
            None => Ok(None),
            Some(pending) => match pending.await {
                Ok(envelope) if envelope.is_success() => Ok(envelope.into_content()),
                Ok(envelope) => Err(envelope.into_failure_parts()),
                Err(fault) => Err((fault.to_string(), None)),
            },
        };

        let result = {
            let mut state = self.inner.state.lock();
            state.is_busy = false;
            let applied = match response {
                Ok(content) => apply(&mut *state, content).map_err(|detail| (detail, None)),
                Err(failure) => Err(failure),
            };
            match applied {
                Ok(()) => Ok(()),
                Err((detail, validation)) => {
                    state.has_failed_operation = true;
                    state.error_message = Some(detail.clone());
                    if let Some(errors) = validation {
                        state.validation_errors = errors;
                    }
                    Err(detail)
                }
            }
        };

        self.inner.operations.after.emit(&AfterOperation {
            operation,
            record: Some(id),
            success: result.is_ok(),
        });
        self.notify(flags);

        match result {
            Ok(()) => {
                debug!(record = %id, %operation, "operation succeeded");
                OperationOutcome::Succeeded
            }
            Err(detail) => {
                let message = operation.failure_message(&detail);
                warn!(record = %id, %operation, error = %detail, "operation failed");
                self.inner.operations.error.emit(&CrudError {
                    operation,
                    record: Some(id),
                    message: message.clone(),
                });
                OperationOutcome::Failed { message }
            }
        }
    }
}
