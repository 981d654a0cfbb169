//! Observer lists and event payloads.
//!
//! Every event is delivered synchronously, in registration order. Handlers
//! run with no internal lock held, so a handler may subscribe, unsubscribe,
//! emit further events or call back into the record that raised the event.

use crate::record::{Record, RecordId};
use parking_lot::RwLock;
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`EventHandlers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An ordered list of callbacks for one event type.
pub struct EventHandlers<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, Handler<E>)>>,
}

impl<E> EventHandlers<E> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Appends a handler and returns its subscription handle.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    /// Invokes every handler registered at the time of the call.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl<E> Default for EventHandlers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for EventHandlers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("len", &self.len())
            .finish()
    }
}

/// The network-affecting operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Reload from the service (a record's `read`, a recordset's bulk fetch).
    Refresh,
    /// Discard local edits.
    Undo,
    /// Save changes (`create` for new records, `update` otherwise).
    Update,
    /// Delete the entity.
    Delete,
}

impl Operation {
    /// User-facing verb used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Operation::Refresh => "Refresh",
            Operation::Undo => "Undo Changes",
            Operation::Update => "Save Changes",
            Operation::Delete => "Delete",
        }
    }

    /// Formats the message surfaced through the error event.
    pub fn failure_message(self, detail: &str) -> String {
        format!("{} was not successful: {}", self.label(), detail)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Flags describing a record's state-changed notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    /// Save the other changed records (when automatic saving is on).
    pub save_cascade: bool,
    /// The record asks to become the current record.
    pub set_focus: bool,
    /// The cursor must not follow this record.
    pub suppress_focus: bool,
    /// A pristine new record is about to take its first edit.
    pub new_record_dirtied: bool,
}

impl ChangeFlags {
    /// No flags set.
    pub const PLAIN: Self = Self {
        save_cascade: false,
        set_focus: false,
        suppress_focus: false,
        new_record_dirtied: false,
    };

    /// Only the save cascade flag set.
    pub const SAVE_CASCADE: Self = Self {
        save_cascade: true,
        set_focus: false,
        suppress_focus: false,
        new_record_dirtied: false,
    };

    /// Focus request, which also triggers the save cascade.
    pub const FOCUS: Self = Self {
        save_cascade: true,
        set_focus: true,
        suppress_focus: false,
        new_record_dirtied: false,
    };

    /// Sent once, just before the first edit of a pristine new record.
    pub const NEW_RECORD_DIRTIED: Self = Self {
        save_cascade: false,
        set_focus: false,
        suppress_focus: false,
        new_record_dirtied: true,
    };

    /// Returns these flags with focus movement suppressed.
    #[must_use]
    pub const fn suppressed(mut self) -> Self {
        self.suppress_focus = true;
        self
    }
}

/// Emitted by a record after every transition.
pub struct StateChanged<M> {
    /// The record that changed.
    pub record: Record<M>,
    /// What the recordset should do about it.
    pub flags: ChangeFlags,
    /// For focus requests: whether focus was set by program rather than by
    /// the user.
    pub by_program: bool,
}

/// Emitted before a network-affecting operation. Any handler may cancel it.
#[derive(Debug)]
pub struct BeforeOperation {
    /// The operation about to run.
    pub operation: Operation,
    /// The record, or `None` for a recordset-level refresh.
    pub record: Option<RecordId>,
    cancelled: Cell<bool>,
}

impl BeforeOperation {
    pub(crate) fn new(operation: Operation, record: Option<RecordId>) -> Self {
        Self {
            operation,
            record,
            cancelled: Cell::new(false),
        }
    }

    /// Cancels the operation. Later handlers still run and see the flag.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Returns true if a handler cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// Emitted after a network-affecting operation that was not cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterOperation {
    /// The operation that ran.
    pub operation: Operation,
    /// The record, or `None` for a recordset-level refresh.
    pub record: Option<RecordId>,
    /// Whether it succeeded.
    pub success: bool,
}

/// Emitted once per failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudError {
    /// The operation that failed.
    pub operation: Operation,
    /// The record, or `None` for a recordset-level refresh.
    pub record: Option<RecordId>,
    /// Formatted, user-facing message.
    pub message: String,
}

/// Structural change to a recordset's collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordsChanged {
    /// A record was appended.
    Added(RecordId),
    /// A record was removed.
    Removed(RecordId),
    /// The whole collection was rebuilt.
    Reset,
}

/// Aggregate notification: something in the recordset changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordsetChanged {
    /// The record whose notification caused this, if any.
    pub source: Option<RecordId>,
}

/// Lifecycle and error events shared by a recordset and all its records.
#[derive(Debug, Default)]
pub struct OperationEvents {
    /// Cancellable, fired before the service is called.
    pub before: EventHandlers<BeforeOperation>,
    /// Fired after the service call returned.
    pub after: EventHandlers<AfterOperation>,
    /// Fired once per failed operation.
    pub error: EventHandlers<CrudError>,
}

impl OperationEvents {
    /// Fires `before` and returns true if a handler cancelled it.
    pub(crate) fn fire_before(&self, operation: Operation, record: Option<RecordId>) -> bool {
        let event = BeforeOperation::new(operation, record);
        self.before.emit(&event);
        event.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn handlers_run_in_registration_order() {
        let handlers = EventHandlers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Arc::clone(&seen);
            handlers.subscribe(move |value: &u32| seen.lock().push(format!("{tag}{value}")));
        }

        handlers.emit(&1);
        assert_eq!(*seen.lock(), ["a1", "b1", "c1"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let handlers = EventHandlers::<()>::new();
        let first = handlers.subscribe(|_| {});
        let _second = handlers.subscribe(|_| {});

        assert!(handlers.unsubscribe(first));
        assert!(!handlers.unsubscribe(first));
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn handler_may_subscribe_during_emit() {
        let handlers = Arc::new(EventHandlers::<()>::new());
        let inner = Arc::clone(&handlers);
        handlers.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        handlers.emit(&());
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn cancellation_is_visible_to_later_handlers() {
        let events = OperationEvents::default();
        let observed = Arc::new(Mutex::new(None));

        events.before.subscribe(|event: &BeforeOperation| event.cancel());
        let seen = Arc::clone(&observed);
        events
            .before
            .subscribe(move |event: &BeforeOperation| *seen.lock() = Some(event.is_cancelled()));

        assert!(events.fire_before(Operation::Delete, None));
        assert_eq!(*observed.lock(), Some(true));
    }

    #[test]
    fn failure_messages() {
        assert_eq!(
            Operation::Update.failure_message("server said no"),
            "Save Changes was not successful: server said no"
        );
        assert_eq!(
            Operation::Delete.failure_message("gone"),
            "Delete was not successful: gone"
        );
        assert_eq!(Operation::Undo.to_string(), "Undo Changes");
    }

    #[test]
    fn flag_presets() {
        assert!(!ChangeFlags::PLAIN.save_cascade);
        assert!(ChangeFlags::SAVE_CASCADE.save_cascade);
        assert!(ChangeFlags::FOCUS.set_focus && ChangeFlags::FOCUS.save_cascade);
        assert!(ChangeFlags::SAVE_CASCADE.suppressed().suppress_focus);
        let dirtied = ChangeFlags::NEW_RECORD_DIRTIED;
        assert!(dirtied.new_record_dirtied);
        assert!(!dirtied.save_cascade && !dirtied.set_focus);
        assert!(!ChangeFlags::PLAIN.new_record_dirtied);
        assert!(!ChangeFlags::FOCUS.new_record_dirtied);
    }
}
