//! # recordkit core
//!
//! Record and recordset state machines for editing entities held by a
//! CRUD-style backend.
//!
//! This crate provides:
//! - `ResultEnvelope`, the uniform result of every service call
//! - `Configuration`, the bundle of async CRUD functions and policy flags
//! - `Record`, one model instance with its edit and operation state
//! - `Recordset`, an ordered collection with a cursor, a pending new record
//!   and the save/focus cascades that keep them consistent
//!
//! ## Architecture
//!
//! A [`Recordset`] loads models through its [`Configuration`] and wraps each
//! in a [`Record`]. Records never call the recordset directly: every
//! transition raises a state-changed notification with [`ChangeFlags`], and
//! the recordset routes it (add a replacement new record, drop deleted
//! records, save the other changed records, move the cursor). The service
//! is only reached through the configuration's functions.
//!
//! ## Key Invariants
//!
//! - A configuration that can create can update, and one that can update
//!   can read
//! - A record has at most one operation in flight
//! - `changed_records` and `invalid_records` only ever contain members
//! - At most one pending new record exists per recordset
//! - Service faults never escape an operation; they surface as
//!   [`OperationOutcome::Failed`] and a [`CrudError`] event

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod envelope;
mod error;
mod events;
mod field;
mod record;
mod recordset;
mod service;
mod task;

pub use config::{BoxFuture, Configuration, ConfigurationBuilder};
pub use envelope::{ResultEnvelope, ValidationErrors};
pub use error::{
    ConfigError, ConfigResult, RecordsetError, RecordsetResult, ServiceError, ServiceResult,
};
pub use events::{
    AfterOperation, BeforeOperation, ChangeFlags, CrudError, EventHandlers, Operation,
    OperationEvents, RecordsChanged, RecordsetChanged, StateChanged, SubscriptionId,
};
pub use field::{FieldDescriptor, FieldSchema};
pub use record::{OperationOutcome, Record, RecordId};
pub use recordset::Recordset;
pub use service::{Capabilities, CrudService};
