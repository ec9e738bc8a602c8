//! Append-only audit log with correlation tracking.
//!
//! Every decision and state transition in the gate is recorded as a typed
//! [`AuditEvent`]. Events are never modified or deleted; the storage layer
//! exposes no update or delete operation at all. Within one correlation id,
//! events appear in append order.

mod backup;
mod event;
mod log;

pub use backup::AuditBackup;
pub use event::{AuditEvent, AuditQuery, AuditStats, EventType};
pub use log::AuditLog;
