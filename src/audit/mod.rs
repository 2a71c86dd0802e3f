//! Bounded audit log of network and authentication events.
//!
//! Every attempt made by the resilient client and every authentication step
//! lands here. The buffer is capped (FIFO eviction) and persisted so the
//! history survives restarts for offline diagnostics.

mod entry;
mod store;

pub use entry::{AuditEvent, AuditKind, AuditLogEntry, AuthAction, unix_millis};
pub use store::{AuditLogStore, AuditStats, MAX_ENTRIES};
