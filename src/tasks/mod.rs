//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Expiry purge: drops registry records for keys the backend has expired

mod cleanup;

pub use cleanup::spawn_cleanup_task;
