//! In-process configuration and state store.
//!
//! The store holds named tables of string field-value rows and notifies
//! subscribed watchers of row-level changes. Config tables are written
//! by the northbound side and watched by the tunnel manager; state
//! tables are written by the tunnel manager and watched by whoever
//! cares about tunnel status.
//!
//! Updates carry both the old and new row image so a watcher can tell
//! which columns actually changed without keeping its own shadow copy.

pub mod rows;
pub mod store;

pub use rows::{FieldValue, FieldValues, FieldValuesExt, Operation, RowUpdate};
pub use store::Store;
