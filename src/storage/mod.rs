//! Storage subsystem: the C3–C7 backends (abstract trait, in-memory,
//! filesystem, stacked snapshots, and the namespace factory).

mod file;
mod factory;
mod listing;
mod memory;
mod stacked;
mod traits;

pub use factory::{Persist, StorageFactory};
pub use file::{sanitize as sanitize_key, FileStorage};
pub use memory::MemoryStorage;
pub use stacked::StackedMemoryStorage;
pub use traits::{
    ListRequest, ListResult, RangeSpec, ResolvedRange, Storage, StorageError, StoredKeyRecord,
    StoredMeta, StoredValue,
};
