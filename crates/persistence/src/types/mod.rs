//! Core types for the record store.
//!
//! - [`Entry`] - a versioned record handed to and returned from the store
//! - [`EntrySummary`] - a content-free listing result
//! - [`Snapshot`] - a persisted, ordered list of version keys
//! - [`Tag`] - a `(term, scheme, label)` triple carried by entries

mod entry;
pub(crate) mod record;
mod snapshot;

pub use entry::{
    BINARY_COLLECTION, DeletedMarker, Entry, EntryContent, EntryKind, EntrySummary, RecordState,
    Tag,
};
pub use record::{collections, fields, format_version_date};
pub use snapshot::Snapshot;
