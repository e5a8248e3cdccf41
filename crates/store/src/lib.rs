pub mod aggregate;
pub mod journal;
pub mod store;

pub use aggregate::{AggregateEntry, CategoryAggregate, ENTRY_SEPARATOR, category_slug, split_entries};
pub use journal::IdJournal;
pub use store::{AggregateStore, StoreError, write_atomic};
