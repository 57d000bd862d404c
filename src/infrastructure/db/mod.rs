pub mod document;
pub mod memory;
pub mod pool;
pub mod postgres;

pub use document::{
    Authorization, Document, DocumentStore, ElevatedToken, Filter, StoreError, StoreResult,
};
pub use memory::{JournalEntry, MemoryDocumentStore, WriteOp};
pub use postgres::PgDocumentStore;
