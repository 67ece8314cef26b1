//! Storage for Cadence: the full-text index, the chronicle and the journal.

pub mod chunking;
pub mod in_memory;
pub mod journal;
pub mod stamp;

#[cfg(feature = "sqlite")]
pub mod chronicle;
#[cfg(feature = "sqlite")]
pub mod db;
#[cfg(feature = "sqlite")]
pub mod fulltext;

pub use chunking::{ChunkSpec, chunk_text, content_hash};
pub use in_memory::InMemoryChronicle;
pub use journal::{FileJournal, PiiMasker};

#[cfg(feature = "sqlite")]
pub use chronicle::SqliteChronicle;
#[cfg(feature = "sqlite")]
pub use fulltext::{SqliteTextIndex, list_sources};
