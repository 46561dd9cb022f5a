//! Long-term memory for rago.
//!
//! [`MemoryService`] sits on a [`MemoryStore`](rago_core::MemoryStore) and an
//! [`EntityStore`](rago_core::EntityStore). Backends: in-memory, and SQLite
//! behind the default `sqlite` feature.

pub mod in_memory;
pub mod service;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::{InMemoryEntityStore, InMemoryMemoryStore};
pub use service::{MemoryService, Retrieved, render_context};
pub use vector::cosine_similarity;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteEntityStore, SqliteMemoryStore};
