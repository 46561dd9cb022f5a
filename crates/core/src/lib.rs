//! # Rago Core
//!
//! Domain types, traits, and error definitions for the rago agent runtime.
//! This crate has **no framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here (tools, generators, embedders, retrievers,
//! memory/session/plan storage). Implementations live in their respective
//! crates, so each one can be swapped by configuration or replaced with a
//! scripted double in tests.

pub mod error;
pub mod schema;
pub mod message;
pub mod llm;
pub mod providers;
pub mod tool;
pub mod memory;
pub mod session;
pub mod plan;
pub mod agent;
pub mod event;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, Result};
pub use schema::{PropertySchema, ToolSchema, ValidatedArgs};
pub use message::{Message, MessageToolCall, Role};
pub use llm::{Embedder, GenerateOptions, Generation, Generator, Retriever, ToolDefinition};
pub use providers::ProviderSet;
pub use tool::{ProviderKind, Tool, ToolCall, ToolInfo, ToolOutput};
pub use memory::{Entity, EntityStore, Memory, MemoryQuery, MemoryScope, MemoryStore, MemoryType};
pub use session::{Compaction, Session, SessionBackend};
pub use plan::{Plan, PlanStatus, PlanStore, Step, StepStatus, StepUpdate};
pub use agent::AgentProfile;
pub use event::{DomainEvent, EventBus, ServerState};
