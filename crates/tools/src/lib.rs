//! Tool federation for rago.
//!
//! Every capability the agent can invoke is routed through one
//! [`ToolRegistry`] under a federated name:
//!
//! | Provider | Name |
//! |----------|------|
//! | Protocol server | `mcp_<server>_<tool>` |
//! | Skill | `skill_<id>` |
//! | Retrieval | `rag_query`, `rag_ingest` |
//!
//! The registry follows the server manager through [`rago_mcp::InstanceObserver`]:
//! catalogs are imported when a server reaches `running` and marked
//! unavailable when it leaves.

pub mod cache;
pub mod mcp_tool;
pub mod naming;
pub mod rag;
pub mod rate_limit;
pub mod registry;
pub mod skills;

#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;

pub use mcp_tool::McpTool;
pub use rag::{RagIngestTool, RagQueryTool};
pub use registry::{ToolRegistry, ToolStats};
pub use skills::{Skill, SkillLoader, SkillTool};

use rago_core::Retriever;
use rago_core::tool::ProviderKind;
use std::sync::Arc;

/// Register the retrieval tools backed by `retriever`.
pub fn register_rag_tools(registry: &ToolRegistry, retriever: Arc<dyn Retriever>) {
    registry.register_tool(Arc::new(RagQueryTool::new(Arc::clone(&retriever))), ProviderKind::Rag);
    registry.register_tool(Arc::new(RagIngestTool::new(retriever)), ProviderKind::Rag);
}
