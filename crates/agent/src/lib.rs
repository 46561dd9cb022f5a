//! The rago execution engine.
//!
//! A run follows the **ReAct** cycle:
//!
//! 1. **Route** the goal to an intent and **recall** relevant memories
//! 2. **Build context** (system prompt + session history + goal)
//! 3. **Ask the LLM** with the federated tool catalog
//! 4. **If tool calls**: dispatch them through the registry, append the
//!    observations, and loop back to step 3
//! 5. **If text only**: that is the answer; persist it and write back
//!    anything worth remembering
//!
//! The loop ends at the first text-only round, at the round cap (with a
//! partial answer), on cancellation, or on a fatal error. Plan mode drives
//! the same loop through a stored list of steps.

pub mod engine;
pub mod prompt;
pub mod router;
pub mod stream_event;

pub use engine::{Engine, RunHandle, RunOutcome, RunRequest, RunStatus};
pub use router::{RouteMatch, SemanticRouter};
pub use stream_event::{EventStream, RunEvent};
pub use tokio_util::sync::CancellationToken;
