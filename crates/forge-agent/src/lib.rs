//! Agent runtime: reply parsing, loop guards and the ReAct loop that drives
//! a local model through the file tools.

pub mod agent_loop;
pub mod extract;
mod garble;
pub mod guards;
pub mod mode;
pub mod nudge;
pub mod parser;
pub mod prompts;
mod prune;
pub mod registry;
mod relaxed;
pub mod request;
pub mod sanitize;
pub mod state;
mod stream_filter;
pub mod summary;

pub use agent_loop::{AgentLoop, DEFAULT_MAX_STEPS, Failure, RunOutcome};
pub use garble::is_garbled;
pub use guards::{GuardKind, action_signature};
pub use mode::{Mode, ModeKind};
pub use parser::{Action, ParsedReply, parse_reply};
pub use prune::prune_history;
pub use registry::RunRegistry;
pub use request::{RequestTags, RunRequest, parse_tags};
pub use sanitize::sanitize;
pub use state::AgentState;
pub use stream_filter::StreamFilter;
