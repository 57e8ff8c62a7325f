//! Context handed to agent units: the per-run [`SharedContext`] log and the
//! size-bounded [`ContextBundle`] built from it for each invocation.

mod builder;
mod shared;

pub use builder::{
    BACKGROUND, CONVERSATION, ContextBuilder, ContextBundle, ContextLimits, ConversationTurn,
    PRIOR_CONTEXT, PromptBundle, SIBLING_OUTPUTS, Section,
};
pub use shared::{ContextEntry, SharedContext, truncate_chars};
