pub mod client;
pub mod error;
pub mod types;

pub use client::AnthropicClient;
pub use error::AnthropicError;
pub use types::{ContentBlock, Message, MessagesRequest, MessagesResponse, ModelMap, Usage};
