//! LLM adapter abstraction.
//!
//! Agents talk to a model only through [`LlmProvider`]; the call happens inside
//! an activity so the orchestrating workflow never touches the network.

use crate::provider::types::{GenerateConfig, Message};
use anyhow::Result;

/// Core trait that all LLM providers must implement
///
/// # Example
///
/// ```ignore
/// use durable_agents::provider::{GenerateConfig, LlmProvider, Message};
///
/// async fn ask(provider: &dyn LlmProvider) -> anyhow::Result<()> {
///     let messages = vec![Message::system("You are terse."), Message::user("2+2?")];
///     let reply = provider.generate(messages, &GenerateConfig::default()).await?;
///     if reply.has_tool_calls() {
///         println!("tool calls: {:?}", reply.tool_calls);
///     } else {
///         println!("{}", reply.content);
///     }
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate the next assistant message
    ///
    /// # Arguments
    /// * `messages` - System instructions followed by conversation memory
    /// * `config` - Generation configuration (model, temperature, tools, etc.)
    ///
    /// # Returns
    /// An assistant message, optionally carrying tool calls
    async fn generate(&self, messages: Vec<Message>, config: &GenerateConfig) -> Result<Message>;

    /// Provider identifier for logging (e.g. "openai")
    fn provider_name(&self) -> &str;

    /// Model used when the request does not name one
    fn default_model(&self) -> String;
}
