//! Guardrail oracle backed by a chat model answering YES or NO.

use async_trait::async_trait;
use refdesk_config::ProviderConfig;
use refdesk_core::{GuardrailOracle, Message, OUT_OF_SCOPE, OracleError, Verdict};
use std::sync::Arc;
use tracing::debug;

use crate::openai_compat::{ChatMessage, ChatRequest, OpenAiCompatClient};
use crate::prompts::intent_prompt;

pub struct ChatGuardrailOracle {
    client: Arc<OpenAiCompatClient>,
    model: String,
}

impl ChatGuardrailOracle {
    pub fn new(client: Arc<OpenAiCompatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_config(client: Arc<OpenAiCompatClient>, config: &ProviderConfig) -> Self {
        Self::new(client, &config.model)
    }
}

#[async_trait]
impl GuardrailOracle for ChatGuardrailOracle {
    fn name(&self) -> &str {
        "intent-model"
    }

    async fn classify(&self, message: &str, context: &[Message]) -> Result<Verdict, OracleError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(intent_prompt(message, context))],
            temperature: 0.0,
            tools: Vec::new(),
        };
        let reply = self.client.complete(&request).await?;
        debug!(reply = %reply.content.trim(), "Intent classifier replied");
        interpret(&reply.content)
    }
}

/// Map the classifier's reply to a verdict. Anything but a clear YES or NO
/// is an error, which the guardrail treats as a rejection.
fn interpret(reply: &str) -> Result<Verdict, OracleError> {
    let word: String = reply
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    match word.as_str() {
        "YES" => Ok(Verdict::allowed().with_rationale("classifier answered YES")),
        "NO" => Ok(Verdict::rejected(OUT_OF_SCOPE).with_rationale("classifier answered NO")),
        _ => Err(OracleError::Malformed(format!(
            "expected YES or NO from the intent classifier, got {:?}",
            reply.trim()
        ))),
    }
}
