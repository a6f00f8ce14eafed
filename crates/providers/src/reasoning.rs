//! Reasoning oracle backed by a chat model with function calling.

use async_trait::async_trait;
use refdesk_config::ProviderConfig;
use refdesk_core::{
    OracleError, OracleOutput, ReasoningOracle, ReasoningStep, Role, StepAction, StepRequest,
};
use std::sync::Arc;
use tracing::debug;

use crate::openai_compat::{ChatMessage, ChatRequest, OpenAiCompatClient};
use crate::prompts::REASONING_SYSTEM_PROMPT;

pub struct ChatReasoningOracle {
    client: Arc<OpenAiCompatClient>,
    model: String,
    temperature: f32,
}

impl ChatReasoningOracle {
    pub fn new(client: Arc<OpenAiCompatClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.0,
        }
    }

    pub fn from_config(client: Arc<OpenAiCompatClient>, config: &ProviderConfig) -> Self {
        Self::new(client, &config.model).with_temperature(config.temperature)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, request: &StepRequest<'_>) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: render_messages(request),
            temperature: self.temperature,
            tools: request.tools.to_vec(),
        }
    }
}

#[async_trait]
impl ReasoningOracle for ChatReasoningOracle {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn next_step(&self, request: &StepRequest<'_>) -> Result<OracleOutput, OracleError> {
        let chat = self.build_request(request);
        let reply = self.client.complete(&chat).await?;
        debug!(
            model = %reply.model,
            tool_calls = reply.tool_calls.len(),
            "Reasoning oracle replied"
        );
        Ok(OracleOutput {
            content: reply.content,
            tool_calls: reply.tool_calls,
        })
    }
}

/// Chat transcript for one step: system prompt, conversation, then this
/// turn's steps as function calls and their results.
pub(crate) fn render_messages(request: &StepRequest<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(REASONING_SYSTEM_PROMPT)];

    for m in request.history {
        match m.role {
            Role::User => messages.push(ChatMessage::user(&m.content)),
            Role::Assistant => messages.push(ChatMessage::assistant(&m.content)),
            // Tool results only exist inside a turn, as steps.
            Role::Tool => {}
        }
    }

    let last = request.steps.len().saturating_sub(1);
    for (i, step) in request.steps.iter().enumerate() {
        render_step(&mut messages, step, (i == last).then_some(request.correction).flatten());
    }

    messages
}

fn render_step(messages: &mut Vec<ChatMessage>, step: &ReasoningStep, correction: Option<&str>) {
    let observation = step.observation.as_ref().map(|o| o.content.as_str());

    match &step.action {
        StepAction::ToolCall {
            tool_name,
            arguments,
            ..
        } => {
            let call_id = format!("step_{}", step.index);
            let thought = Some(step.thought.clone()).filter(|t| !t.trim().is_empty());
            messages.push(ChatMessage::assistant_call(
                thought,
                &call_id,
                tool_name,
                arguments.to_string(),
            ));
            messages.push(ChatMessage::tool(call_id, observation.unwrap_or("No result")));
        }
        StepAction::Unparseable { raw, reason } => {
            messages.push(ChatMessage::assistant(raw));
            let note = correction
                .map(String::from)
                .unwrap_or_else(|| format!("Your previous reply could not be used: {reason}"));
            messages.push(ChatMessage::user(note));
        }
        StepAction::FinalAnswer { text } => messages.push(ChatMessage::assistant(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use refdesk_core::{ErrorKind, Message, Observation, ToolDescriptor};
    use serde_json::json;
    use std::time::Duration;

    fn step(index: u64, action: StepAction, observation: Option<Observation>) -> ReasoningStep {
        ReasoningStep {
            index,
            thought: format!("thought {index}"),
            action,
            observation,
            timestamp: Utc::now(),
        }
    }

    fn tool_step(index: u64) -> ReasoningStep {
        step(
            index,
            StepAction::ToolCall {
                tool_name: "search_issuer".into(),
                arguments: json!({"name": "Apple"}),
                invocation_ids: vec![format!("call_{index}")],
            },
            Some(Observation::success("Apple Inc. LEI HWUPKR0MPOU8FGXBT394")),
        )
    }

    fn unparseable_step(index: u64) -> ReasoningStep {
        step(
            index,
            StepAction::Unparseable {
                raw: "Action: ???".into(),
                reason: "missing Action Input".into(),
            },
            Some(Observation::failure(ErrorKind::UnparseableAction, "missing Action Input")),
        )
    }

    #[test]
    fn first_step_is_system_plus_history() {
        let history = vec![Message::user("Lookup bond issuer Apple")];
        let request = StepRequest {
            history: &history,
            steps: &[],
            tools: &[],
            correction: None,
        };
        let messages = render_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1], ChatMessage::user("Lookup bond issuer Apple"));
    }

    #[test]
    fn tool_steps_become_call_and_result_pairs() {
        let history = vec![Message::user("Lookup bond issuer Apple")];
        let steps = vec![tool_step(0)];
        let request = StepRequest {
            history: &history,
            steps: &steps,
            tools: &[],
            correction: None,
        };
        let messages = render_messages(&request);
        assert_eq!(messages.len(), 4);

        let call = &messages[2];
        assert_eq!(call.role, "assistant");
        assert_eq!(call.content.as_deref(), Some("thought 0"));
        let calls = call.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "step_0");
        assert_eq!(calls[0].function.name, "search_issuer");
        assert_eq!(calls[0].function.arguments, r#"{"name":"Apple"}"#);

        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("step_0"));
        assert!(messages[3].content.as_deref().unwrap().contains("HWUPKR0MPOU8FGXBT394"));
    }

    #[test]
    fn correction_follows_latest_unparseable_step() {
        let history = vec![Message::user("rating for US037833AS99")];
        let steps = vec![unparseable_step(0), tool_step(1), unparseable_step(2)];
        let request = StepRequest {
            history: &history,
            steps: &steps,
            tools: &[],
            correction: Some("Reply with a tool call or a final answer."),
        };
        let messages = render_messages(&request);

        // system, user, (assistant, user), (assistant call, tool), (assistant, user)
        assert_eq!(messages.len(), 8);
        assert_eq!(
            messages[3].content.as_deref(),
            Some("Your previous reply could not be used: missing Action Input")
        );
        assert_eq!(
            messages[7].content.as_deref(),
            Some("Reply with a tool call or a final answer.")
        );
    }

    #[test]
    fn prior_turns_are_replayed_without_tool_messages() {
        let history = vec![
            Message::user("Who issued US912810TS08?"),
            Message::tool_result("call_0", "stray"),
            Message::assistant("The U.S. Treasury."),
            Message::user("And its maturity?"),
        ];
        let request = StepRequest {
            history: &history,
            steps: &[],
            tools: &[],
            correction: None,
        };
        let roles: Vec<_> = render_messages(&request)
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[test]
    fn request_offers_discovered_tools() {
        let client = Arc::new(
            OpenAiCompatClient::new("test", "http://localhost", "sk", Duration::from_secs(1)).unwrap(),
        );
        let oracle = ChatReasoningOracle::new(client, "gpt-4o").with_temperature(0.2);
        let tools = vec![ToolDescriptor::new("get_bond_rating", "Ratings", json!({"type": "object"}))];
        let history = vec![Message::user("rating?")];
        let chat = oracle.build_request(&StepRequest {
            history: &history,
            steps: &[],
            tools: &tools,
            correction: None,
        });
        assert_eq!(chat.model, "gpt-4o");
        assert_eq!(chat.temperature, 0.2);
        assert_eq!(chat.tools.len(), 1);
        assert_eq!(oracle.name(), "test");
    }
}
