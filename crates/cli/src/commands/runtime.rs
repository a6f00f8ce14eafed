//! Wiring shared by `ask`, `chat` and `tools`.

use refdesk_agent::{Guardrail, KeywordClassifier, LoopConfig, ReasoningLoop, SessionController, TurnReport};
use refdesk_config::{AppConfig, GuardrailMode};
use refdesk_core::{Conversation, GuardrailOracle};
use refdesk_protocol::{ClientOptions, ProtocolClient, StdioConnector};
use refdesk_providers::{ChatGuardrailOracle, ChatReasoningOracle, OpenAiCompatClient};
use std::io::Write;
use std::sync::Arc;

use super::render::Renderer;

pub struct Runtime {
    pub client: Arc<ProtocolClient>,
    pub controller: Arc<SessionController>,
}

impl Runtime {
    pub fn build(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let http = Arc::new(OpenAiCompatClient::from_config(&config.provider)?);

        let classifier: Arc<dyn GuardrailOracle> = match config.guardrail.mode {
            GuardrailMode::Model => Arc::new(ChatGuardrailOracle::from_config(
                http.clone(),
                &config.provider,
            )),
            GuardrailMode::Keywords => Arc::new(KeywordClassifier::from_config(&config.guardrail)),
        };
        let guardrail = Guardrail::new(classifier).with_timeout(config.guardrail.timeout());

        let client = Arc::new(tool_client(config));
        let oracle = Arc::new(ChatReasoningOracle::from_config(http, &config.provider));
        let reasoning =
            ReasoningLoop::new(oracle, client.clone()).with_config(LoopConfig::from(&config.agent));

        let controller = SessionController::new(guardrail, reasoning)
            .with_stream_capacity(config.stream.buffer_capacity)
            .with_rejection_message(config.guardrail.rejection_message.clone());

        Ok(Self {
            client,
            controller: Arc::new(controller),
        })
    }

    /// Run one turn, rendering events as they arrive. Ctrl+C cancels the turn.
    pub async fn turn(
        &self,
        conversation: Conversation,
        message: &str,
        renderer: &Renderer,
    ) -> Result<TurnReport, Box<dyn std::error::Error>> {
        let mut handle = self.controller.start_turn(conversation, message);

        let cancel = handle.cancel_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        let mut out = std::io::stdout();
        if let Some(line) = renderer.begin() {
            writeln!(out, "{line}")?;
        }
        while let Some(event) = handle.next_event().await {
            if let Some(text) = renderer.format(&event) {
                writeln!(out, "{text}")?;
                out.flush()?;
            }
        }
        interrupt.abort();

        Ok(handle.finish().await?)
    }
}

/// A protocol client for the configured tool server. Connects lazily.
pub fn tool_client(config: &AppConfig) -> ProtocolClient {
    let server = &config.tool_server;
    let mut connector =
        StdioConnector::new(&server.command, server.args.clone()).with_inherit_env(server.inherit_env);
    if let Some(dir) = &server.working_dir {
        connector = connector.with_working_dir(dir);
    }

    ProtocolClient::new(
        connector,
        ClientOptions {
            invocation_timeout: server.invocation_timeout(),
            serialize_dispatch: server.serialize_dispatch,
            ..Default::default()
        },
    )
}

/// Fail early, with setup instructions, when no API key is configured.
pub fn require_api_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !config.needs_api_key() {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    OPENAI_API_KEY  = 'sk-...'");
    eprintln!("    REFDESK_API_KEY = 'sk-...'   (takes precedence)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
