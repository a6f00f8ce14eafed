//! `refdesk ask` — answer one question and exit.

use refdesk_core::{Conversation, TerminationReason};

use super::render::{OutputMode, Renderer};
use super::runtime::{Runtime, load_config, require_api_key};

/// Returns whether the question was answered.
pub async fn run(message: &str, mode: OutputMode) -> Result<bool, Box<dyn std::error::Error>> {
    let config = load_config()?;
    require_api_key(&config)?;

    let runtime = Runtime::build(&config)?;
    let report = runtime
        .turn(Conversation::new(), message, &Renderer::new(mode))
        .await?;
    runtime.client.shutdown().await;

    Ok(report.session.termination() == TerminationReason::Answered)
}
