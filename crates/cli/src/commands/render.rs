//! Turns stream events into terminal output.

use refdesk_core::{ErrorKind, EventPayload, InvocationStatus, StreamEvent};

/// Longest tool output echoed in human mode.
const MAX_OUTPUT_PREVIEW: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    /// One JSON object per event
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json { Self::Json } else { Self::Human }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    mode: OutputMode,
}

impl Renderer {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Printed before the first event.
    pub fn begin(&self) -> Option<String> {
        match self.mode {
            OutputMode::Human => Some("🔍 Analyzing intent...".into()),
            OutputMode::Json => None,
        }
    }

    pub fn format(&self, event: &StreamEvent) -> Option<String> {
        match self.mode {
            OutputMode::Json => serde_json::to_string(event).ok(),
            OutputMode::Human => human(&event.payload),
        }
    }
}

fn human(payload: &EventPayload) -> Option<String> {
    match payload {
        // Rejections are reported by the terminal event.
        EventPayload::GuardrailResult { verdict } => verdict
            .is_allowed()
            .then(|| "✅ Intent verified. Processing...".to_string()),

        EventPayload::ThoughtEmitted { thought, .. } => {
            let thought = thought.trim();
            (!thought.is_empty()).then(|| format!("💭 {thought}"))
        }

        EventPayload::ToolCallStarted {
            tool_name,
            arguments,
            attempt,
            ..
        } => {
            let retry = if *attempt > 1 {
                format!(" (attempt {attempt})")
            } else {
                String::new()
            };
            Some(format!("🛠️ Calling Tool: `{tool_name}`{retry}\n   Args: `{arguments}`"))
        }

        EventPayload::ToolCallFinished {
            tool_name,
            status,
            output,
            error,
            duration_ms,
            ..
        } => Some(match status {
            InvocationStatus::Success => {
                let mut line = format!("✅ Tool `{tool_name}` Finished ({duration_ms} ms)");
                if let Some(output) = output {
                    line.push_str(&format!("\n   {}", preview(output)));
                }
                line
            }
            _ => format!(
                "⚠️ Tool `{tool_name}` failed: {}",
                error.as_deref().unwrap_or("unknown error")
            ),
        }),

        EventPayload::FinalAnswer { text, .. } => Some(format!("\n{text}")),

        EventPayload::Error {
            kind,
            message,
            partial_answer,
        } => Some(match kind {
            ErrorKind::Rejected | ErrorKind::GuardrailUnavailable => {
                format!("❌ **Request Rejected**: {message}")
            }
            _ => {
                let mut text = format!("Error: {message}");
                if let Some(partial) = partial_answer {
                    text.push_str(&format!("\n\n{partial}"));
                }
                text
            }
        }),
    }
}

fn preview(output: &str) -> String {
    let flat = output.replace('\n', " ");
    if flat.chars().count() <= MAX_OUTPUT_PREVIEW {
        return flat;
    }
    let cut: String = flat.chars().take(MAX_OUTPUT_PREVIEW).collect();
    format!("{cut}...")
}
