//! Scripted oracles and stub tools for driving turns in tests.
//!
//! Compiled for this crate's own tests and, behind the `test-util`
//! feature, for integration tests elsewhere in the workspace.

use async_trait::async_trait;
use refdesk_core::{
    GuardrailOracle, InvocationError, Message, OUT_OF_SCOPE, OracleError, OracleOutput, ReasoningOracle,
    StepRequest, ToolDescriptor, ToolExecutor, ToolOutput, Verdict,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the oracle was shown on one call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub history: usize,
    pub steps: usize,
    pub tools: Vec<String>,
    pub correction: Option<String>,
}

/// A reasoning oracle that replays a fixed script.
///
/// Panics when the script runs out, unless built with [`ScriptedOracle::repeating`].
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<OracleOutput, OracleError>>>,
    repeat: Option<OracleOutput>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedOracle {
    pub fn new(outputs: Vec<OracleOutput>) -> Self {
        Self::with_results(outputs.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<OracleOutput, OracleError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return the same output forever.
    pub fn repeating(output: OracleOutput) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            repeat: Some(output),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The corrective message shown on each call, in order.
    pub fn corrections(&self) -> Vec<Option<String>> {
        self.requests().into_iter().map(|r| r.correction).collect()
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn next_step(&self, request: &StepRequest<'_>) -> Result<OracleOutput, OracleError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            history: request.history.len(),
            steps: request.steps.len(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
            correction: request.correction.map(String::from),
        });

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(output)) => Ok(output.clone()),
            (None, None) => panic!("ScriptedOracle: no more outputs"),
        }
    }
}

type Handler = Box<dyn Fn(usize, &str, &Value) -> Result<ToolOutput, InvocationError> + Send + Sync>;

/// Tool executor with a scripted handler. The handler gets the 1-based call number.
pub struct StubTools {
    descriptors: Vec<ToolDescriptor>,
    handler: Handler,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubTools {
    pub fn new(
        descriptors: Vec<ToolDescriptor>,
        handler: impl Fn(usize, &str, &Value) -> Result<ToolOutput, InvocationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            descriptors,
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Tools with the given names and an open argument schema.
    pub fn named(
        names: &[&str],
        handler: impl Fn(&str, &Value) -> Result<ToolOutput, InvocationError> + Send + Sync + 'static,
    ) -> Self {
        let descriptors = names
            .iter()
            .map(|n| ToolDescriptor::new(*n, format!("Tool named {n}"), json!({"type": "object"})))
            .collect();
        Self::new(descriptors, move |_, name, args| handler(name, args))
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reference_descriptors() -> Vec<ToolDescriptor> {
        let isin = json!({
            "type": "object",
            "properties": {"isin": {"type": "string"}},
            "required": ["isin"]
        });
        vec![
            ToolDescriptor::new("get_instrument_details", "Instrument details for an ISIN", isin.clone()),
            ToolDescriptor::new("get_bond_rating", "Credit ratings for an ISIN", isin),
            ToolDescriptor::new(
                "search_issuer",
                "Search issuers by name",
                json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
            ),
        ]
    }

    /// Answers every call like a small reference-data server.
    pub fn reference_data() -> Self {
        Self::new(Self::reference_descriptors(), |_, name, args| match name {
            "get_bond_rating" => Ok(ToolOutput::text(format!(
                "{}: AA+ (S&P), Aaa (Moody's)",
                args["isin"].as_str().unwrap_or_default()
            ))),
            "search_issuer" => Ok(ToolOutput::text(format!(
                "{} Inc. LEI HWUPKR0MPOU8FGXBT394",
                args["name"].as_str().unwrap_or_default()
            ))),
            other => Err(InvocationError::UnknownTool(other.to_string())),
        })
    }

    /// Every call fails with `error`.
    pub fn failing(error: InvocationError) -> Self {
        Self::new(Self::reference_descriptors(), move |_, _, _| Err(error.clone()))
    }

    /// The first `failures` calls time out, later ones succeed.
    pub fn flaky(failures: usize) -> Self {
        Self::new(Self::reference_descriptors(), move |n, name, _| {
            if n <= failures {
                Err(InvocationError::Timeout {
                    tool_name: name.to_string(),
                    timeout_ms: 30_000,
                })
            } else {
                Ok(ToolOutput::text("AA+"))
            }
        })
    }

    /// Cancels the turn from inside the call, then reports a lost process.
    pub fn cancelling_on_call(cancel: CancellationToken) -> Self {
        Self::new(Self::reference_descriptors(), move |_, _, _| {
            cancel.cancel();
            Err(InvocationError::ToolProcessUnavailable("stopped".into()))
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for StubTools {
    async fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolOutput, InvocationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(n, name, arguments)
    }
}

enum GuardrailBehaviour {
    Fixed(Verdict),
    Fail,
    Hang,
}

/// A guardrail oracle with a fixed behaviour.
pub struct StaticGuardrail {
    behaviour: GuardrailBehaviour,
    calls: AtomicUsize,
}

impl StaticGuardrail {
    fn with(behaviour: GuardrailBehaviour) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn allow() -> Self {
        Self::with(GuardrailBehaviour::Fixed(Verdict::allowed()))
    }

    pub fn reject() -> Self {
        Self::with(GuardrailBehaviour::Fixed(Verdict::rejected(OUT_OF_SCOPE)))
    }

    pub fn failing() -> Self {
        Self::with(GuardrailBehaviour::Fail)
    }

    pub fn hanging() -> Self {
        Self::with(GuardrailBehaviour::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuardrailOracle for StaticGuardrail {
    fn name(&self) -> &str {
        "static"
    }

    async fn classify(&self, _message: &str, _context: &[Message]) -> Result<Verdict, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            GuardrailBehaviour::Fixed(verdict) => Ok(verdict.clone()),
            GuardrailBehaviour::Fail => Err(OracleError::Network("connection refused".into())),
            GuardrailBehaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Verdict::allowed())
            }
        }
    }
}

/// A reasoning oracle that panics on its first call.
pub struct PanickingOracle;

#[async_trait]
impl ReasoningOracle for PanickingOracle {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn next_step(&self, _request: &StepRequest<'_>) -> Result<OracleOutput, OracleError> {
        panic!("oracle exploded")
    }
}
