//! Query guardrail — decides whether a question may reach the tools at all.
//!
//! The decision itself is delegated to a [`GuardrailOracle`]. The guardrail
//! adds the policy around it: a bounded wait, fail-closed on any oracle
//! problem, one verdict per turn cached in the session, and a
//! `GuardrailResult` event whenever a verdict is decided.

use async_trait::async_trait;
use refdesk_config::GuardrailConfig;
use refdesk_core::{
    EventPayload, GUARDRAIL_UNAVAILABLE, GuardrailOracle, Message, OUT_OF_SCOPE, OracleError,
    SessionState, Verdict,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{info, warn};

use crate::emitter::EventEmitter;

pub struct Guardrail {
    oracle: Arc<dyn GuardrailOracle>,
    timeout: Duration,
}

impl Guardrail {
    pub fn new(oracle: Arc<dyn GuardrailOracle>) -> Self {
        Self {
            oracle,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the oracle, failing closed on error or timeout.
    pub async fn classify(&self, message: &str, context: &[Message]) -> Verdict {
        match tokio::time::timeout(self.timeout, self.oracle.classify(message, context)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(oracle = self.oracle.name(), error = %e, "Guardrail oracle failed, rejecting");
                Verdict::rejected(GUARDRAIL_UNAVAILABLE).with_rationale(e.to_string())
            }
            Err(_) => {
                let ms = self.timeout.as_millis() as u64;
                warn!(oracle = self.oracle.name(), timeout_ms = ms, "Guardrail oracle timed out, rejecting");
                Verdict::rejected(GUARDRAIL_UNAVAILABLE)
                    .with_rationale(OracleError::Timeout(ms).to_string())
            }
        }
    }

    /// The turn's verdict. Decided once; later calls return the cached value
    /// without consulting the oracle or emitting again.
    pub async fn check(&self, session: &mut SessionState, emitter: &EventEmitter) -> Verdict {
        if let Some(verdict) = &session.verdict {
            return verdict.clone();
        }

        let verdict = self
            .classify(session.user_message(), session.prior_messages())
            .await;
        info!(
            session = %session.id,
            allowed = verdict.is_allowed(),
            "Guardrail verdict"
        );

        session.verdict = Some(verdict.clone());
        emitter
            .emit(EventPayload::GuardrailResult {
                verdict: verdict.clone(),
            })
            .await;
        verdict
    }
}

static TOKEN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").ok());

/// Deterministic rule engine: in scope when the message mentions a
/// reference-data term or contains an ISIN-shaped token.
pub struct KeywordClassifier {
    keywords: HashSet<String>,
}

impl KeywordClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &GuardrailConfig) -> Self {
        Self::new(&config.keywords)
    }

    /// The first term that puts `message` in scope, if any.
    pub fn find_match(&self, message: &str) -> Option<String> {
        let re = TOKEN_RE.as_ref()?;
        re.find_iter(message).find_map(|m| {
            let token = m.as_str();
            if is_isin(token) {
                Some(token.to_uppercase())
            } else {
                let lower = token.to_lowercase();
                self.keywords.contains(&lower).then_some(lower)
            }
        })
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::from_config(&GuardrailConfig::default())
    }
}

/// Two letters, nine alphanumerics, one check digit.
pub fn is_isin(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 12
        && bytes[..2].iter().all(u8::is_ascii_alphabetic)
        && bytes[2..11].iter().all(u8::is_ascii_alphanumeric)
        && bytes[11].is_ascii_digit()
        && bytes[2..11].iter().any(u8::is_ascii_digit)
}

#[async_trait]
impl GuardrailOracle for KeywordClassifier {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn classify(&self, message: &str, _context: &[Message]) -> Result<Verdict, OracleError> {
        Ok(match self.find_match(message) {
            Some(term) => Verdict::allowed().with_rationale(format!("mentions '{term}'")),
            None => Verdict::rejected(OUT_OF_SCOPE)
                .with_rationale("no reference-data terms or identifiers found"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::StaticGuardrail;
    use refdesk_core::{Conversation, SessionId};
    use tokio_util::sync::CancellationToken;

    fn emitter() -> (EventEmitter, tokio::sync::mpsc::Receiver<refdesk_core::StreamEvent>) {
        EventEmitter::channel(SessionId::new(), 16, CancellationToken::new())
    }

    #[tokio::test]
    async fn keyword_classifier_scenarios() {
        let classifier = KeywordClassifier::default();
        let cases = [
            ("What is the capital of France?", false),
            ("Lookup bond issuer Apple", true),
            ("Who is the issuer for ISIN US912810TS08?", true),
            ("Find the rating for Apple's bond US037833AS99.", true),
            ("Search for issuers with 'Treasury' in their name.", true),
            ("What's the weather like in Paris?", false),
            ("US037833AS99", true),
            ("Tell me about BONDING with my dog", false),
        ];
        for (message, allowed) in cases {
            let verdict = classifier.classify(message, &[]).await.unwrap();
            assert_eq!(verdict.is_allowed(), allowed, "{message}");
        }
    }

    #[test]
    fn isin_shape() {
        assert!(is_isin("US037833AS99"));
        assert!(is_isin("us912810ts08"));
        assert!(!is_isin("US037833AS9"));
        assert!(!is_isin("US037833AS9X"));
        assert!(!is_isin("1S037833AS99"));
        assert!(!is_isin("CONSTITUTION"));
    }

    #[tokio::test]
    async fn rejection_reason_is_out_of_scope() {
        let classifier = KeywordClassifier::new(["bond"]);
        assert!(classifier.find_match("capital of France").is_none());
        assert_eq!(classifier.find_match("Bond yields?").as_deref(), Some("bond"));

        match classifier.classify("capital of France", &[]).await.unwrap() {
            Verdict::Rejected { reason, .. } => assert_eq!(reason, OUT_OF_SCOPE),
            other => panic!("Expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verdict_is_cached_per_turn() {
        let oracle = Arc::new(StaticGuardrail::allow());
        let guardrail = Guardrail::new(oracle.clone());
        let mut session = SessionState::new(Conversation::new(), "Rating for US037833AS99");
        let (emitter, mut rx) = emitter();

        assert!(guardrail.check(&mut session, &emitter).await.is_allowed());
        assert!(guardrail.check(&mut session, &emitter).await.is_allowed());
        assert_eq!(oracle.calls(), 1);
        drop(emitter);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.event_type(), "guardrail_result");
    }

    #[tokio::test]
    async fn oracle_failure_fails_closed() {
        let guardrail = Guardrail::new(Arc::new(StaticGuardrail::failing()));
        let verdict = guardrail.classify("Rating for US037833AS99", &[]).await;
        assert_eq!(
            verdict,
            Verdict::rejected(GUARDRAIL_UNAVAILABLE).with_rationale(
                OracleError::Network("connection refused".into()).to_string()
            )
        );
    }

    #[tokio::test]
    async fn oracle_timeout_fails_closed() {
        let guardrail = Guardrail::new(Arc::new(StaticGuardrail::hanging()))
            .with_timeout(Duration::from_millis(50));
        match guardrail.classify("bond", &[]).await {
            Verdict::Rejected { reason, .. } => assert_eq!(reason, GUARDRAIL_UNAVAILABLE),
            other => panic!("Expected rejection, got {other:?}"),
        }
    }
}
