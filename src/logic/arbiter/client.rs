//! Local LLM Client
//!
//! HTTP client for an OpenAI-compatible completion server on loopback (or the
//! LAN, when explicitly allowed in config).
//!
//! The interception path is synchronous, so the client owns a small tokio
//! runtime and drives each request with `block_on(timeout(..))`. When the
//! timeout fires the request future is dropped, which cancels the call; a
//! late response is never observed.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ArbiterError;
use crate::logic::command::CommandEvent;
use crate::logic::config::LlmSection;
use crate::logic::features::FeatureVector;

use super::prompt::build_prompt;
use super::verdict::{parse_verdict, LlmVerdict};
use super::Arbiter;

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

// ============================================================================
// CLIENT
// ============================================================================

/// LLM arbiter backed by a local completion endpoint
pub struct LlmClient {
    endpoint: String,
    model: String,
    max_tokens: u32,
    min_confidence: f32,
    http_client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl LlmClient {
    /// Build a client from the `[llm]` config section.
    ///
    /// Must not be called from inside an async runtime.
    pub fn new(config: &LlmSection) -> Result<Self, ArbiterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ArbiterError::Runtime(e.to_string()))?;

        // No proxy: command content must stay on this machine
        let http_client = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| ArbiterError::Runtime(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            min_confidence: config.min_confidence,
            http_client,
            runtime,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One bounded request, errors kept typed
    pub fn request_verdict(
        &self,
        event: &CommandEvent,
        vector: &FeatureVector,
        reasoning_context: &str,
        timeout: Duration,
    ) -> Result<LlmVerdict, ArbiterError> {
        let body = CompletionRequest {
            model: &self.model,
            prompt: build_prompt(event, vector, reasoning_context),
            max_tokens: self.max_tokens,
            temperature: 0.1,
        };
        let timeout_ms = timeout.as_millis() as u64;

        let text = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, self.complete(&body)).await })
            .map_err(|_| ArbiterError::Timeout(timeout_ms))??;

        parse_verdict(&text, self.min_confidence)
    }

    async fn complete(&self, body: &CompletionRequest<'_>) -> Result<String, ArbiterError> {
        let url = format!("{}/v1/completions", self.endpoint);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArbiterError::Status(status.as_u16()));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ArbiterError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| ArbiterError::Malformed("response has no choices".to_string()))
    }

    /// Probe `GET /v1/models`
    pub fn is_available(&self, timeout: Duration) -> bool {
        let url = format!("{}/v1/models", self.endpoint);
        let probe = async {
            match self.http_client.get(&url).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(_) => false,
            }
        };
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, probe).await })
            .unwrap_or(false)
    }
}

impl Arbiter for LlmClient {
    fn assess(
        &self,
        event: &CommandEvent,
        vector: &FeatureVector,
        reasoning_context: &str,
        timeout: Duration,
    ) -> LlmVerdict {
        let started = Instant::now();
        match self.request_verdict(event, vector, reasoning_context, timeout) {
            Ok(verdict) => {
                log::debug!(
                    "LLM verdict for {}: {} ({:.2}) in {} ms",
                    event.id,
                    verdict.decision.as_str(),
                    verdict.confidence,
                    started.elapsed().as_millis()
                );
                verdict
            }
            Err(e) => {
                log::warn!("LLM arbiter failed for {}: {}", event.id, e);
                LlmVerdict::from_error(&e)
            }
        }
    }
}

fn map_request_error(e: reqwest::Error) -> ArbiterError {
    if e.is_timeout() {
        ArbiterError::Timeout(0)
    } else if e.is_decode() {
        ArbiterError::Malformed(e.to_string())
    } else {
        ArbiterError::Connection(e.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::arbiter::VerdictDecision;
    use crate::logic::command::{EnvironmentFingerprint, ExecutionContext};
    use crate::logic::features::{extract, ExtractionContext};
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn config_for(port: u16, timeout_ms: u64) -> LlmSection {
        LlmSection {
            endpoint: format!("http://127.0.0.1:{}", port),
            timeout_ms,
            ..LlmSection::default()
        }
    }

    fn sample() -> (CommandEvent, FeatureVector) {
        let ctx = ExecutionContext {
            working_directory: "/tmp/project".into(),
            session_id: "test".to_string(),
            current_branch: None,
            environment: EnvironmentFingerprint::capture(&[], &[]),
        };
        let event = CommandEvent::new("rm -rf build", vec!["rm".into(), "-rf".into(), "build".into()], &ctx);
        let vector = extract("rm -rf build", &ExtractionContext::new("/tmp/project"));
        (event, vector)
    }

    /// Answer one request with a completion whose text is `text`
    fn serve_once(text: &str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = serde_json::json!({ "choices": [{ "text": text }] }).to_string();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let mut request = Vec::new();
                // Read headers and the JSON body
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.ends_with(b"}") {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    #[test]
    fn test_connection_refused_escalates() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = LlmClient::new(&config_for(port, 1_000)).unwrap();
        let (event, vector) = sample();

        let verdict = client.assess(&event, &vector, "medium risk", Duration::from_millis(1_000));
        assert_eq!(verdict.decision, VerdictDecision::Escalate);
        assert!(verdict.unavailable);
    }

    #[test]
    fn test_probe_fails_without_server() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = LlmClient::new(&config_for(port, 500)).unwrap();
        assert!(!client.is_available(Duration::from_millis(500)));

        let silent = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = LlmClient::new(&config_for(silent.local_addr().unwrap().port(), 500)).unwrap();
        let started = Instant::now();
        assert!(!client.is_available(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = LlmClient::new(&config_for(port, 200)).unwrap();
        let (event, vector) = sample();

        let started = Instant::now();
        let err = client
            .request_verdict(&event, &vector, "medium risk", Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, ArbiterError::Timeout(200)), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }

    #[test]
    fn test_confident_answer_is_returned() {
        let port = serve_once(r#"{"decision": "allow", "confidence": 0.9, "reasoning": "build dir only"}"#);
        let client = LlmClient::new(&config_for(port, 2_000)).unwrap();
        let (event, vector) = sample();

        let verdict = client.assess(&event, &vector, "medium risk", Duration::from_secs(2));
        assert_eq!(verdict.decision, VerdictDecision::Allow);
        assert!(verdict.is_confident());
    }

    #[test]
    fn test_garbage_answer_escalates() {
        let port = serve_once("I think it is probably fine");
        let client = LlmClient::new(&config_for(port, 2_000)).unwrap();
        let (event, vector) = sample();

        let verdict = client.assess(&event, &vector, "medium risk", Duration::from_secs(2));
        assert_eq!(verdict.decision, VerdictDecision::Escalate);
        assert!(verdict.unavailable);
    }
}
