//! Completion client for OpenAI-style `/v1/completions` endpoints.
//!
//! Failures never propagate as errors. A service that answers without
//! `choices` yields an `Error: ...` string, and a transport or decoding
//! failure yields an `Exception: ...` string. Both flow through the sweep
//! like any other output and end up labelled `unknown`.

use crate::config::CompletionConfig;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Prefix of an in-band service error
pub const ERROR_PREFIX: &str = "Error:";
/// Prefix of an in-band transport or decoding failure
pub const EXCEPTION_PREFIX: &str = "Exception:";

/// Errors that can occur while building a client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Anything that turns a prompt into raw completion text
pub trait CompletionClient {
    /// Complete `prompt`, returning the raw continuation or an error sentinel
    fn complete(&self, prompt: &str, max_tokens: u32) -> String;

    /// Identifier recorded in logs
    fn name(&self) -> &str;
}

/// Whether `output` is an in-band failure marker rather than model text
#[must_use]
pub fn is_error_sentinel(output: &str) -> bool {
    output.starts_with(ERROR_PREFIX) || output.starts_with(EXCEPTION_PREFIX)
}

/// Request body sent to the completion endpoint
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f64,
    pub stop: Option<Vec<String>>,
}

/// Blocking HTTP completion client
pub struct HttpCompletionClient {
    endpoint: String,
    model: String,
    temperature: f64,
    client: reqwest::blocking::Client,
}

impl HttpCompletionClient {
    /// Create a client from the completion section of the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &CompletionConfig) -> Result<Self, ClientError> {
        Self::with_timeout(config, config.timeout())
    }

    /// Create a client with an explicit request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn with_timeout(config: &CompletionConfig, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, prompt: &str, max_tokens: u32) -> Result<serde_json::Value, reqwest::Error> {
        let body = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens,
            temperature: self.temperature,
            stop: None,
        };
        self.client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()?
            .json()
    }
}

impl CompletionClient for HttpCompletionClient {
    fn complete(&self, prompt: &str, max_tokens: u32) -> String {
        let start = Instant::now();
        let output = match self.request(prompt, max_tokens) {
            Ok(body) => extract_text(&body),
            Err(e) => format!("{EXCEPTION_PREFIX} {e}"),
        };
        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis(),
            failed = is_error_sentinel(&output),
            "Completion finished"
        );
        output
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Pull `choices[0].text` out of a completion response body
#[must_use]
pub fn extract_text(body: &serde_json::Value) -> String {
    if body.get("choices").is_none() {
        return format!("{ERROR_PREFIX} {body}");
    }
    body.pointer("/choices/0/text")
        .and_then(serde_json::Value::as_str)
        .map_or_else(
            || format!("{EXCEPTION_PREFIX} completion response has no choices[0].text"),
            |text| text.trim().to_string(),
        )
}
