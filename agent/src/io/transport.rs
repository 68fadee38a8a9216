//! Executor-side transport to the controller's `step` operation.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use tracing::{debug, instrument};

use crate::controller::Controller;
use crate::core::types::{ErrorBody, StepRequest, StepResponse};
use crate::io::reasoner::Reasoner;
use crate::io::store::ConversationStore;

/// Path of the step endpoint relative to the controller base URL.
pub const STEP_PATH: &str = "/v1/agent/step";

/// Sends one step request and waits for the controller's answer.
///
/// Any `Err` is a transport or controller fault and ends the run.
pub trait ControllerClient {
    fn step(&self, request: &StepRequest) -> Result<StepResponse>;
}

/// Blocking HTTP client for a remote controller.
pub struct HttpControllerClient {
    client: Client,
    url: String,
}

impl HttpControllerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build controller HTTP client")?;
        Ok(Self {
            client,
            url: step_url(base_url),
        })
    }
}

impl ControllerClient for HttpControllerClient {
    #[instrument(skip_all, fields(url = %self.url))]
    fn step(&self, request: &StepRequest) -> Result<StepResponse> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .with_context(|| format!("POST {}", self.url))?;

        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("read response from {}", self.url))?;
        debug!(status = status.as_u16(), "controller responded");

        if !status.is_success() {
            return Err(rejection(status.as_u16(), &body));
        }
        serde_json::from_str(&body).context("decode step response")
    }
}

/// Runs the controller in-process. Used by tests and single-binary setups.
pub struct LocalControllerClient<R, S> {
    controller: Controller<R, S>,
}

impl<R: Reasoner, S: ConversationStore> LocalControllerClient<R, S> {
    pub fn new(controller: Controller<R, S>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Controller<R, S> {
        &self.controller
    }
}

impl<R: Reasoner, S: ConversationStore> ControllerClient for LocalControllerClient<R, S> {
    fn step(&self, request: &StepRequest) -> Result<StepResponse> {
        Ok(self.controller.handle(request.clone())?)
    }
}

fn step_url(base_url: &str) -> String {
    format!("{}{STEP_PATH}", base_url.trim_end_matches('/'))
}

fn rejection(status: u16, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error, message }) => {
            anyhow!("controller rejected step ({status} {error}): {message}")
        }
        Err(_) => anyhow!("controller returned {status}: {}", body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_url_joins_without_double_slash() {
        assert_eq!(
            step_url("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080/v1/agent/step"
        );
        assert_eq!(step_url("http://host"), "http://host/v1/agent/step");
    }

    #[test]
    fn structured_rejections_keep_kind_and_message() {
        let err = rejection(
            404,
            r#"{"error":"unknown_conversation","message":"unknown conversation 'x'"}"#,
        );
        assert_eq!(
            err.to_string(),
            "controller rejected step (404 unknown_conversation): unknown conversation 'x'"
        );
    }

    #[test]
    fn unstructured_rejections_keep_body() {
        let err = rejection(502, "Bad Gateway\n");
        assert_eq!(err.to_string(), "controller returned 502: Bad Gateway");
    }
}
