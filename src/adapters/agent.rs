//! Agent server client.
//!
//! Endpoints:
//! - POST /validate  `{"text": task}` -> `{"valid": bool, "reason": str}`
//! - POST /gemini    `{"text", "timeout", "headless", "max_steps"}`
//!                   -> `{"success": bool, "message": str}`
//!
//! The run request blocks until the agent finishes, so its timeout is the
//! agent's own timeout plus a grace period.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::RunOutcome;

/// Extra time the server gets to answer after the agent's own timeout
const RESPONSE_GRACE: Duration = Duration::from_secs(30);

/// Options for one automation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRunOptions {
    /// Agent timeout in seconds
    pub timeout_seconds: u64,

    /// Run the browser without a window
    pub headless: bool,

    /// Maximum agent steps
    pub max_steps: u32,
}

impl Default for AgentRunOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            headless: false,
            max_steps: 50,
        }
    }
}

/// Validation verdict for a task
#[derive(Debug, Clone, Deserialize)]
pub struct Validation {
    #[serde(default = "default_valid")]
    pub valid: bool,

    #[serde(default)]
    pub reason: Option<String>,
}

fn default_valid() -> bool {
    true
}

/// Final result of an automation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationResult {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub message: Option<String>,
}

impl AutomationResult {
    /// The terminal signal this result represents
    pub fn outcome(&self) -> RunOutcome {
        if self.success {
            RunOutcome::Completed
        } else {
            RunOutcome::Failed {
                message: self
                    .message
                    .clone()
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            }
        }
    }
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    text: &'a str,
    timeout: u64,
    headless: bool,
    max_steps: u32,
}

/// HTTP client for the agent server
pub struct AgentClient {
    validate_url: String,
    run_url: String,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(validate_url: String, run_url: String, client: reqwest::Client) -> Self {
        Self {
            validate_url,
            run_url,
            client,
        }
    }

    /// Ask the server whether it can carry out `task`
    pub async fn validate(&self, task: &str) -> Result<Validation> {
        let response = self
            .client
            .post(&self.validate_url)
            .json(&ValidateRequest { text: task })
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.validate_url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Validation error ({}): {}", status, text)
        }

        let validation: Validation = response
            .json()
            .await
            .context("Failed to parse validation response")?;
        debug!(valid = validation.valid, "Task validated");
        Ok(validation)
    }

    /// Run the automation and wait for its result
    pub async fn run(&self, task: &str, options: &AgentRunOptions) -> Result<AutomationResult> {
        info!(
            max_steps = options.max_steps,
            headless = options.headless,
            timeout_seconds = options.timeout_seconds,
            "Submitting automation run"
        );

        let response = self
            .client
            .post(&self.run_url)
            .timeout(Duration::from_secs(options.timeout_seconds) + RESPONSE_GRACE)
            .json(&RunRequest {
                text: task,
                timeout: options.timeout_seconds,
                headless: options.headless,
                max_steps: options.max_steps,
            })
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.run_url))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read automation response")?;

        // Failed runs may still come back with a result body
        match serde_json::from_str::<AutomationResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) if !status.is_success() => {
                anyhow::bail!("Agent server error ({}): {}", status, body.trim())
            }
            Err(e) => Err(e).context("Failed to parse automation response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_outcome() {
        let ok: AutomationResult = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert_eq!(ok.outcome(), RunOutcome::Completed);

        let failed: AutomationResult =
            serde_json::from_str(r#"{"success": false, "message": "login button missing"}"#).unwrap();
        assert_eq!(
            failed.outcome(),
            RunOutcome::Failed {
                message: "login button missing".to_string()
            }
        );

        let bare: AutomationResult = serde_json::from_str("{}").unwrap();
        assert!(matches!(bare.outcome(), RunOutcome::Failed { .. }));
    }

    #[test]
    fn test_validation_defaults_to_valid() {
        let validation: Validation = serde_json::from_str("{}").unwrap();
        assert!(validation.valid);
        assert!(validation.reason.is_none());
    }

    #[test]
    fn test_run_request_shape() {
        let options = AgentRunOptions::default();
        let request = RunRequest {
            text: "open example.com",
            timeout: options.timeout_seconds,
            headless: options.headless,
            max_steps: options.max_steps,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "text": "open example.com",
                "timeout": 120,
                "headless": false,
                "max_steps": 50
            })
        );
    }
}
