//! Hosted platform API: deployment status and log streams.
//!
//! [`HostedApi`] is the seam the Deployment Monitor and Log Collector depend
//! on; [`HttpHostedApi`] talks to a Hugging Face–style Spaces API:
//!
//! | Query   | Endpoint                                          |
//! |---------|---------------------------------------------------|
//! | status  | `GET {base}/api/spaces/{id}/runtime`              |
//! | logs    | `GET {base}/api/spaces/{id}/logs/{build\|run}` (SSE) |

use std::io::{BufRead, BufReader};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use twinsync_core::{CommitHash, DeploymentState, HostedApiSpec, LogSettings, LogSource};

#[derive(Debug, Error)]
pub enum HostedApiError {
    #[error("hosted API returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("hosted API request to {url} failed: {detail}")]
    Transport { url: String, detail: String },

    #[error("hosted API response from {url} could not be decoded: {detail}")]
    Decode { url: String, detail: String },

    #[error("no hosted API configured")]
    NotConfigured,
}

/// One observation of the hosted runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeStatus {
    /// Platform stage, e.g. `BUILDING`, `RUNNING`, `BUILD_ERROR`.
    pub stage: String,
    /// Commit the runtime is serving (or building).
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
}

impl RuntimeStatus {
    /// Map the platform stage onto a [`DeploymentState`].
    ///
    /// An observation for a different commit than `expected` says nothing
    /// about our deployment yet, so it counts as `Pending`.
    pub fn state_for(&self, expected: &CommitHash) -> DeploymentState {
        if let Some(sha) = &self.sha {
            if !sha.is_empty() && sha != &expected.0 {
                return DeploymentState::Pending;
            }
        }
        stage_to_state(&self.stage)
    }

    /// Short text recorded as the status excerpt.
    pub fn summary(&self) -> String {
        match &self.error_message {
            Some(msg) if !msg.is_empty() => format!("{}: {}", self.stage, msg),
            _ => self.stage.clone(),
        }
    }
}

pub fn stage_to_state(stage: &str) -> DeploymentState {
    match stage {
        "BUILDING" | "APP_STARTING" | "RUNNING_BUILDING" | "RUNNING_APP_STARTING" => {
            DeploymentState::Building
        }
        "RUNNING" => DeploymentState::Running,
        "BUILD_ERROR" | "RUNTIME_ERROR" | "CONFIG_ERROR" | "NO_APP_FILE" => {
            DeploymentState::Failed
        }
        _ => DeploymentState::Pending,
    }
}

/// Status and log queries against the hosted remote.
pub trait HostedApi: Send + Sync {
    fn status(&self) -> Result<RuntimeStatus, HostedApiError>;

    /// Raw lines of one log stream (SSE framing included), oldest first.
    fn log_lines(&self, source: LogSource) -> Result<Vec<String>, HostedApiError>;
}

// ---------------------------------------------------------------------------
// HttpHostedApi
// ---------------------------------------------------------------------------

pub struct HttpHostedApi {
    agent: ureq::Agent,
    base: String,
    space_id: String,
    token: Option<String>,
    max_lines: usize,
}

impl HttpHostedApi {
    pub fn new(spec: &HostedApiSpec, token: Option<String>, logs: &LogSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(15))
            .timeout_read(Duration::from_secs(logs.read_timeout_secs.max(1)))
            .user_agent(concat!("twinsync/", env!("CARGO_PKG_VERSION")))
            .build();
        HttpHostedApi {
            agent,
            base: spec.base_url.trim_end_matches('/').to_string(),
            space_id: spec.space_id.trim_matches('/').to_string(),
            token,
            max_lines: logs.max_lines_per_stream,
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/api/spaces/{}/{}", self.base, self.space_id, tail)
    }

    fn get(&self, url: &str) -> Result<ureq::Response, HostedApiError> {
        let mut req = self.agent.get(url);
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        req.call().map_err(|e| match e {
            ureq::Error::Status(status, _) => HostedApiError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(t) => HostedApiError::Transport {
                url: url.to_string(),
                detail: t.to_string(),
            },
        })
    }
}

impl HostedApi for HttpHostedApi {
    fn status(&self) -> Result<RuntimeStatus, HostedApiError> {
        let url = self.url("runtime");
        self.get(&url)?
            .into_json::<RuntimeStatus>()
            .map_err(|e| HostedApiError::Decode {
                url,
                detail: e.to_string(),
            })
    }

    fn log_lines(&self, source: LogSource) -> Result<Vec<String>, HostedApiError> {
        let url = self.url(match source {
            LogSource::Build => "logs/build",
            LogSource::Runtime => "logs/run",
        });
        let reader = BufReader::new(self.get(&url)?.into_reader());
        read_bounded(reader, self.max_lines).map_err(|e| HostedApiError::Transport {
            url,
            detail: e.to_string(),
        })
    }
}

/// Read at most `max_lines` lines. The runtime stream stays open while the
/// app runs, so a read timeout is its normal end rather than an error.
fn read_bounded(reader: impl BufRead, max_lines: usize) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        match line {
            Ok(l) => {
                lines.push(l);
                if lines.len() >= max_lines {
                    break;
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(lines)
}
