//! Notification channels for run reports.
//!
//! Delivery is best-effort: callers log a [`NotifyError`] and move on, the
//! git work of the run is never rolled back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use twinsync_core::{NotifySettings, PairName, RemotePair, RunId};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to write report to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notification endpoint {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("notification endpoint {url} unreachable: {detail}")]
    Transport { url: String, detail: String },
}

/// A rendered report addressed to one pair's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub pair: PairName,
    pub run_id: RunId,
    pub subject: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    /// Channel name for log lines and receipts.
    fn channel(&self) -> &'static str;

    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Build the notifier configured for `pair`.
pub fn notifier_for(home: &Path, pair: &RemotePair) -> Box<dyn Notifier> {
    match &pair.notify {
        NotifySettings::None => Box::new(LogNotifier),
        NotifySettings::File { dir } => Box::new(FileNotifier::new(
            dir.clone().unwrap_or_else(|| outbox_dir_at(home)),
        )),
        NotifySettings::Webhook {
            url,
            recipient,
            token_env,
            token,
        } => {
            let token = token
                .clone()
                .or_else(|| token_env.as_deref().and_then(|v| std::env::var(v).ok()))
                .filter(|t| !t.is_empty());
            if token.is_none() {
                tracing::warn!("webhook notifier for '{}' has no credential", pair.name);
            }
            Box::new(WebhookNotifier::new(url.clone(), recipient.clone(), token))
        }
    }
}

/// `~/.twinsync/outbox/`
pub fn outbox_dir_at(home: &Path) -> PathBuf {
    home.join(".twinsync").join("outbox")
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// Writes the subject to the log; the body is only logged at debug level.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        "log"
    }

    fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        tracing::info!("{}", n.subject);
        tracing::debug!("{}", n.body);
        Ok(())
    }
}

/// Writes `<dir>/<pair>-<run id>.txt`.
pub struct FileNotifier {
    dir: PathBuf,
}

impl FileNotifier {
    pub fn new(dir: PathBuf) -> Self {
        FileNotifier { dir }
    }

    pub fn path_for(&self, n: &Notification) -> PathBuf {
        self.dir.join(format!("{}-{}.txt", n.pair, n.run_id))
    }
}

impl Notifier for FileNotifier {
    fn channel(&self) -> &'static str {
        "file"
    }

    fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| NotifyError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(n);
        let contents = format!("Subject: {}\n\n{}", n.subject, n.body);
        std::fs::write(&path, contents).map_err(|source| NotifyError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!("report written to {}", path.display());
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// POSTs `{to, subject, body}` as JSON with a bearer credential.
pub struct WebhookNotifier {
    agent: ureq::Agent,
    url: String,
    recipient: String,
    token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: String, recipient: String, token: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("twinsync/", env!("CARGO_PKG_VERSION")))
            .build();
        WebhookNotifier {
            agent,
            url,
            recipient,
            token,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn channel(&self) -> &'static str {
        "webhook"
    }

    fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let mut req = self.agent.post(&self.url);
        if let Some(token) = &self.token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        let payload = WebhookPayload {
            to: &self.recipient,
            subject: &n.subject,
            body: &n.body,
        };
        req.send_json(&payload).map_err(|e| match e {
            ureq::Error::Status(status, _) => NotifyError::Status {
                url: self.url.clone(),
                status,
            },
            ureq::Error::Transport(t) => NotifyError::Transport {
                url: self.url.clone(),
                detail: t.to_string(),
            },
        })?;
        tracing::info!("report sent to {}", self.recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn notification() -> Notification {
        Notification {
            pair: PairName::from("eew"),
            run_id: RunId("20260101T000000Z-manual".to_string()),
            subject: "[twinsync] OK: eew no-op".to_string(),
            body: "Verdict: OK\n".to_string(),
        }
    }

    #[test]
    fn file_notifier_writes_subject_and_body() {
        let tmp = TempDir::new().unwrap();
        let notifier = FileNotifier::new(tmp.path().join("outbox"));
        let n = notification();
        notifier.send(&n).unwrap();
        let written = std::fs::read_to_string(notifier.path_for(&n)).unwrap();
        assert!(written.starts_with("Subject: [twinsync] OK: eew no-op\n\n"));
        assert!(written.ends_with("Verdict: OK\n"));
        assert!(notifier
            .path_for(&n)
            .ends_with("eew-20260101T000000Z-manual.txt"));
    }

    #[test]
    fn channel_follows_settings() {
        let tmp = TempDir::new().unwrap();
        let mut pair = RemotePair::new(
            PairName::from("eew"),
            twinsync_core::RemoteSpec::new("https://s/x.git", "main"),
            twinsync_core::RemoteSpec::new("https://h/x", "main"),
        );
        assert_eq!(notifier_for(tmp.path(), &pair).channel(), "log");
        pair.notify = NotifySettings::File { dir: None };
        assert_eq!(notifier_for(tmp.path(), &pair).channel(), "file");
        pair.notify = NotifySettings::Webhook {
            url: "http://127.0.0.1:9/hook".to_string(),
            recipient: "ops@example.com".to_string(),
            token_env: None,
            token: Some("t".to_string()),
        };
        assert_eq!(notifier_for(tmp.path(), &pair).channel(), "webhook");
    }

    #[test]
    fn unreachable_webhook_is_transport_error() {
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:9/hook".to_string(),
            "ops@example.com".to_string(),
            None,
        );
        let err = notifier.send(&notification()).unwrap_err();
        assert!(matches!(err, NotifyError::Transport { .. }), "got {err:?}");
    }
}
