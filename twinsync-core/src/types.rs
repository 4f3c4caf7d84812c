//! Pair configuration types for the twinsync registry.
//!
//! A *pair* couples one source remote (the CI-governed repository) with one
//! hosted remote (the deployment target's git storage). All types are
//! serializable via serde + serde_yaml; every section except the two remotes
//! has defaults so a minimal pair file only names the remotes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a remote pair in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairName(pub String);

impl fmt::Display for PairName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PairName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PairName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl PairName {
    /// Pair names become file names, so only a conservative charset is allowed.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && !self.0.starts_with('.')
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

// ---------------------------------------------------------------------------
// Remotes
// ---------------------------------------------------------------------------

/// One git remote: where it lives, which branch is compared, how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpec {
    /// Clone URL (https://…, ssh://…, or a local path for bare repositories).
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    /// Literal token. Prefer `token_env`; a literal token wins when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Username paired with the token in HTTP basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl RemoteSpec {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            token_env: None,
            token: None,
            username: None,
        }
    }

    /// Resolve the token from the literal field or the named environment variable.
    pub fn resolve_token(&self) -> Option<String> {
        self.resolve_token_with(|key| std::env::var(key).ok())
    }

    /// [`resolve_token`](Self::resolve_token) with an injectable lookup (tests).
    pub fn resolve_token_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }
        self.token_env
            .as_deref()
            .and_then(lookup)
            .filter(|t| !t.is_empty())
    }

    /// URL handed to git. HTTP(S) URLs get the token injected as userinfo;
    /// every other scheme (ssh, local paths) is returned unchanged.
    pub fn authenticated_url(&self) -> String {
        match self.resolve_token() {
            Some(token) => {
                let user = self.username.as_deref().unwrap_or("git");
                inject_credentials(&self.url, user, &token)
            }
            None => self.url.clone(),
        }
    }

    /// The URL as it may appear in logs and reports.
    pub fn display_url(&self) -> String {
        redact_url(&self.url)
    }
}

/// Insert `user:token@` into an `http(s)://` URL that carries no userinfo yet.
pub fn inject_credentials(url: &str, user: &str, token: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return url.to_string();
    }
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.contains('@') {
        return url.to_string();
    }
    format!(
        "{scheme}://{}:{}@{rest}",
        urlencoding::encode(user),
        urlencoding::encode(token)
    )
}

/// Identity of a remote for comparisons: userinfo dropped, scheme and host
/// lowercased, trailing `/` and `.git` stripped. Local paths only lose
/// trailing slashes, since `x.git` and `x` are different directories.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.trim_end_matches('/').to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let mut path = path.trim_end_matches('/');
    if let Some(stripped) = path.strip_suffix(".git") {
        path = stripped.trim_end_matches('/');
    }
    format!(
        "{}://{}{path}",
        scheme.to_ascii_lowercase(),
        host.to_ascii_lowercase()
    )
}

/// Replace any userinfo in a URL with `***`.
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    match authority.rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

/// Hosted platform API used for status and log queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedApiSpec {
    /// e.g. `https://huggingface.co`
    pub base_url: String,
    /// e.g. `owner/space-name`
    pub space_id: String,
}

// ---------------------------------------------------------------------------
// Settings sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_monitor_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_monitor_timeout() -> u64 {
    900
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_monitor_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl MonitorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Log collection and archival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    /// Commit fetched logs back into the source remote.
    #[serde(default = "default_true")]
    pub archive: bool,
    /// Directory inside the repository that receives `build_*.log` / `run_*.log`.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Number of most recent entries quoted in the report.
    #[serde(default = "default_excerpt_entries")]
    pub excerpt_entries: usize,
    #[serde(default = "default_archive_message")]
    pub commit_message: String,
    /// Upper bound on lines read from one log stream.
    #[serde(default = "default_max_lines")]
    pub max_lines_per_stream: usize,
    /// The runtime stream never ends on its own; a read stalled this long ends it.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("hf_deploy_logs")
}

fn default_excerpt_entries() -> usize {
    20
}

fn default_archive_message() -> String {
    "chore: archive deployment logs [skip ci]".to_string()
}

fn default_max_lines() -> usize {
    2000
}

fn default_read_timeout() -> u64 {
    10
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            archive: true,
            archive_dir: default_archive_dir(),
            excerpt_entries: default_excerpt_entries(),
            commit_message: default_archive_message(),
            max_lines_per_stream: default_max_lines(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

/// Identity and options used when the engine itself creates commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSettings {
    #[serde(default)]
    pub allow_unrelated_histories: bool,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_author_name() -> String {
    "twinsync".to_string()
}

fn default_author_email() -> String {
    "twinsync@localhost".to_string()
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            allow_unrelated_histories: false,
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

/// Outbound notification channel for run reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotifySettings {
    /// Reports are only logged.
    #[default]
    None,
    /// Reports are written as text files; defaults to `~/.twinsync/outbox/`.
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dir: Option<PathBuf>,
    },
    /// Reports are POSTed as JSON `{to, subject, body}`.
    Webhook {
        url: String,
        recipient: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

impl fmt::Display for NotifySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifySettings::None => write!(f, "none"),
            NotifySettings::File { .. } => write!(f, "file"),
            NotifySettings::Webhook { .. } => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_schedule_interval")]
    pub interval_secs: u64,
}

fn default_schedule_interval() -> u64 {
    6 * 60 * 60
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_schedule_interval(),
        }
    }
}

/// Run-lock behaviour when another run holds the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LockSettings {
    /// How long a trigger waits (queues) for the lock before it is skipped.
    #[serde(default)]
    pub wait_secs: u64,
}

// ---------------------------------------------------------------------------
// RemotePair
// ---------------------------------------------------------------------------

/// Root of one `~/.twinsync/pairs/<name>.yaml` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePair {
    pub name: PairName,
    pub source: RemoteSpec,
    pub hosted: RemoteSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_api: Option<HostedApiSpec>,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub logs: LogSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub notify: NotifySettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub lock: LockSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RemotePair {
    /// A pair with default settings for every optional section.
    pub fn new(name: PairName, source: RemoteSpec, hosted: RemoteSpec) -> Self {
        let now = Utc::now();
        Self {
            name,
            source,
            hosted,
            hosted_api: None,
            monitor: MonitorSettings::default(),
            logs: LogSettings::default(),
            merge: MergeSettings::default(),
            notify: NotifySettings::default(),
            schedule: ScheduleSettings::default(),
            lock: LockSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPair {
            pair: self.name.0.clone(),
            reason: reason.to_string(),
        };
        if !self.name.is_valid() {
            return Err(invalid(
                "name may only contain ASCII letters, digits, '-', '_' and '.'",
            ));
        }
        for (label, remote) in [("source", &self.source), ("hosted", &self.hosted)] {
            if remote.url.trim().is_empty() {
                return Err(invalid(&format!("{label}.url is empty")));
            }
            if remote.branch.trim().is_empty() {
                return Err(invalid(&format!("{label}.branch is empty")));
            }
        }
        if normalize_remote_url(&self.source.url) == normalize_remote_url(&self.hosted.url)
            && self.source.branch == self.hosted.branch
        {
            return Err(invalid("source and hosted name the same remote branch"));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(invalid("monitor.poll_interval_secs must be greater than zero"));
        }
        if self.schedule.enabled && self.schedule.interval_secs == 0 {
            return Err(invalid("schedule.interval_secs must be greater than zero"));
        }
        if let NotifySettings::Webhook { url, recipient, .. } = &self.notify {
            if url.trim().is_empty() || recipient.trim().is_empty() {
                return Err(invalid("notify webhook needs both url and recipient"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
