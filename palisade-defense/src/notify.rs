//! Notification dispatch: detections fan out to pluggable channels.
//!
//! Senders are fire-and-forget by contract; delivery problems must never
//! fail the request path that triggered them.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Delivery channel class. Email and SMS are high-urgency channels; the
/// orchestrator only routes to them above threat level 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    Dashboard,
    Email,
    Sms,
    Webhook,
}

impl ChannelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChannelKind::Dashboard => "dashboard",
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One outbound alert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatNotification {
    pub timestamp: DateTime<Utc>,
    pub channel: ChannelKind,
    pub threat_level: u8,
    pub threat_types: std::collections::BTreeSet<String>,
    /// Response action label, e.g. `block`.
    pub action: String,
    pub details: String,
    /// Filled by [`ChainedNotifier`].
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Filled by [`ChainedNotifier`].
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub prev_hash: Option<String>,
}

/// Where notifications go. Implement this for a paging or alerting
/// integration.
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: ThreatNotification);
}

/// Emits notifications through `tracing`, severity mapped to the threat
/// level.
pub struct TracingNotifier;

impl NotificationSender for TracingNotifier {
    fn send(&self, n: ThreatNotification) {
        if n.threat_level >= 4 {
            tracing::error!(
                channel = %n.channel,
                level = n.threat_level,
                action = %n.action,
                types = ?n.threat_types,
                "threat notification"
            );
        } else if n.threat_level == 3 {
            tracing::warn!(
                channel = %n.channel,
                level = n.threat_level,
                action = %n.action,
                types = ?n.threat_types,
                "threat notification"
            );
        } else {
            tracing::info!(
                channel = %n.channel,
                level = n.threat_level,
                action = %n.action,
                types = ?n.threat_types,
                "threat notification"
            );
        }
    }
}

/// Collects notifications in memory. Useful for tests and dashboards.
#[derive(Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<ThreatNotification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<ThreatNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSender for InMemoryNotifier {
    fn send(&self, notification: ThreatNotification) {
        self.sent.lock().unwrap().push(notification);
    }
}

/// Appends one JSON line per notification to a file. Write failures are
/// reported on stderr and otherwise dropped.
pub struct FileNotifier {
    path: PathBuf,
}

impl FileNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NotificationSender for FileNotifier {
    fn send(&self, notification: ThreatNotification) {
        let line = match serde_json::to_string(&notification) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("notification serialize failed: {}", e);
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = result {
            eprintln!("notification write failed: {}", e);
        }
    }
}

struct ChainState {
    sequence: u64,
    prev_hash: String,
}

/// Wraps any sender with a tamper-evident hash chain: each notification
/// gets a sequence number and the SHA-256 of the previous notification's
/// JSON, so an auditor can detect dropped or reordered alerts. The chain
/// starts from a fixed genesis digest.
pub struct ChainedNotifier {
    inner: Arc<dyn NotificationSender>,
    state: Mutex<ChainState>,
}

impl ChainedNotifier {
    pub fn new(inner: Arc<dyn NotificationSender>) -> Self {
        Self {
            inner,
            state: Mutex::new(ChainState {
                sequence: 0,
                prev_hash: format!("{:x}", Sha256::digest(b"palisade-notify-genesis")),
            }),
        }
    }
}

impl NotificationSender for ChainedNotifier {
    fn send(&self, mut notification: ThreatNotification) {
        let mut state = self.state.lock().unwrap();
        notification.sequence = Some(state.sequence);
        notification.prev_hash = Some(state.prev_hash.clone());

        // Hash the stamped notification so the chain covers sequence and
        // linkage fields too.
        if let Ok(json) = serde_json::to_string(&notification) {
            state.prev_hash = format!("{:x}", Sha256::digest(json.as_bytes()));
        }
        state.sequence += 1;
        drop(state);

        self.inner.send(notification);
    }
}
