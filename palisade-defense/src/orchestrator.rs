//! Defense orchestration: the full request-to-response loop.
//!
//! [`DefenseOrchestrator`] ties the pipeline together. A request is
//! normalized and scored, the detection is recorded in the encrypted
//! history, and when the verdict crosses the configured sensitivity the
//! tiered response runs: block and re-key at high severity, challenge
//! and rate-limit in the middle, observe below. Every request, hostile
//! or not, feeds the learning models afterwards.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use palisade_cipher::SecurityLevel;

use crate::error::{ConfigError, CryptoError, PersistenceError};
use crate::lifecycle::KeyLifecycleManager;
use crate::notify::{ChannelKind, NotificationSender, ThreatNotification};
use crate::ops::CryptoOperationsService;
use crate::scoring::{
    NormalizedRequest, RawRequest, ThreatScoringEngine, ThreatVerdict, TrainingSample,
};
use crate::store::HistoryStore;
use crate::types::EncryptedPayload;

/// Window applied by challenge-tier rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 300;
/// Requests permitted per window at the challenge tier.
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 30;

// chrono durations overflow near i64::MAX milliseconds; lookback ranges
// are capped at roughly a century.
const MAX_LOOKBACK_SECS: u64 = 100 * 365 * 86_400;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Orchestrator tuning. All fields have working defaults; partial
/// configs deserialize with the remainder filled in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseConfig {
    /// Verdicts at or above this level trigger the automated response.
    pub sensitivity_level: u8,
    /// Master switch for automated responses. When off, every request is
    /// scored and recorded but never acted on.
    pub auto_response: bool,
    /// EWMA rate for model updates, clamped to `0.0..=1.0` by consumers.
    pub learning_rate: f64,
    /// Rotate keys and shorten lifetimes when blocking.
    pub adaptive_encryption: bool,
    /// Mark firewall updates in block-tier responses.
    pub dynamic_firewall: bool,
    /// Deploy decoys in block-tier responses.
    pub deception_technology: bool,
    /// Attach rate-limit directives to challenge-tier responses.
    pub rate_limiting: bool,
    pub notify_dashboard: bool,
    pub notify_email: bool,
    pub notify_sms: bool,
    pub notify_webhook: bool,
    /// Detection history ring size. Values below 1 are treated as 1.
    pub max_history: usize,
    /// Security level the persisted history is encrypted at.
    pub history_security_level: u8,
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            sensitivity_level: 3,
            auto_response: true,
            learning_rate: 0.1,
            adaptive_encryption: true,
            dynamic_firewall: true,
            deception_technology: false,
            rate_limiting: true,
            notify_dashboard: true,
            notify_email: false,
            notify_sms: false,
            notify_webhook: false,
            max_history: 1000,
            history_security_level: 4,
        }
    }
}

impl DefenseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        SecurityLevel::new(self.sensitivity_level)
            .map_err(|_| ConfigError::InvalidLevel(self.sensitivity_level))?;
        SecurityLevel::new(self.history_security_level)
            .map_err(|_| ConfigError::InvalidLevel(self.history_security_level))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response tier, ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResponseAction {
    Monitor,
    Challenge,
    Block,
}

impl ResponseAction {
    pub fn label(&self) -> &'static str {
        match self {
            ResponseAction::Monitor => "monitor",
            ResponseAction::Challenge => "challenge",
            ResponseAction::Block => "block",
        }
    }
}

impl std::fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Rate limit handed to the enforcement layer for one source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDirective {
    pub window_seconds: u64,
    pub max_requests: u32,
    /// Source IP the limit applies to.
    pub source: String,
}

/// Which countermeasures a response engaged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDetails {
    pub escalation: bool,
    pub encryption_enhanced: bool,
    pub firewall_updated: bool,
    pub decoy_deployed: bool,
    pub enhanced_logging: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub rate_limit: Option<RateLimitDirective>,
}

/// Outcome of one executed response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub timestamp: DateTime<Utc>,
    pub action: ResponseAction,
    pub threat_level: u8,
    pub details: ResponseDetails,
    /// Key pairs rotated as part of this response.
    pub keys_rotated: u32,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One detection, as kept in the bounded history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatDetectionRecord {
    pub timestamp: DateTime<Utc>,
    /// SHA-256 over the request's identifying fields. Raw request data is
    /// never retained.
    pub request_fingerprint_hash: String,
    pub threat_level: u8,
    pub threat_types: std::collections::BTreeSet<String>,
    pub confidence: f64,
    /// Filled in once a response has run for this detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub action_taken: Option<ResponseAction>,
}

/// History query filters. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct HistoryFilters {
    pub min_level: Option<u8>,
    pub time_range_seconds: Option<u64>,
    pub threat_type: Option<String>,
}

/// Aggregates over the detection history.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThreatStatistics {
    pub total: usize,
    pub per_level: BTreeMap<u8, usize>,
    pub per_type: BTreeMap<String, usize>,
    pub per_action: BTreeMap<String, usize>,
    /// Detections per UTC hour of day.
    pub hourly_distribution: [usize; 24],
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Coordinates scoring, response, history, and notification.
///
/// Thread safe; every entry point takes `&self`. Configuration is
/// snapshotted at the start of each request so a concurrent
/// [`set_config`](Self::set_config) never changes semantics mid-flight.
pub struct DefenseOrchestrator {
    config: Mutex<DefenseConfig>,
    engine: ThreatScoringEngine,
    crypto: Arc<CryptoOperationsService>,
    keys: Arc<KeyLifecycleManager>,
    history: Mutex<VecDeque<ThreatDetectionRecord>>,
    history_store: Arc<dyn HistoryStore>,
    notifier: Arc<dyn NotificationSender>,
}

impl DefenseOrchestrator {
    /// Build an orchestrator, restoring any previously persisted history.
    ///
    /// A history blob that fails to parse or decrypt is logged and
    /// discarded; a store that cannot be read at all is an error.
    pub fn new(
        config: DefenseConfig,
        engine: ThreatScoringEngine,
        crypto: Arc<CryptoOperationsService>,
        history_store: Arc<dyn HistoryStore>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Result<Self, CryptoError> {
        config.validate()?;
        let keys = Arc::clone(crypto.key_manager());
        let history = restore_history(history_store.as_ref(), &crypto)?;
        Ok(Self {
            config: Mutex::new(config),
            engine,
            crypto,
            keys,
            history: Mutex::new(history),
            history_store,
            notifier,
        })
    }

    /// Score one request, record the detection, and run the automated
    /// response if the verdict crosses the sensitivity threshold.
    pub fn analyze_request(&self, raw: RawRequest) -> Result<ThreatVerdict, CryptoError> {
        let config = self.config.lock().unwrap().clone();
        let request = raw.normalize();
        let verdict = self.engine.detect_threats(&request);

        self.append_and_persist(
            ThreatDetectionRecord {
                timestamp: Utc::now(),
                request_fingerprint_hash: fingerprint(&request),
                threat_level: verdict.threat_level,
                threat_types: verdict.threat_types.clone(),
                confidence: verdict.confidence,
                action_taken: None,
            },
            &config,
        )?;

        if config.auto_response && verdict.threat_level >= config.sensitivity_level {
            self.respond_with_config(&config, &verdict, &request)?;
        } else {
            // Benign traffic still trains the behavioral baseline.
            self.engine.update_model(&training_sample(&verdict), config.learning_rate);
        }
        Ok(verdict)
    }

    /// Execute the tiered response for `verdict`.
    ///
    /// Level 4 and above blocks the source and, with adaptive encryption
    /// on, rotates every key and halves lifetimes. Level 3 challenges and
    /// rate-limits. Below that the source is only watched more closely.
    pub fn respond_to_threat(
        &self,
        verdict: &ThreatVerdict,
        source: &NormalizedRequest,
    ) -> Result<ResponseRecord, CryptoError> {
        let config = self.config.lock().unwrap().clone();
        self.respond_with_config(&config, verdict, source)
    }

    /// Response body, driven entirely by the caller's config snapshot so
    /// a response triggered from [`analyze_request`](Self::analyze_request)
    /// runs under the same configuration the detection did.
    pub(crate) fn respond_with_config(
        &self,
        config: &DefenseConfig,
        verdict: &ThreatVerdict,
        source: &NormalizedRequest,
    ) -> Result<ResponseRecord, CryptoError> {
        let level = verdict.threat_level;
        let mut details = ResponseDetails::default();
        let mut keys_rotated = 0u32;

        let action = if level >= 4 {
            details.escalation = true;
            if config.adaptive_encryption {
                keys_rotated = self.keys.rotate_all_keys()?;
                self.keys.halve_key_lifetime();
                details.encryption_enhanced = true;
            }
            if config.dynamic_firewall {
                details.firewall_updated = true;
            }
            if config.deception_technology {
                details.decoy_deployed = true;
            }
            ResponseAction::Block
        } else if level == 3 {
            if config.rate_limiting {
                details.rate_limit = Some(RateLimitDirective {
                    window_seconds: RATE_LIMIT_WINDOW_SECS,
                    max_requests: RATE_LIMIT_MAX_REQUESTS,
                    source: source.ip.clone(),
                });
            }
            ResponseAction::Challenge
        } else {
            details.enhanced_logging = true;
            ResponseAction::Monitor
        };

        let record = ResponseRecord {
            timestamp: Utc::now(),
            action,
            threat_level: level,
            details,
            keys_rotated,
        };
        tracing::info!(
            action = %record.action,
            level = level,
            keys_rotated = keys_rotated,
            source = %source.ip,
            "threat response executed"
        );

        self.dispatch_notifications(config, verdict, &record);
        self.engine.update_model(&training_sample(verdict), config.learning_rate);
        self.backfill_action(&fingerprint(source), action, config)?;
        Ok(record)
    }

    /// Detection records matching `filters`, oldest first, capped to the
    /// most recent `limit`.
    pub fn get_detection_history(
        &self,
        filters: &HistoryFilters,
        limit: usize,
    ) -> Vec<ThreatDetectionRecord> {
        let history = self.history.lock().unwrap();
        let floor = filters.time_range_seconds.map(|r| cutoff(Utc::now(), r));
        let matched: Vec<ThreatDetectionRecord> = history
            .iter()
            .filter(|r| {
                if let Some(min) = filters.min_level {
                    if r.threat_level < min {
                        return false;
                    }
                }
                if let Some(floor) = floor {
                    if r.timestamp < floor {
                        return false;
                    }
                }
                if let Some(ref ty) = filters.threat_type {
                    if !r.threat_types.contains(ty) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        let skip = matched.len().saturating_sub(limit);
        matched.into_iter().skip(skip).collect()
    }

    /// Aggregate statistics, optionally restricted to a trailing window.
    pub fn get_threat_statistics(&self, time_range_seconds: Option<u64>) -> ThreatStatistics {
        let history = self.history.lock().unwrap();
        let floor = time_range_seconds.map(|r| cutoff(Utc::now(), r));

        let mut stats = ThreatStatistics::default();
        for record in history.iter() {
            if let Some(floor) = floor {
                if record.timestamp < floor {
                    continue;
                }
            }
            stats.total += 1;
            *stats.per_level.entry(record.threat_level).or_insert(0) += 1;
            for ty in &record.threat_types {
                *stats.per_type.entry(ty.clone()).or_insert(0) += 1;
            }
            if let Some(action) = record.action_taken {
                *stats
                    .per_action
                    .entry(action.label().to_string())
                    .or_insert(0) += 1;
            }
            stats.hourly_distribution[record.timestamp.hour() as usize] += 1;
        }
        stats
    }

    /// Replace the configuration after validating it.
    pub fn set_config(&self, config: DefenseConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.lock().unwrap() = config;
        Ok(())
    }

    pub fn config(&self) -> DefenseConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn engine(&self) -> &ThreatScoringEngine {
        &self.engine
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().unwrap().len()
    }

    fn append_and_persist(
        &self,
        record: ThreatDetectionRecord,
        config: &DefenseConfig,
    ) -> Result<(), CryptoError> {
        let mut history = self.history.lock().unwrap();
        history.push_back(record);
        let cap = config.max_history.max(1);
        while history.len() > cap {
            history.pop_front();
        }
        self.persist_history_locked(&history, config)
    }

    /// Mark the most recent unactioned detection for `fp` with the action
    /// that was just executed.
    fn backfill_action(
        &self,
        fp: &str,
        action: ResponseAction,
        config: &DefenseConfig,
    ) -> Result<(), CryptoError> {
        let mut history = self.history.lock().unwrap();
        let mut changed = false;
        for record in history.iter_mut().rev() {
            if record.action_taken.is_none() && record.request_fingerprint_hash == fp {
                record.action_taken = Some(action);
                changed = true;
                break;
            }
        }
        if changed {
            self.persist_history_locked(&history, config)?;
        }
        Ok(())
    }

    fn persist_history_locked(
        &self,
        history: &VecDeque<ThreatDetectionRecord>,
        config: &DefenseConfig,
    ) -> Result<(), CryptoError> {
        let records: Vec<&ThreatDetectionRecord> = history.iter().collect();
        let plain = serde_json::to_vec(&records)
            .map_err(|e| PersistenceError(format!("history serialize failed: {}", e)))?;
        let payload = self.crypto.encrypt(&plain, config.history_security_level)?;
        let blob = serde_json::to_vec(&payload)
            .map_err(|e| PersistenceError(format!("history serialize failed: {}", e)))?;
        self.history_store.persist_blob(&blob)?;
        Ok(())
    }

    fn dispatch_notifications(
        &self,
        config: &DefenseConfig,
        verdict: &ThreatVerdict,
        record: &ResponseRecord,
    ) {
        let mut channels = Vec::new();
        if config.notify_dashboard {
            channels.push(ChannelKind::Dashboard);
        }
        if config.notify_webhook {
            channels.push(ChannelKind::Webhook);
        }
        // Paging channels only wake people for high-severity detections.
        if verdict.threat_level > 3 {
            if config.notify_email {
                channels.push(ChannelKind::Email);
            }
            if config.notify_sms {
                channels.push(ChannelKind::Sms);
            }
        }

        let details = format!(
            "{} response at threat level {}",
            record.action, record.threat_level
        );
        for channel in channels {
            self.notifier.send(ThreatNotification {
                timestamp: record.timestamp,
                channel,
                threat_level: verdict.threat_level,
                threat_types: verdict.threat_types.clone(),
                action: record.action.label().to_string(),
                details: details.clone(),
                sequence: None,
                prev_hash: None,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Privacy-preserving request identity: a digest over the identifying
/// fields, never the raw request.
fn fingerprint(request: &NormalizedRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.ip.as_bytes());
    hasher.update(b"|");
    hasher.update(request.method.as_bytes());
    hasher.update(b"|");
    hasher.update(request.uri.as_bytes());
    hasher.update(b"|");
    hasher.update(request.user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

fn training_sample(verdict: &ThreatVerdict) -> TrainingSample {
    TrainingSample {
        features: verdict.features.clone(),
        threat_level: verdict.threat_level,
        confidence: verdict.confidence,
        effective: None,
    }
}

fn cutoff(now: DateTime<Utc>, range_seconds: u64) -> DateTime<Utc> {
    let capped = chrono::Duration::seconds(range_seconds.min(MAX_LOOKBACK_SECS) as i64);
    now.checked_sub_signed(capped)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn restore_history(
    store: &dyn HistoryStore,
    crypto: &CryptoOperationsService,
) -> Result<VecDeque<ThreatDetectionRecord>, CryptoError> {
    let Some(blob) = store.load_blob()? else {
        return Ok(VecDeque::new());
    };
    let payload: EncryptedPayload = match serde_json::from_slice(&blob) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "stored history unreadable, starting fresh");
            return Ok(VecDeque::new());
        }
    };
    let plain = match crypto.decrypt(&payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "stored history failed decryption, starting fresh");
            return Ok(VecDeque::new());
        }
    };
    match serde_json::from_slice::<Vec<ThreatDetectionRecord>>(&plain) {
        Ok(records) => Ok(records.into()),
        Err(e) => {
            tracing::warn!(error = %e, "stored history failed to parse, starting fresh");
            Ok(VecDeque::new())
        }
    }
}
