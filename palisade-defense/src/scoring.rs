//! Threat scoring: feature extraction, pluggable models, and fusion.
//!
//! Requests arrive in whatever ragged shape the transport produced,
//! get normalized, and are scored by every registered model. The fusion
//! rule is fixed and model-agnostic: maximum level, maximum confidence,
//! union of threat types. A missing or cold model can therefore never
//! lower a verdict, only fail to raise it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Raw request data as handed over by the transport layer. Any field may
/// be absent; [`RawRequest::normalize`] fills safe defaults and never
/// fails.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawRequest {
    pub ip: Option<String>,
    pub method: Option<String>,
    pub uri: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub user_agent: Option<String>,
    pub payload: Option<String>,
    /// Session counters, e.g. `request_frequency` in requests/minute.
    pub session_data: Option<BTreeMap<String, f64>>,
    pub user_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawRequest {
    /// Produce the canonical shape the pipeline scores.
    pub fn normalize(self) -> NormalizedRequest {
        NormalizedRequest {
            ip: self.ip.unwrap_or_else(|| "0.0.0.0".to_string()),
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            uri: self.uri.unwrap_or_else(|| "/".to_string()),
            headers: self.headers.unwrap_or_default(),
            user_agent: self.user_agent.unwrap_or_default(),
            payload: self.payload.unwrap_or_default(),
            session_data: self.session_data.unwrap_or_default(),
            user_id: self.user_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// A normalized request. Every field is present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NormalizedRequest {
    pub ip: String,
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub user_agent: String,
    pub payload: String,
    pub session_data: BTreeMap<String, f64>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Deterministic numeric features extracted from a request. Same request
/// in, same vector out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub payload_size: f64,
    pub user_agent_hash: f64,
    pub ip_numeric: f64,
    pub method_uri_hash: f64,
    pub timestamp: f64,
    pub request_frequency: f64,
}

impl FeatureVector {
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.payload_size,
            self.user_agent_hash,
            self.ip_numeric,
            self.method_uri_hash,
            self.timestamp,
            self.request_frequency,
        ]
    }
}

/// Hash-fold arbitrary bytes into a bounded f64 bucket.
fn hash_feature(data: &[u8]) -> f64 {
    let digest = Sha256::digest(data);
    let mut eight = [0u8; 8];
    eight.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(eight) % 1_000_000_007) as f64
}

/// IPv4 becomes its 32-bit integer value; IPv6 and unparseable inputs
/// are hash-folded.
fn ip_numeric(ip: &str) -> f64 {
    match ip.parse::<std::net::Ipv4Addr>() {
        Ok(v4) => u32::from(v4) as f64,
        Err(_) => hash_feature(ip.as_bytes()),
    }
}

fn extract(request: &NormalizedRequest) -> FeatureVector {
    let mut method_uri = Vec::with_capacity(request.method.len() + 1 + request.uri.len());
    method_uri.extend_from_slice(request.method.as_bytes());
    method_uri.push(b'|');
    method_uri.extend_from_slice(request.uri.as_bytes());

    FeatureVector {
        payload_size: request.payload.len() as f64,
        user_agent_hash: hash_feature(request.user_agent.as_bytes()),
        ip_numeric: ip_numeric(&request.ip),
        method_uri_hash: hash_feature(&method_uri),
        timestamp: request.timestamp.timestamp() as f64,
        request_frequency: request
            .session_data
            .get("request_frequency")
            .copied()
            .unwrap_or(0.0),
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// One model's opinion of one request.
#[derive(Clone, Debug)]
pub struct ModelScore {
    /// Threat level in `1..=5` (clamped at fusion).
    pub threat_level: u8,
    pub threat_types: BTreeSet<String>,
    /// Confidence in `0.0..=1.0` (clamped at fusion).
    pub confidence: f64,
}

impl ModelScore {
    /// The quiet verdict: level 1, no types, zero confidence.
    pub fn benign() -> Self {
        Self {
            threat_level: 1,
            threat_types: BTreeSet::new(),
            confidence: 0.0,
        }
    }
}

/// Labeled feedback fed back into models after each verdict.
#[derive(Clone, Debug)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub threat_level: u8,
    pub confidence: f64,
    /// Whether the triggered response was judged effective, when known.
    pub effective: Option<bool>,
}

/// A pluggable scoring model. Implementations must be internally
/// synchronized; `score` and `update` take `&self`.
pub trait ThreatScoringModel: Send + Sync {
    fn name(&self) -> &str;

    /// Score one request. Must not panic on any input.
    fn score(&self, features: &FeatureVector, request: &NormalizedRequest) -> ModelScore;

    /// Online learning hook. Models that do not learn ignore it.
    fn update(&self, sample: &TrainingSample, learning_rate: f64);
}

// ---------------------------------------------------------------------------
// Rule baseline
// ---------------------------------------------------------------------------

/// Pattern tables: (lowercase needle, threat type, level).
const PAYLOAD_PATTERNS: &[(&str, &str, u8)] = &[
    ("union select", "sql_injection", 4),
    ("' or 1=1", "sql_injection", 4),
    ("drop table", "sql_injection", 4),
    ("; --", "sql_injection", 3),
    ("<script", "xss", 3),
    ("javascript:", "xss", 3),
    ("onerror=", "xss", 3),
    ("../", "path_traversal", 3),
    ("%2e%2e", "path_traversal", 3),
    ("$(", "command_injection", 4),
    ("| sh", "command_injection", 4),
    ("; rm ", "command_injection", 5),
];

const SCANNER_AGENTS: &[&str] = &["sqlmap", "nikto", "masscan", "nmap", "dirbuster"];

/// Payloads above this size are suspicious on their own.
const OVERSIZE_PAYLOAD_BYTES: usize = 64 * 1024;
/// Requests/minute rates above these raise the level.
const ELEVATED_FREQUENCY: f64 = 100.0;
const SEVERE_FREQUENCY: f64 = 300.0;

/// The always-present baseline: fixed pattern tables over payload, URI,
/// and user agent, plus size and frequency rules. Deterministic and
/// stateless, so the engine keeps a defense floor even when every
/// learned model is cold or broken.
pub struct RuleBasedModel;

impl ThreatScoringModel for RuleBasedModel {
    fn name(&self) -> &str {
        "rule-baseline"
    }

    fn score(&self, features: &FeatureVector, request: &NormalizedRequest) -> ModelScore {
        let mut level = 1u8;
        let mut types = BTreeSet::new();
        let mut hits = 0u32;

        let payload = request.payload.to_lowercase();
        let uri = request.uri.to_lowercase();
        for (needle, kind, severity) in PAYLOAD_PATTERNS {
            if payload.contains(needle) || uri.contains(needle) {
                level = level.max(*severity);
                types.insert((*kind).to_string());
                hits += 1;
            }
        }

        let agent = request.user_agent.to_lowercase();
        if agent.is_empty() {
            level = level.max(2);
            types.insert("missing_user_agent".to_string());
            hits += 1;
        } else if SCANNER_AGENTS.iter().any(|s| agent.contains(s)) {
            level = level.max(3);
            types.insert("scanner".to_string());
            hits += 1;
        }

        if request.payload.len() > OVERSIZE_PAYLOAD_BYTES {
            level = level.max(2);
            types.insert("oversized_payload".to_string());
            hits += 1;
        }

        if features.request_frequency > SEVERE_FREQUENCY {
            level = level.max(4);
            types.insert("rate_anomaly".to_string());
            hits += 1;
        } else if features.request_frequency > ELEVATED_FREQUENCY {
            level = level.max(3);
            types.insert("rate_anomaly".to_string());
            hits += 1;
        }

        let confidence = if types.is_empty() {
            0.2
        } else {
            (0.45 + 0.15 * f64::from(hits.min(4))).min(0.95)
        };
        ModelScore {
            threat_level: level.min(5),
            threat_types: types,
            confidence,
        }
    }

    fn update(&self, _sample: &TrainingSample, _learning_rate: f64) {
        // Fixed rules do not learn.
    }
}

// ---------------------------------------------------------------------------
// Anomaly model
// ---------------------------------------------------------------------------

/// Observations required before the anomaly model speaks up.
const MIN_OBSERVATIONS: u64 = 10;

struct AnomalyState {
    means: [f64; 6],
    observations: u64,
}

/// Online anomaly model: exponentially weighted per-feature means.
/// Large normalized deviation from the running profile raises the
/// level. Stays silent during cold start.
pub struct AnomalyModel {
    state: Mutex<AnomalyState>,
}

impl AnomalyModel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AnomalyState {
                means: [0.0; 6],
                observations: 0,
            }),
        }
    }

    /// Observations absorbed so far.
    pub fn observations(&self) -> u64 {
        self.state.lock().unwrap().observations
    }
}

impl Default for AnomalyModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatScoringModel for AnomalyModel {
    fn name(&self) -> &str {
        "ewma-anomaly"
    }

    fn score(&self, features: &FeatureVector, _request: &NormalizedRequest) -> ModelScore {
        let state = self.state.lock().unwrap();
        if state.observations < MIN_OBSERVATIONS {
            return ModelScore::benign();
        }

        let values = features.as_array();
        let mut deviation = 0.0f64;
        for (value, mean) in values.iter().zip(state.means.iter()) {
            let scale = mean.abs().max(1.0);
            deviation += ((value - mean).abs() / scale).min(10.0);
        }
        deviation /= values.len() as f64;

        let threat_level = if deviation >= 4.0 {
            4
        } else if deviation >= 2.0 {
            3
        } else if deviation >= 1.0 {
            2
        } else {
            1
        };
        let mut types = BTreeSet::new();
        if threat_level > 1 {
            types.insert("behavioral_anomaly".to_string());
        }
        ModelScore {
            threat_level,
            threat_types: types,
            confidence: (deviation / 5.0).clamp(0.0, 0.85),
        }
    }

    fn update(&self, sample: &TrainingSample, learning_rate: f64) {
        let mut state = self.state.lock().unwrap();
        let rate = learning_rate.clamp(0.0, 1.0);
        let values = sample.features.as_array();
        if state.observations == 0 {
            state.means = values;
        } else {
            for (mean, value) in state.means.iter_mut().zip(values.iter()) {
                *mean = (1.0 - rate) * *mean + rate * value;
            }
        }
        state.observations += 1;
    }
}

// ---------------------------------------------------------------------------
// Engine and fusion
// ---------------------------------------------------------------------------

/// Fused verdict across all models.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatVerdict {
    /// Fused threat level in `1..=5`.
    pub threat_level: u8,
    pub threat_types: BTreeSet<String>,
    /// Fused confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Features the verdict was computed from.
    pub features: FeatureVector,
}

/// Fusion policy: maximum level, maximum confidence, union of types.
pub fn fuse(features: FeatureVector, scores: &[ModelScore]) -> ThreatVerdict {
    let mut threat_level = 1u8;
    let mut confidence = 0.0f64;
    let mut threat_types = BTreeSet::new();
    for score in scores {
        threat_level = threat_level.max(score.threat_level.clamp(1, 5));
        confidence = confidence.max(score.confidence.clamp(0.0, 1.0));
        threat_types.extend(score.threat_types.iter().cloned());
    }
    ThreatVerdict {
        threat_level,
        threat_types,
        confidence,
        features,
    }
}

/// Multi-model scoring engine. The rule baseline is always present and
/// cannot be removed.
pub struct ThreatScoringEngine {
    models: Vec<Box<dyn ThreatScoringModel>>,
}

impl ThreatScoringEngine {
    /// Engine holding only the mandatory baseline.
    pub fn new() -> Self {
        Self {
            models: vec![Box::new(RuleBasedModel)],
        }
    }

    /// Register an additional model.
    pub fn with_model(mut self, model: Box<dyn ThreatScoringModel>) -> Self {
        self.models.push(model);
        self
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name()).collect()
    }

    /// Deterministic feature extraction.
    pub fn extract_features(&self, request: &NormalizedRequest) -> FeatureVector {
        extract(request)
    }

    /// Score `request` through every model and fuse the results.
    pub fn detect_threats(&self, request: &NormalizedRequest) -> ThreatVerdict {
        let features = self.extract_features(request);
        let scores: Vec<ModelScore> = self
            .models
            .iter()
            .map(|m| m.score(&features, request))
            .collect();
        fuse(features, &scores)
    }

    /// Feed one labeled sample to every model.
    pub fn update_model(&self, sample: &TrainingSample, learning_rate: f64) {
        for model in &self.models {
            model.update(sample, learning_rate);
        }
    }
}

impl Default for ThreatScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}
