//! Threat intelligence: injected indicator feeds with TTL caching.
//!
//! Feeds plug in behind [`ThreatIntelProvider`] and contribute to
//! verdicts through [`IntelModel`], which is just another scoring model
//! from the engine's point of view. The cache keeps feed latency off the
//! request path.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{FeatureVector, ModelScore, NormalizedRequest, ThreatScoringModel, TrainingSample};

/// Indicators of compromise served by a feed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    /// Exact source addresses known to be hostile.
    pub bad_ips: BTreeSet<String>,
    /// Lowercase substrings of hostile user agents.
    pub agent_markers: Vec<String>,
    /// Lowercase substrings of URIs scanners commonly request.
    pub uri_markers: Vec<String>,
}

impl IndicatorSet {
    pub fn is_empty(&self) -> bool {
        self.bad_ips.is_empty() && self.agent_markers.is_empty() && self.uri_markers.is_empty()
    }
}

/// A source of threat indicators. Implementations may call out to an
/// external feed; they are only invoked through the cache layer.
pub trait ThreatIntelProvider: Send + Sync {
    fn fetch(&self) -> IndicatorSet;
}

/// Fixed in-process indicators. The default feed, and a handy test
/// double.
pub struct StaticIntel {
    indicators: IndicatorSet,
}

impl StaticIntel {
    pub fn new(indicators: IndicatorSet) -> Self {
        Self { indicators }
    }

    /// Small builtin list of internet-scanner infrastructure markers.
    pub fn builtin() -> Self {
        let mut indicators = IndicatorSet::default();
        indicators.agent_markers = vec![
            "zgrab".to_string(),
            "shodan".to_string(),
            "censys".to_string(),
        ];
        indicators.uri_markers = vec![
            "/.env".to_string(),
            "/.git/".to_string(),
            "/wp-login.php".to_string(),
            "/phpmyadmin".to_string(),
        ];
        Self::new(indicators)
    }
}

impl ThreatIntelProvider for StaticIntel {
    fn fetch(&self) -> IndicatorSet {
        self.indicators.clone()
    }
}

/// TTL cache around a provider. Refreshes lazily once the cached set is
/// older than the TTL; a fetch happens at most once per expiry.
pub struct CachedThreatIntel {
    provider: Arc<dyn ThreatIntelProvider>,
    ttl: StdDuration,
    cached: Mutex<Option<(DateTime<Utc>, IndicatorSet)>>,
}

impl CachedThreatIntel {
    pub fn new(provider: Arc<dyn ThreatIntelProvider>, ttl: StdDuration) -> Self {
        Self {
            provider,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// The current indicator set, refreshed through the provider if the
    /// cache has expired.
    pub fn current(&self) -> IndicatorSet {
        let now = Utc::now();
        let ttl = Duration::from_std(self.ttl).unwrap_or(Duration::MAX);
        let mut cached = self.cached.lock().unwrap();
        if let Some((fetched_at, set)) = cached.as_ref() {
            if now.signed_duration_since(*fetched_at) < ttl {
                return set.clone();
            }
        }
        let set = self.provider.fetch();
        *cached = Some((now, set.clone()));
        set
    }

    /// Drop the cache and fetch immediately.
    pub fn force_refresh(&self) -> IndicatorSet {
        let set = self.provider.fetch();
        *self.cached.lock().unwrap() = Some((Utc::now(), set.clone()));
        set
    }
}

/// Scoring model backed by an intel cache: indicator hits raise the
/// level, an exact bad-IP match the most.
pub struct IntelModel {
    intel: CachedThreatIntel,
}

impl IntelModel {
    pub fn new(intel: CachedThreatIntel) -> Self {
        Self { intel }
    }
}

impl ThreatScoringModel for IntelModel {
    fn name(&self) -> &str {
        "intel-indicators"
    }

    fn score(&self, _features: &FeatureVector, request: &NormalizedRequest) -> ModelScore {
        let set = self.intel.current();
        let mut level = 1u8;
        let mut types = BTreeSet::new();
        let mut hits = 0u32;

        if set.bad_ips.contains(&request.ip) {
            level = level.max(4);
            types.insert("known_hostile_source".to_string());
            hits += 1;
        }

        let agent = request.user_agent.to_lowercase();
        for marker in &set.agent_markers {
            if !marker.is_empty() && agent.contains(marker.as_str()) {
                level = level.max(3);
                types.insert("scanner".to_string());
                hits += 1;
            }
        }

        let uri = request.uri.to_lowercase();
        for marker in &set.uri_markers {
            if !marker.is_empty() && uri.contains(marker.as_str()) {
                level = level.max(3);
                types.insert("recon_uri".to_string());
                hits += 1;
            }
        }

        let confidence = if hits == 0 {
            0.0
        } else {
            (0.6 + 0.1 * f64::from(hits)).min(0.9)
        };
        ModelScore {
            threat_level: level,
            threat_types: types,
            confidence,
        }
    }

    fn update(&self, _sample: &TrainingSample, _learning_rate: f64) {
        // Indicator feeds update out of band, not from verdict feedback.
    }
}
