//! Deterministic Feature-Flag Router
//!
//! Decides per request whether the templated path handles it or the legacy
//! collaborator does. Pure function of `(user_id, rollout_config)`: a
//! SHA-256 of the salted user id maps into a 0-99 bucket, so the same user
//! lands on the same side of the rollout across requests and restarts.

use crate::config::RolloutConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Which strategy ultimately served a request. Recorded in the result and
/// in the per-mode metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    SemanticTemplate,
    StructuredSearch,
    Legacy,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::SemanticTemplate => "semantic_template",
            ProcessingMode::StructuredSearch => "structured_search",
            ProcessingMode::Legacy => "legacy",
        }
    }
}

/// Routing decision: handle via the templated pipeline or defer to legacy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Templated,
    Legacy,
}

#[derive(Debug, Clone, Default)]
pub struct Router;

impl Router {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic routing decision.
    ///
    /// Order: override users force templated; percentage 0 forces legacy;
    /// percentage >= 100 forces templated; otherwise the salted-hash bucket
    /// decides. No randomness, no external state.
    pub fn route(&self, user_id: &str, rollout: &RolloutConfig) -> RouteDecision {
        if rollout.override_users.contains(user_id) {
            debug!(user_id, "route: override user, templated");
            return RouteDecision::Templated;
        }
        if rollout.unified_percentage == 0 {
            return RouteDecision::Legacy;
        }
        if rollout.unified_percentage >= 100 {
            return RouteDecision::Templated;
        }
        let bucket = rollout_bucket(user_id, &rollout.hash_salt);
        let decision = if bucket < rollout.unified_percentage {
            RouteDecision::Templated
        } else {
            RouteDecision::Legacy
        };
        debug!(
            user_id,
            bucket,
            percentage = rollout.unified_percentage,
            ?decision,
            "route: hash bucket"
        );
        decision
    }
}

/// Map a salted user id into [0, 100). SHA-256 keeps the mapping stable
/// across processes and restarts, unlike the std hasher.
pub fn rollout_bucket(user_id: &str, salt: &str) -> u8 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u8
}
