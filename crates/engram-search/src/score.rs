use serde::Serialize;

use engram_core::types::{Fact, Observation};

/// Keyword weight in hybrid scoring.
pub const KEYWORD_WEIGHT: f64 = 0.3;
/// Vector weight in hybrid scoring.
pub const VECTOR_WEIGHT: f64 = 0.7;
/// Recency decay half-scale: one week in seconds.
pub const DECAY_LAMBDA_SECS: f64 = 7.0 * 24.0 * 3600.0;
/// Maximum recency bonus.
pub const DECAY_OMEGA: f64 = 0.1;

/// `exp(-age / λ) · ω` — fresh rows get up to ω, old rows approach 0.
/// Unparseable timestamps get no bonus rather than an error.
pub fn temporal_bonus(created_at: &str, now: chrono::DateTime<chrono::Utc>) -> f64 {
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(created_at) else {
        return 0.0;
    };
    let age_secs = (now - created.with_timezone(&chrono::Utc)).num_seconds();
    if age_secs < 0 {
        return DECAY_OMEGA;
    }
    (-(age_secs as f64) / DECAY_LAMBDA_SECS).exp() * DECAY_OMEGA
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredFact {
    pub fact: Fact,
    pub score: f64,
    pub keyword_score: f64,
    pub vector_score: f64,
    pub temporal_bonus: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredObservation {
    pub observation: Observation,
    pub score: f64,
    pub keyword_score: f64,
    pub vector_score: f64,
    pub temporal_bonus: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_rows_get_the_full_bonus() {
        let now = chrono::Utc::now();
        let bonus = temporal_bonus(&now.to_rfc3339(), now);
        assert!((bonus - DECAY_OMEGA).abs() < 1e-6);
    }

    #[test]
    fn week_old_rows_decay_to_a_third() {
        let now = chrono::Utc::now();
        let week_ago = now - chrono::Duration::days(7);
        let bonus = temporal_bonus(&week_ago.to_rfc3339(), now);
        // exp(-1) ≈ 0.368
        assert!((bonus - DECAY_OMEGA * (-1.0f64).exp()).abs() < 1e-4);
    }

    #[test]
    fn garbage_timestamps_score_zero() {
        assert_eq!(temporal_bonus("not a date", chrono::Utc::now()), 0.0);
    }
}
