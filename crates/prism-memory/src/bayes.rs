//! Bayesian combination of evidence and priors.
//!
//! Every channel produces a score in [0, 1]; the weighted sums form the
//! likelihood and the prior, and `posterior = clamp(likelihood * prior)`.
//! The functions are pure so the monotonicity and bounds properties can be
//! checked directly.

use prism_core::config::{EvidenceWeights, PriorWeights};

use crate::types::{EvidenceBreakdown, PriorBreakdown};

/// Tolerance for the weights-sum-to-one check.
const WEIGHT_EPSILON: f64 = 1e-6;

/// Semantic evidence: the vector-store similarity, clamped.
pub fn semantic_evidence(similarity: f32) -> f64 {
    (similarity as f64).clamp(0.0, 1.0)
}

/// Temporal evidence: exponential decay of age with the configured
/// half-life, floored at `min_relevance` so old messages stay reachable.
pub fn temporal_evidence(age_hours: f64, half_life_hours: f64, min_relevance: f64) -> f64 {
    if half_life_hours <= 0.0 {
        return min_relevance.clamp(0.0, 1.0);
    }
    let decay = 0.5_f64.powf(age_hours.max(0.0) / half_life_hours);
    decay.max(min_relevance).clamp(0.0, 1.0)
}

/// Interaction evidence: 0.5 base, +0.3 when user-marked, up to +0.2 from
/// the reference counter (saturating at five references).
pub fn interaction_evidence(user_marked: bool, times_referenced: u32) -> f64 {
    let marked = if user_marked { 0.3 } else { 0.0 };
    let referenced = 0.2 * (times_referenced.min(5) as f64 / 5.0);
    (0.5 + marked + referenced).clamp(0.0, 1.0)
}

/// Conversation-flow score. Placeholder constant until a dialog graph
/// exists; kept as a dedicated channel so the weight plumbing is already in
/// place when it does.
pub fn continuity_evidence() -> f64 {
    0.5
}

/// Prior from the message author: user turns carry more signal than
/// assistant turns.
pub fn message_type_prior(role: Option<&str>) -> f64 {
    match role {
        Some("user") => 0.8,
        Some("assistant") => 0.6,
        _ => 0.5,
    }
}

/// Prior from message length: tokens/100, clamped.
pub fn length_prior(tokens: u32) -> f64 {
    (tokens as f64 / 100.0).clamp(0.0, 1.0)
}

/// Positional prior. Placeholder constant, same contract as
/// [`continuity_evidence`].
pub fn position_prior() -> f64 {
    0.5
}

pub fn user_marked_prior(user_marked: bool) -> f64 {
    if user_marked {
        0.9
    } else {
        0.5
    }
}

/// Weighted likelihood over the six evidence channels.
pub fn likelihood(evidence: &EvidenceBreakdown, weights: &EvidenceWeights) -> f64 {
    weights.semantic * evidence.semantic
        + weights.temporal * evidence.temporal
        + weights.entity * evidence.entity
        + weights.topic * evidence.topic
        + weights.interaction * evidence.interaction
        + weights.continuity * evidence.continuity
}

/// Weighted prior over the five prior channels.
pub fn prior(prior: &PriorBreakdown, weights: &PriorWeights) -> f64 {
    weights.importance * prior.importance
        + weights.message_type * prior.message_type
        + weights.length * prior.length
        + weights.position * prior.position
        + weights.user_marked * prior.user_marked
}

/// Posterior relevance probability.
pub fn posterior(likelihood: f64, prior: f64) -> f64 {
    (likelihood * prior).clamp(0.0, 1.0)
}

/// Selection confidence: scaled mean of the evidence channels.
pub fn confidence(evidence: &EvidenceBreakdown) -> f64 {
    (evidence.mean() * 1.2).clamp(0.0, 1.0)
}

/// Check that a weight vector sums to 1 (within epsilon).
pub fn validate_weights(evidence: &EvidenceWeights, priors: &PriorWeights) -> Result<(), String> {
    let es = evidence.sum();
    if (es - 1.0).abs() > WEIGHT_EPSILON {
        return Err(format!("evidence weights sum to {es}, expected 1"));
    }
    let ps = priors.sum();
    if (ps - 1.0).abs() > WEIGHT_EPSILON {
        return Err(format!("prior weights sum to {ps}, expected 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_evidence() -> EvidenceBreakdown {
        EvidenceBreakdown {
            semantic: 0.9,
            temporal: 0.4,
            entity: 0.5,
            topic: 0.3,
            interaction: 0.5,
            continuity: 0.5,
        }
    }

    fn sample_prior() -> PriorBreakdown {
        PriorBreakdown {
            importance: 0.5,
            message_type: 0.8,
            length: 0.2,
            position: 0.5,
            user_marked: 0.5,
        }
    }

    #[test]
    fn temporal_decay_halves_at_half_life() {
        let v = temporal_evidence(24.0, 24.0, 0.1);
        assert!((v - 0.5).abs() < 1e-9);
        assert_eq!(temporal_evidence(0.0, 24.0, 0.1), 1.0);
    }

    #[test]
    fn temporal_decay_is_floored() {
        assert_eq!(temporal_evidence(10_000.0, 24.0, 0.1), 0.1);
    }

    #[test]
    fn interaction_saturates() {
        assert_eq!(interaction_evidence(false, 0), 0.5);
        assert_eq!(interaction_evidence(true, 0), 0.8);
        assert_eq!(interaction_evidence(true, 5), 1.0);
        // Beyond five references nothing changes.
        assert_eq!(interaction_evidence(true, 50), 1.0);
    }

    #[test]
    fn posterior_stays_in_bounds() {
        let e = sample_evidence();
        let p = sample_prior();
        let post = posterior(
            likelihood(&e, &EvidenceWeights::default()),
            prior(&p, &PriorWeights::default()),
        );
        assert!((0.0..=1.0).contains(&post));
        assert!((0.0..=1.0).contains(&confidence(&e)));
    }

    #[test]
    fn raising_one_evidence_weight_never_lowers_posterior() {
        // Shift weight toward the strongest channel and verify the
        // posterior is non-decreasing for this (high-semantic) message.
        let e = sample_evidence();
        let p = sample_prior();
        let base_weights = EvidenceWeights::default();
        let base = posterior(
            likelihood(&e, &base_weights),
            prior(&p, &PriorWeights::default()),
        );

        let mut boosted = base_weights.clone();
        boosted.semantic += 0.1;
        boosted.temporal -= 0.1;
        let after = posterior(
            likelihood(&e, &boosted),
            prior(&p, &PriorWeights::default()),
        );
        assert!(after >= base);
    }

    #[test]
    fn weight_validation_catches_drift() {
        let mut e = EvidenceWeights::default();
        assert!(validate_weights(&e, &PriorWeights::default()).is_ok());
        e.semantic += 0.2;
        assert!(validate_weights(&e, &PriorWeights::default()).is_err());
    }
}
