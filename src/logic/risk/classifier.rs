//! Local Risk Classifier
//!
//! Input: FeatureVector. Output: Classification.
//! Pinned rules first (non-overridable), then a weighted score mapped to a
//! tier. Deterministic, allocation-light, no I/O.

use std::time::Instant;

use crate::constants::LOCAL_CLASSIFY_BUDGET_MICROS;
use crate::logic::config::TierThresholds;
use crate::logic::features::FeatureVector;

use super::rules::{
    pinned_matches, FAMILIARITY_DISCOUNT, FAMILIARITY_MIN_OCCURRENCES, FLAG_WEIGHTS,
    HIGH_ENTROPY_BITS, HIGH_ENTROPY_WEIGHT, MANY_ARGS, MANY_ARGS_WEIGHT, PATH_TARGET_CAP,
    PATH_TARGET_WEIGHT, RULESET_VERSION, UNKNOWN_VERB_WEIGHT, VERB_CLASS_REASONS,
    VERB_CLASS_WEIGHTS,
};
use super::types::{Classification, RiskTier};

// ============================================================================
// MAIN CLASSIFICATION FUNCTION
// ============================================================================

/// Classify with the built-in thresholds
pub fn classify(vector: &FeatureVector) -> Classification {
    classify_with_thresholds(vector, &TierThresholds::default())
}

/// Classify with custom tier thresholds
///
/// Never panics on bad input: a vector from another schema or with
/// non-finite values yields `High` with `fault` set.
pub fn classify_with_thresholds(vector: &FeatureVector, thresholds: &TierThresholds) -> Classification {
    let started = Instant::now();
    let result = evaluate(vector, thresholds);

    let elapsed = started.elapsed().as_micros();
    if elapsed > LOCAL_CLASSIFY_BUDGET_MICROS {
        log::warn!("Local classification took {} µs (budget {} µs)", elapsed, LOCAL_CLASSIFY_BUDGET_MICROS);
    }
    result
}

fn evaluate(vector: &FeatureVector, thresholds: &TierThresholds) -> Classification {
    if let Err(e) = vector.validate() {
        return fault(format!("{}", e));
    }
    if let Some(index) = vector.first_non_finite() {
        return fault(format!("feature {} is not finite", index));
    }

    // Pinned rules: always high
    let pinned = pinned_matches(vector);

    let mut reasons: Vec<String> = pinned
        .iter()
        .map(|rule| format!("pinned rule {}: {}", rule.id(), rule.description()))
        .collect();

    // Weighted score
    let mut contributions: Vec<(f32, String)> = Vec::new();

    let class_index = (vector.value("verb_risk_class").round().max(0.0) as usize).min(VERB_CLASS_WEIGHTS.len() - 1);
    let class_weight = VERB_CLASS_WEIGHTS[class_index];
    if class_weight > 0.0 {
        contributions.push((class_weight, VERB_CLASS_REASONS[class_index].to_string()));
    }
    if !vector.flag("verb_known") {
        contributions.push((UNKNOWN_VERB_WEIGHT, "unrecognised command".to_string()));
    }

    for (feature, weight, reason) in FLAG_WEIGHTS {
        if vector.flag(feature) {
            contributions.push((*weight, reason.to_string()));
        }
    }

    let paths = vector.value("target_path_count");
    if paths > 0.0 {
        let weight = (paths * PATH_TARGET_WEIGHT).min(PATH_TARGET_CAP);
        contributions.push((weight, format!("{} path target(s)", paths as u32)));
    }
    let entropy = vector.value("argument_entropy");
    if entropy > HIGH_ENTROPY_BITS {
        contributions.push((HIGH_ENTROPY_WEIGHT, format!("high-entropy argument ({:.2} bits/char)", entropy)));
    }
    if vector.value("arg_count") > MANY_ARGS {
        contributions.push((MANY_ARGS_WEIGHT, "long argument list".to_string()));
    }

    let mut score: f32 = contributions.iter().map(|(w, _)| *w).sum::<f32>().clamp(0.0, 1.0);

    let unparseable = vector.flag("unparseable");
    let familiar = vector.value("session_frequency") >= FAMILIARITY_MIN_OCCURRENCES;
    if familiar && pinned.is_empty() && !unparseable {
        score *= FAMILIARITY_DISCOUNT;
    }

    // Most severe first; stable for equal weights
    contributions.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    reasons.extend(contributions.into_iter().map(|(w, r)| format!("{} (+{:.2})", r, w)));
    if familiar && pinned.is_empty() && !unparseable {
        reasons.push(format!("seen {} times this session (x{:.1})", vector.value("session_frequency") as u32, FAMILIARITY_DISCOUNT));
    }

    let scored_tier = if score < thresholds.low_max {
        RiskTier::Low
    } else if score >= thresholds.high_min {
        RiskTier::High
    } else {
        RiskTier::Medium
    };

    let mut tier = scored_tier;
    let mut floored = false;
    if !pinned.is_empty() {
        tier = RiskTier::High;
    } else if unparseable && tier < RiskTier::Medium {
        tier = RiskTier::Medium;
        floored = true;
        reasons.push("unparseable input floored at medium".to_string());
    }

    let reasoning = if reasons.is_empty() {
        format!("{} risk: no risk markers (score {:.2})", tier, score)
    } else {
        format!("{} risk (score {:.2}): {}", tier, score, reasons.join("; "))
    };

    Classification {
        tier,
        reasoning,
        reasons,
        pinned,
        score,
        floored,
        fault: None,
        ruleset_version: RULESET_VERSION,
    }
}

fn fault(detail: String) -> Classification {
    log::error!("Classification fault: {}", detail);
    Classification {
        tier: RiskTier::High,
        reasoning: format!("classification fault: {}", detail),
        reasons: vec![format!("classification fault: {}", detail)],
        pinned: Vec::new(),
        score: 1.0,
        floored: false,
        fault: Some(detail),
        ruleset_version: RULESET_VERSION,
    }
}

// ============================================================================
// TESTS
// ============================================================================
