//! Fusion of branch outputs into a single scored [`EnhancedResult`].
//!
//! # Confidence
//!
//! Each branch owns a weighted slot and is counted only when it produced
//! at least one item:
//!
//! | Branch | Weight | Contribution |
//! |--------|--------|--------------|
//! | personal | 0.4 | `min(n × 0.3, 0.4)` |
//! | external | 0.4 | `avg(item confidence, default 0.5) × 0.4` |
//! | similarity | 0.2 | `avg(similarity) × 0.2` |
//!
//! `confidence = Σ contributions / Σ counted weights`, or `0` when nothing
//! was counted. Normalizing against the counted weights means a query with
//! no personal data is not penalized for lacking it.
//!
//! # Freshness
//!
//! `current` if any external item is flagged current, else `recent` if any
//! external item was retrieved within the last 24 hours, else `outdated`.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};

use crate::models::{EnhancedResult, ExternalItem, Freshness, PersonalItem, SimilarityMatch};

pub const PERSONAL_WEIGHT: f64 = 0.4;
pub const EXTERNAL_WEIGHT: f64 = 0.4;
pub const SIMILARITY_WEIGHT: f64 = 0.2;
/// Personal contribution per item before the slot cap.
pub const PERSONAL_PER_ITEM: f64 = 0.3;
/// Scored confidence of an external item that carries none.
pub const DEFAULT_EXTERNAL_CONFIDENCE: f64 = 0.5;
/// Window in which a retrieved external item counts as `recent`.
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// Label used in `sources` for personal records.
pub const PERSONAL_SOURCE: &str = "personal";
/// Label used in `sources` for vector-index matches.
pub const SIMILARITY_SOURCE: &str = "similarity";

/// The settled outputs of the three retrieval branches.
#[derive(Debug, Clone, Default)]
pub struct BranchOutputs {
    pub personal: Vec<PersonalItem>,
    pub external: Vec<ExternalItem>,
    pub similar: Vec<SimilarityMatch>,
}

/// Fuse branch outputs into a fresh (non-cached) result.
///
/// Fails only when a score is not finite; callers substitute
/// [`EnhancedResult::empty`].
pub fn fuse(outputs: BranchOutputs, now: DateTime<Utc>) -> Result<EnhancedResult> {
    let confidence = confidence(&outputs.personal, &outputs.external, &outputs.similar)?;
    let freshness = freshness(&outputs.external, now);
    let sources = source_labels(&outputs.personal, &outputs.external, &outputs.similar);

    Ok(EnhancedResult {
        personal_knowledge: outputs.personal,
        external_knowledge: outputs.external,
        similar_content: outputs.similar,
        cache_hit: false,
        sources,
        confidence,
        freshness,
    })
}

/// Evidence-normalized confidence in `[0, 1]`.
pub fn confidence(
    personal: &[PersonalItem],
    external: &[ExternalItem],
    similar: &[SimilarityMatch],
) -> Result<f64> {
    let mut score = 0.0;
    let mut weight = 0.0;

    if !personal.is_empty() {
        score += (personal.len() as f64 * PERSONAL_PER_ITEM).min(PERSONAL_WEIGHT);
        weight += PERSONAL_WEIGHT;
    }

    if !external.is_empty() {
        let mut sum = 0.0;
        for item in external {
            let c = item.confidence.unwrap_or(DEFAULT_EXTERNAL_CONFIDENCE);
            if !c.is_finite() {
                bail!("external item from '{}' has non-finite confidence", item.source_name);
            }
            sum += c.clamp(0.0, 1.0);
        }
        score += (sum / external.len() as f64) * EXTERNAL_WEIGHT;
        weight += EXTERNAL_WEIGHT;
    }

    if !similar.is_empty() {
        let mut sum = 0.0;
        for m in similar {
            if !m.similarity.is_finite() {
                bail!("similarity match has non-finite score");
            }
            sum += m.similarity;
        }
        score += (sum / similar.len() as f64) * SIMILARITY_WEIGHT;
        weight += SIMILARITY_WEIGHT;
    }

    if weight == 0.0 {
        return Ok(0.0);
    }
    Ok((score / weight).clamp(0.0, 1.0))
}

/// Coarse recency of the external evidence.
pub fn freshness(external: &[ExternalItem], now: DateTime<Utc>) -> Freshness {
    if external.iter().any(|e| e.current) {
        return Freshness::Current;
    }
    let window = Duration::hours(RECENT_WINDOW_HOURS);
    let recent = external.iter().any(|e| match e.retrieved_at {
        Some(at) => now - at <= window,
        None => false,
    });
    if recent {
        Freshness::Recent
    } else {
        Freshness::Outdated
    }
}

/// Distinct source labels in first-seen order.
pub fn source_labels(
    personal: &[PersonalItem],
    external: &[ExternalItem],
    similar: &[SimilarityMatch],
) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    let mut push = |label: &str| {
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    };

    if !personal.is_empty() {
        push(PERSONAL_SOURCE);
    }
    for item in external {
        push(&item.source_name);
    }
    if !similar.is_empty() {
        push(SIMILARITY_SOURCE);
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PersonalKind;
    use serde_json::Value;

    fn note() -> PersonalItem {
        PersonalItem {
            kind: PersonalKind::Note,
            title: "n".to_string(),
            content: "c".to_string(),
            metadata: Value::Null,
        }
    }

    fn ext(name: &str, confidence: Option<f64>) -> ExternalItem {
        ExternalItem {
            source_name: name.to_string(),
            content: "c".to_string(),
            url: None,
            confidence,
            retrieved_at: None,
            current: false,
            metadata: Value::Null,
        }
    }

    fn sim(score: f64) -> SimilarityMatch {
        SimilarityMatch {
            text: "t".to_string(),
            similarity: score,
            metadata: Value::Null,
        }
    }

    #[test]
    fn test_no_evidence_is_zero() {
        assert_eq!(confidence(&[], &[], &[]).unwrap(), 0.0);
        let r = fuse(BranchOutputs::default(), Utc::now()).unwrap();
        assert_eq!(r.confidence, 0.0);
        assert!(r.sources.is_empty());
    }

    #[test]
    fn test_single_branch_is_normalized() {
        // One note: 0.3 / 0.4
        assert!((confidence(&[note()], &[], &[]).unwrap() - 0.75).abs() < 1e-9);
        // Two notes hit the slot cap.
        assert!((confidence(&[note(), note()], &[], &[]).unwrap() - 1.0).abs() < 1e-9);
        // External defaults to 0.5.
        assert!((confidence(&[], &[ext("W", None)], &[]).unwrap() - 0.5).abs() < 1e-9);
        // Similarity is its own average.
        assert!((confidence(&[], &[], &[sim(0.8), sim(0.6)]).unwrap() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_combination() {
        // personal 0.4 + external 0.9*0.4 + similarity 0.8*0.2 over 1.0
        let c = confidence(&[note(), note()], &[ext("W", Some(0.9))], &[sim(0.8)]).unwrap();
        assert!((c - (0.4 + 0.36 + 0.16)).abs() < 1e-9);

        // external + similarity only: (0.2 + 0.16) / 0.6
        let c = confidence(&[], &[ext("W", None)], &[sim(0.8)]).unwrap();
        assert!((c - 0.36 / 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_stays_in_unit_interval() {
        let c = confidence(&[], &[ext("W", Some(7.0))], &[sim(-0.9)]).unwrap();
        assert!((0.0..=1.0).contains(&c));
        let c = confidence(&[], &[], &[sim(-1.0)]).unwrap();
        assert_eq!(c, 0.0);
    }

    #[test]
    fn test_non_finite_scores_fail_fusion() {
        assert!(confidence(&[], &[], &[sim(f64::NAN)]).is_err());
        assert!(confidence(&[], &[ext("W", Some(f64::INFINITY))], &[]).is_err());
    }

    #[test]
    fn test_freshness_classification() {
        let now = Utc::now();
        assert_eq!(freshness(&[], now), Freshness::Outdated);

        let mut recent = ext("W", None);
        recent.retrieved_at = Some(now - Duration::hours(3));
        assert_eq!(freshness(&[recent.clone()], now), Freshness::Recent);

        let mut stale = ext("W", None);
        stale.retrieved_at = Some(now - Duration::hours(30));
        assert_eq!(freshness(&[stale.clone()], now), Freshness::Outdated);

        let mut current = stale.clone();
        current.current = true;
        assert_eq!(freshness(&[stale, current], now), Freshness::Current);
    }

    #[test]
    fn test_freshness_ignores_personal_and_similarity() {
        let mut current = ext("W", None);
        current.current = true;
        let r = fuse(
            BranchOutputs {
                personal: vec![note()],
                external: vec![current],
                similar: vec![sim(0.9)],
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.freshness, Freshness::Current);
    }

    #[test]
    fn test_source_labels_are_distinct_and_ordered() {
        let labels = source_labels(
            &[note(), note()],
            &[ext("Wikipedia", None), ext("Crossref", None), ext("Wikipedia", None)],
            &[sim(0.9)],
        );
        assert_eq!(labels, vec!["personal", "Wikipedia", "Crossref", "similarity"]);
    }
}
