//! # Precedence Resolution Module
//!
//! ## Purpose
//! Collapses multiple jurisdiction-scoped versions of the same rule into one
//! effective answer. Hits sharing a canonical rule key form a group; the
//! highest-precedence version becomes the primary and everything else is
//! demoted to an alternate.
//!
//! ## Input/Output Specification
//! - **Input**: Search hits, the queried jurisdiction context, and a snapshot
//!   of confirmed override mappings for the same season/jurisdiction scope
//! - **Output**: `PrecedenceGroup` list, most relevant group first
//! - **Determinism**: Identical hit sets and mapping snapshots produce
//!   identical output on every call
//!
//! ## Precedence
//! Regional (matching jurisdiction) = 3, Provincial = 2, National = 1,
//! Regional for a different jurisdiction = 0 (excluded entirely). Rank
//! strictly dominates relevance score: a low-scoring regional hit still
//! outranks a high-scoring national hit for the same rule. A confirmed
//! override mapping beats natural rank; confirmed human decisions always
//! win.

use crate::overrides::{OverrideMapping, OverrideStatus};
use crate::{ScopeLevel, SearchHit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One rule concept resolved to a single effective version.
/// Recomputed on every query; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecedenceGroup {
    /// Canonical rule key the group formed around; `None` for standalone hits
    pub rule_key: Option<String>,
    /// The authoritative version under the jurisdiction hierarchy
    pub primary: SearchHit,
    /// Remaining versions in precedence order
    pub alternates: Vec<SearchHit>,
}

/// Resolves search hits into precedence groups.
pub struct PrecedenceResolver;

impl PrecedenceResolver {
    pub fn new() -> Self {
        Self
    }

    /// Group hits by canonical rule key and pick one primary per group.
    ///
    /// `confirmed_mappings` is the read-only snapshot of override mappings
    /// for the queried (season, jurisdiction) scope; entries that are not
    /// Confirmed are ignored here regardless of what the caller passed.
    pub fn resolve(
        &self,
        hits: Vec<SearchHit>,
        jurisdiction_context: Option<&str>,
        confirmed_mappings: &[OverrideMapping],
    ) -> Vec<PrecedenceGroup> {
        let confirmed_chunk_ids: Vec<&str> = confirmed_mappings
            .iter()
            .filter(|m| m.status == OverrideStatus::Confirmed)
            .map(|m| m.proposal.source_chunk_id.as_str())
            .collect();

        let mut keyed: BTreeMap<String, Vec<SearchHit>> = BTreeMap::new();
        let mut standalone: Vec<SearchHit> = Vec::new();

        for hit in hits {
            // A regional source for some other jurisdiction is never an
            // answer for this query, grouped or not.
            if precedence_rank(&hit, jurisdiction_context) == 0 {
                tracing::debug!(
                    chunk_id = %hit.chunk.chunk_id,
                    "Excluding regional hit from a different jurisdiction"
                );
                continue;
            }

            match hit.chunk.canonical_rule_key.clone() {
                Some(key) => keyed.entry(key).or_default().push(hit),
                None => standalone.push(hit),
            }
        }

        let mut groups = Vec::new();

        for (rule_key, mut members) in keyed {
            sort_by_precedence(&mut members, jurisdiction_context);

            // Confirmed-override promotion: a confirmed mapping keyed by a
            // member's chunk ID forces that member to primary.
            if let Some(promoted) = members
                .iter()
                .position(|hit| confirmed_chunk_ids.contains(&hit.chunk.chunk_id.as_str()))
            {
                if promoted != 0 {
                    tracing::debug!(
                        rule_key = %rule_key,
                        chunk_id = %members[promoted].chunk.chunk_id,
                        "Promoting confirmed override to primary"
                    );
                    members.swap(0, promoted);
                }
            }

            let mut iter = members.into_iter();
            let Some(primary) = iter.next() else {
                continue;
            };
            groups.push(PrecedenceGroup {
                rule_key: Some(rule_key),
                primary,
                alternates: iter.collect(),
            });
        }

        // Standalone content competes on score alone.
        standalone.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        for hit in standalone {
            groups.push(PrecedenceGroup {
                rule_key: None,
                primary: hit,
                alternates: Vec::new(),
            });
        }

        // Most relevant group first, judged by the best score anywhere in the
        // group so a demoted-but-highly-relevant national hit still pulls its
        // group forward. Ties break on chunk ID for stable output.
        groups.sort_by(|a, b| {
            best_score(b)
                .partial_cmp(&best_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.primary.chunk.chunk_id.cmp(&b.primary.chunk.chunk_id))
        });

        groups
    }
}

impl Default for PrecedenceResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Precedence rank of a hit under the queried jurisdiction.
/// Zero means the hit is excluded from resolution entirely.
pub fn precedence_rank(hit: &SearchHit, jurisdiction_context: Option<&str>) -> u8 {
    match hit.chunk.scope_level {
        ScopeLevel::Regional => match (hit.chunk.jurisdiction_id.as_deref(), jurisdiction_context)
        {
            (Some(chunk_jurisdiction), Some(queried)) if chunk_jurisdiction == queried => 3,
            _ => 0,
        },
        ScopeLevel::Provincial => 2,
        ScopeLevel::National => 1,
    }
}

/// Rank strictly dominates score; score breaks rank ties; chunk ID breaks
/// score ties so the sort is stable across calls.
fn sort_by_precedence(hits: &mut [SearchHit], jurisdiction_context: Option<&str>) {
    hits.sort_by(|a, b| {
        precedence_rank(b, jurisdiction_context)
            .cmp(&precedence_rank(a, jurisdiction_context))
            .then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
}

fn best_score(group: &PrecedenceGroup) -> f32 {
    group
        .alternates
        .iter()
        .map(|h| h.score)
        .fold(group.primary.score, f32::max)
}
