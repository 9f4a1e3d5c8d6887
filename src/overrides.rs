//! # Override Detection Module
//!
//! ## Purpose
//! Heuristic detection of cross-jurisdiction rule overrides. When the same
//! canonical rule appears in two or more jurisdiction scopes, chunks are
//! scanned for override-indicator phrases and proposals are produced for
//! human review.
//!
//! ## Input/Output Specification
//! - **Input**: Chunks from one season/jurisdiction context, grouped by
//!   canonical rule key
//! - **Output**: `OverrideProposal` list with confidence scores in [0, 1]
//! - **Lifecycle**: Proposals are persisted as Proposed mappings and only an
//!   external review action moves them to Confirmed or Rejected
//!
//! ## Key Features
//! - Ordered pattern table with per-language phrases and confidence deltas,
//!   extensible per locale without touching control flow
//! - Explicit-phrase matches score 0.7 base, bonuses for a nearby rule number
//!   and for outright replacement wording, capped at 0.95 (heuristic
//!   detection is never reported as certain)
//! - Implicit indicators score 0.5 and apply only to non-national chunks
//! - Detection never blocks ingestion; a failed run just forgoes proposals

use crate::{Chunk, Language, ScopeLevel};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Character window after an override phrase in which a rule-number pattern
/// counts as "nearby".
const NEARBY_WINDOW: usize = 80;

const EXPLICIT_BASE_CONFIDENCE: f32 = 0.7;
const IMPLICIT_CONFIDENCE: f32 = 0.5;
const NEARBY_RULE_BONUS: f32 = 0.1;
const CONFIDENCE_CAP: f32 = 0.95;

/// Kind of override indicator a pattern represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    /// Direct override wording ("replaces rule ...")
    Explicit,
    /// Softer jurisdiction-specific wording ("for our jurisdiction ...")
    Implicit,
}

/// One entry in the override-indicator pattern table.
struct OverridePattern {
    language: Language,
    kind: PatternKind,
    /// Extra confidence this particular phrase carries on top of its kind's
    /// base (outright replacement wording scores higher than an exception)
    confidence_delta: f32,
    label: &'static str,
    regex: Regex,
}

/// A proposed cross-jurisdiction override relationship.
///
/// Created only when the source scope outranks the target scope; never
/// auto-applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideProposal {
    pub source_rule_key: String,
    pub source_chunk_id: String,
    pub source_scope: ScopeLevel,
    pub target_rule_key: String,
    pub target_chunk_id: String,
    pub target_scope: ScopeLevel,
    /// Heuristic confidence in [0, 1]
    pub confidence: f32,
    /// Human-readable explanation of what triggered the proposal
    pub detection_reason: String,
}

/// Review lifecycle of a persisted override mapping.
///
/// Closed state machine: Proposed may move to Confirmed or Rejected once;
/// Confirmed and Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideStatus {
    Proposed,
    Confirmed,
    Rejected,
}

impl OverrideStatus {
    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: OverrideStatus) -> bool {
        matches!(
            (self, next),
            (
                OverrideStatus::Proposed,
                OverrideStatus::Confirmed | OverrideStatus::Rejected
            )
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideStatus::Proposed => "Proposed",
            OverrideStatus::Confirmed => "Confirmed",
            OverrideStatus::Rejected => "Rejected",
        }
    }
}

/// A persisted override record, keyed by (season, jurisdiction, mapping_id).
///
/// Mutated only by the external human-review action, never by ingestion or
/// retrieval. Only Confirmed mappings influence precedence resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideMapping {
    pub mapping_id: Uuid,
    pub season_id: String,
    /// Jurisdiction context the mapping belongs to; `None` means global
    pub jurisdiction_id: Option<String>,
    pub proposal: OverrideProposal,
    pub status: OverrideStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl OverrideMapping {
    /// Wrap a fresh proposal for persistence in the Proposed state.
    pub fn from_proposal(
        proposal: OverrideProposal,
        season_id: &str,
        jurisdiction_id: Option<&str>,
    ) -> Self {
        Self {
            mapping_id: Uuid::new_v4(),
            season_id: season_id.to_string(),
            jurisdiction_id: jurisdiction_id.map(|j| j.to_string()),
            proposal,
            status: OverrideStatus::Proposed,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    /// Table-store partition key: `season:jurisdiction-or-global`.
    pub fn partition_key(&self) -> String {
        partition_key(&self.season_id, self.jurisdiction_id.as_deref())
    }
}

/// Partition key shared by mapping reads and writes.
pub fn partition_key(season_id: &str, jurisdiction_id: Option<&str>) -> String {
    format!("{}:{}", season_id, jurisdiction_id.unwrap_or("global"))
}

/// Heuristic cross-jurisdiction override detector.
pub struct OverrideDetector {
    patterns: Vec<OverridePattern>,
    rule_number: Regex,
}

impl OverrideDetector {
    pub fn new() -> Self {
        let table: Vec<(Language, PatternKind, f32, &'static str, &'static str)> = vec![
            // Explicit indicators, primary language
            (Language::Primary, PatternKind::Explicit, 0.1, "replaces rule", r"(?i)replaces\s+rule"),
            (Language::Primary, PatternKind::Explicit, 0.0, "in place of rule", r"(?i)in\s+place\s+of\s+rule"),
            (Language::Primary, PatternKind::Explicit, 0.0, "exception to rule", r"(?i)exception\s+to\s+rule"),
            (Language::Primary, PatternKind::Explicit, 0.1, "supersedes rule", r"(?i)supersedes\s+rule"),
            // Explicit indicators, secondary language
            (Language::Secondary, PatternKind::Explicit, 0.1, "remplace la règle", r"(?i)remplace\s+la\s+règle"),
            (Language::Secondary, PatternKind::Explicit, 0.0, "au lieu de la règle", r"(?i)au\s+lieu\s+de\s+la\s+règle"),
            (Language::Secondary, PatternKind::Explicit, 0.0, "exception à la règle", r"(?i)exception\s+à\s+la\s+règle"),
            // Implicit indicators, primary language
            (Language::Primary, PatternKind::Implicit, 0.0, "for our jurisdiction", r"(?i)for\s+our\s+jurisdiction"),
            (Language::Primary, PatternKind::Implicit, 0.0, "specifically", r"(?i)\bspecifically\b"),
            (Language::Primary, PatternKind::Implicit, 0.0, "unlike", r"(?i)\bunlike\b"),
            // Implicit indicators, secondary language
            (Language::Secondary, PatternKind::Implicit, 0.0, "pour notre juridiction", r"(?i)pour\s+notre\s+juridiction"),
            (Language::Secondary, PatternKind::Implicit, 0.0, "contrairement", r"(?i)\bcontrairement\b"),
        ];

        let patterns = table
            .into_iter()
            .map(|(language, kind, confidence_delta, label, source)| OverridePattern {
                language,
                kind,
                confidence_delta,
                label,
                // Table entries are static and verified by the module tests.
                regex: Regex::new(source).expect("override pattern must compile"),
            })
            .collect();

        let rule_number =
            Regex::new(r"\d{1,3}(?:\.\d{1,3})*(?:\([a-z0-9]{1,3}\))*").expect("rule number pattern");

        Self {
            patterns,
            rule_number,
        }
    }

    /// Scan chunks from one season/jurisdiction context and propose
    /// cross-jurisdiction overrides.
    ///
    /// Only rule-key groups with two or more members are analyzed; a rule
    /// that exists in a single jurisdiction cannot override anything.
    pub fn detect(&self, chunks: &[Chunk]) -> Vec<OverrideProposal> {
        let mut groups: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
        for chunk in chunks {
            if let Some(key) = chunk.canonical_rule_key.as_deref() {
                groups.entry(key).or_default().push(chunk);
            }
        }

        let mut proposals = Vec::new();

        for (rule_key, members) in groups {
            if members.len() < 2 {
                continue;
            }

            for source in &members {
                let Some((confidence, reason)) = self.score_chunk(source) else {
                    continue;
                };

                for target in &members {
                    if target.chunk_id == source.chunk_id {
                        continue;
                    }
                    // Only strictly lower scopes can be overridden: a Regional
                    // source targets Provincial and National, a Provincial
                    // source targets National only.
                    if target.scope_level.base_rank() >= source.scope_level.base_rank() {
                        continue;
                    }

                    proposals.push(OverrideProposal {
                        source_rule_key: rule_key.to_string(),
                        source_chunk_id: source.chunk_id.clone(),
                        source_scope: source.scope_level,
                        target_rule_key: rule_key.to_string(),
                        target_chunk_id: target.chunk_id.clone(),
                        target_scope: target.scope_level,
                        confidence,
                        detection_reason: reason.clone(),
                    });
                }
            }
        }

        tracing::debug!(proposals = proposals.len(), "Override detection completed");
        proposals
    }

    /// Score a single chunk against the pattern table.
    /// Returns the best confidence and the reason, or `None` if nothing hit.
    fn score_chunk(&self, chunk: &Chunk) -> Option<(f32, String)> {
        let mut best: Option<(f32, String)> = None;

        for pattern in self
            .patterns
            .iter()
            .filter(|p| p.language == chunk.language)
        {
            // Implicit indicators never apply to national-scope text; a
            // national rulebook has nothing below it to override.
            if pattern.kind == PatternKind::Implicit
                && chunk.scope_level == ScopeLevel::National
            {
                continue;
            }

            let Some(m) = pattern.regex.find(&chunk.text) else {
                continue;
            };

            let (confidence, reason) = match pattern.kind {
                PatternKind::Explicit => {
                    let mut confidence = EXPLICIT_BASE_CONFIDENCE + pattern.confidence_delta;
                    let window_end = (m.end() + NEARBY_WINDOW).min(chunk.text.len());
                    let window = safe_slice(&chunk.text, m.end(), window_end);
                    let mut reason = format!("explicit phrase '{}'", pattern.label);
                    if self.rule_number.is_match(window) {
                        confidence += NEARBY_RULE_BONUS;
                        reason.push_str(" with nearby rule number");
                    }
                    (confidence.min(CONFIDENCE_CAP), reason)
                }
                PatternKind::Implicit => (
                    IMPLICIT_CONFIDENCE,
                    format!("implicit indicator '{}'", pattern.label),
                ),
            };

            let better = match &best {
                Some((best_confidence, _)) => confidence > *best_confidence,
                None => true,
            };
            if better {
                best = Some((confidence, reason));
            }
        }

        best
    }
}

impl Default for OverrideDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Slice on char boundaries; the window end may land inside a multi-byte char.
fn safe_slice(text: &str, start: usize, end: usize) -> &str {
    let mut end = end.min(text.len());
    while end > start && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut start = start;
    while start < end && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..end]
}
