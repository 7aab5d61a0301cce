use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::AnalysisOptions;
use crate::models::session::{
    CommitAttribution, ContextScope, LazyCommitLink, LazyReason, PromptAssessment, Session,
};
use crate::models::window::TimeWindow;

static VAGUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(do it|fix it|handle it|make it|same as before|you know|as discussed|continue|just|whatever|that thing|this part)\b",
    )
    .expect("Invalid vague-reference regex")
});

static SUCCESS_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(test|assert|verify|acceptance|should|must|output|report|criteria|pass|fail)\b")
        .expect("Invalid success-cue regex")
});

static TARGET_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(/[\w\-.]+)+|\b\w+\.py\b|\b\w+\.md\b|\b\w+\.json\b").expect("Invalid target-cue regex")
});

const SHORT_PROMPT_WORDS: usize = 8;
const IMPERATIVE_OPENERS: &[&str] = &["do ", "fix ", "continue", "same ", "just "];

/// Reasons that say the request lacks a target or an acceptance check.
fn is_missing_anchor(reason: LazyReason) -> bool {
    matches!(
        reason,
        LazyReason::NoExplicitTargetMultiTurn | LazyReason::NoSuccessCriteriaMultiTurn
    )
}

/// Score `text` against the prompts that preceded it.
///
/// Target and success cues count when they appear in the prompt or anywhere
/// in the context turns.
pub fn score_prompt(text: &str, context: &[&str]) -> (u32, Vec<LazyReason>) {
    let text = text.trim();
    let context_text = context.join("\n");

    let target_now = TARGET_CUE.is_match(text);
    let success_now = SUCCESS_CUE.is_match(text);
    let target_context = TARGET_CUE.is_match(&context_text);
    let success_context = SUCCESS_CUE.is_match(&context_text);
    let context_anchored = target_context || success_context;

    let mut reasons = Vec::new();
    if text.split_whitespace().count() < SHORT_PROMPT_WORDS && !context_anchored {
        reasons.push(LazyReason::ShortWithoutContext);
    }
    if !target_now && !target_context {
        reasons.push(LazyReason::NoExplicitTargetMultiTurn);
    }
    if !success_now && !success_context {
        reasons.push(LazyReason::NoSuccessCriteriaMultiTurn);
    }
    if VAGUE.is_match(text) {
        reasons.push(LazyReason::VagueReference);
    }
    let lower = text.to_lowercase();
    if IMPERATIVE_OPENERS.iter().any(|o| lower.starts_with(o)) && !context_anchored {
        reasons.push(LazyReason::UnderspecifiedImperative);
    }

    (reasons.len() as u32, reasons)
}

/// Assess each prompt of `session`, optionally only those inside `window`.
///
/// Context is the last `lazy_context_window` earlier prompts of the same
/// session. With fewer than `lazy_min_lookback` of them the prompt is never
/// lazy and its scope is `insufficient`.
pub fn assess_session(
    session: &Session,
    window: Option<&TimeWindow>,
    options: &AnalysisOptions,
) -> Vec<PromptAssessment> {
    session
        .prompts
        .iter()
        .enumerate()
        .filter(|(_, p)| window.is_none_or(|w| w.contains(p.timestamp)))
        .map(|(idx, prompt)| {
            let from = idx.saturating_sub(options.lazy_context_window);
            let context: Vec<&str> = session.prompts[from..idx].iter().map(|p| p.text.as_str()).collect();
            let (score, reasons) = score_prompt(&prompt.text, &context);

            let scope = if context.len() >= options.lazy_min_lookback {
                ContextScope::Session
            } else {
                ContextScope::Insufficient
            };
            let lazy = scope == ContextScope::Session
                && score >= options.lazy_score_threshold
                && reasons.iter().any(|r| is_missing_anchor(*r));

            PromptAssessment {
                session_id: prompt.session_id.clone(),
                repo: prompt.repo.clone(),
                source: prompt.source,
                timestamp: prompt.timestamp,
                text: prompt.text.clone(),
                lazy_score: score,
                lazy,
                reasons,
                context_scope: scope,
                context_turns_considered: context.len(),
            }
        })
        .collect()
}

/// Aggregate view of a batch of assessments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptLintSummary {
    pub prompts: usize,
    pub lazy_prompts: usize,
    pub lazy_ratio: f64,
    /// Reason → count over lazy prompts only.
    pub reason_counts: BTreeMap<LazyReason, usize>,
    pub context_scope_counts: BTreeMap<ContextScope, usize>,
}

impl PromptLintSummary {
    pub fn from_assessments(rows: &[PromptAssessment]) -> Self {
        let lazy: Vec<&PromptAssessment> = rows.iter().filter(|r| r.lazy).collect();
        let mut reason_counts = BTreeMap::new();
        for row in &lazy {
            for reason in &row.reasons {
                *reason_counts.entry(*reason).or_insert(0) += 1;
            }
        }
        let mut context_scope_counts = BTreeMap::new();
        for row in rows {
            *context_scope_counts.entry(row.context_scope).or_insert(0) += 1;
        }
        let lazy_ratio = if rows.is_empty() {
            0.0
        } else {
            ((lazy.len() as f64 / rows.len() as f64) * 1_000_000.0).round() / 1_000_000.0
        };
        Self {
            prompts: rows.len(),
            lazy_prompts: lazy.len(),
            lazy_ratio,
            reason_counts,
            context_scope_counts,
        }
    }
}

/// Join attributed commits to the assessment of their nearest prompt and keep
/// those whose prompt was lazy. Ordered like `rows`.
pub fn lazy_commit_links(rows: &[CommitAttribution], assessments: &[PromptAssessment]) -> Vec<LazyCommitLink> {
    let lazy: BTreeMap<(&str, OffsetDateTime), &PromptAssessment> = assessments
        .iter()
        .filter(|a| a.lazy)
        .map(|a| ((a.session_id.as_str(), a.timestamp), a))
        .collect();

    rows.iter()
        .filter_map(|row| {
            let key = (row.session_id.as_deref()?, row.nearest_prompt_at?);
            let prompt = lazy.get(&key)?;
            Some(LazyCommitLink {
                repo: row.repo.clone(),
                sha: row.sha.clone(),
                timestamp: row.timestamp,
                subject: row.subject.clone(),
                session_id: prompt.session_id.clone(),
                lag_hours: row.lag_hours.unwrap_or_default(),
                prompt_text: prompt.text.clone(),
                prompt_reasons: prompt.reasons.clone(),
                files: row.files.clone(),
                insertions: row.insertions,
                deletions: row.deletions,
            })
        })
        .collect()
}
