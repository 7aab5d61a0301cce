use serde::Serialize;
use std::collections::BTreeMap;

use super::session::AgentSource;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Throughput {
    pub commits: usize,
    pub prompts: usize,
    pub insertions: u64,
    pub deletions: u64,
    pub commits_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Mix {
    pub commits_by_repo: BTreeMap<String, usize>,
    pub prompts_by_repo: BTreeMap<String, usize>,
    pub prompts_by_source: BTreeMap<AgentSource, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimization {
    /// Share of trailing-window touches that re-touched a recently changed file.
    pub rework_ratio_7day: f64,
    /// Median lag of attributed commits; absent without any.
    pub median_prompt_lag_hours: Option<f64>,
}

/// Commit touches and line counts of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChurnFile {
    pub file: String,
    pub touches: usize,
    pub insertions: u64,
    pub deletions: u64,
}

/// Rework within one velocity bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReworkPoint {
    pub bucket_index: usize,
    pub bucket_start: String,
    pub touches: usize,
    pub retouches: usize,
    pub ratio: f64,
}
