use serde::Serialize;

/// Directional co-change of `file` (the target) with `other_file`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouplingEdge {
    pub file: String,
    pub other_file: String,
    /// Commits touching both files
    pub shared_commits: usize,
    /// Commits touching the target
    pub target_commit_touches: usize,
    /// shared_commits / target_commit_touches, in [0, 1]
    pub coupling: f64,
}

/// Fixed-width churn bucket for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VelocityBucket {
    pub bucket_index: usize,
    /// `YYYY-MM-DD` of the bucket's left edge
    pub bucket_start: String,
    pub commit_touches: usize,
    pub insertions: u64,
    pub deletions: u64,
}
