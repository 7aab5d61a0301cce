use time::OffsetDateTime;

/// A file's delta within one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTouch {
    pub sha: String,
    pub path: String,
    pub insertions: u64,
    pub deletions: u64,
    pub binary: bool,
    /// Source path when numstat reported a rename.
    pub renamed_from: Option<String>,
}

impl FileTouch {
    pub fn churn(&self) -> u64 {
        self.insertions + self.deletions
    }

    /// A pure rename: new path, no line changes.
    pub fn is_rename_only(&self) -> bool {
        self.renamed_from.is_some() && !self.binary && self.churn() == 0
    }
}

/// One VCS revision with its file touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub repo: String,
    pub sha: String,
    pub timestamp: OffsetDateTime,
    pub subject: String,
    pub parent_count: usize,
    pub insertions: u64,
    pub deletions: u64,
    pub is_binary_numstat: bool,
    pub is_merge: bool,
    pub touches: Vec<FileTouch>,
}

impl Commit {
    pub fn new(
        repo: impl Into<String>,
        sha: impl Into<String>,
        timestamp: OffsetDateTime,
        subject: impl Into<String>,
        parent_count: usize,
    ) -> Self {
        Self {
            repo: repo.into(),
            sha: sha.into(),
            timestamp,
            subject: subject.into(),
            parent_count,
            insertions: 0,
            deletions: 0,
            is_binary_numstat: false,
            is_merge: parent_count > 1,
            touches: Vec::new(),
        }
    }

    /// Add a numstat entry. `None` counts mean a binary (`-`) entry.
    /// Repeated paths accumulate into the existing touch.
    pub fn add_touch(
        &mut self,
        path: &str,
        renamed_from: Option<String>,
        insertions: Option<u64>,
        deletions: Option<u64>,
    ) {
        let binary = insertions.is_none() || deletions.is_none();
        let ins = insertions.unwrap_or(0);
        let dels = deletions.unwrap_or(0);

        if binary {
            self.is_binary_numstat = true;
        }
        self.insertions += ins;
        self.deletions += dels;

        if let Some(existing) = self.touches.iter_mut().find(|t| t.path == path) {
            existing.insertions += ins;
            existing.deletions += dels;
            existing.binary |= binary;
            return;
        }
        self.touches.push(FileTouch {
            sha: self.sha.clone(),
            path: path.to_string(),
            insertions: ins,
            deletions: dels,
            binary,
            renamed_from,
        });
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.touches.iter().map(|t| t.path.as_str())
    }

    pub fn touch(&self, path: &str) -> Option<&FileTouch> {
        self.touches.iter().find(|t| t.path == path)
    }

    pub fn touches_file(&self, path: &str) -> bool {
        self.touch(path).is_some()
    }

    pub fn lines_changed(&self) -> u64 {
        self.insertions + self.deletions
    }

    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }
}
