use anyhow::{Result, bail};
use std::collections::{BTreeMap, BTreeSet};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::attribution::attribute_commits;
use crate::engine::cochange::{self, coupling_for, top_coupling, velocity};
use crate::engine::extractor::{aggregate_symbols, extract_symbol_touches};
use crate::engine::git::{GitCli, VcsSource};
use crate::engine::history::{HistoryExtract, extract_history};
use crate::engine::lazy::{PromptLintSummary, assess_session, lazy_commit_links};
use crate::engine::metrics;
use crate::engine::transcript::{SessionLayout, SessionLoad, load_sessions};
use crate::error::{ErrorCode, TimelapseError};
use crate::models::commit::Commit;
use crate::models::metrics::Optimization;
use crate::models::quality::{FlagKind, QualityLog};
use crate::models::report::{
    CommitRow, Envelope, FileBody, FileTouchRow, PromptBody, Report, RepoBody, SessionBody, SessionInfo, SymbolBody,
};
use crate::models::session::{Prompt, SessionTotals};
use crate::models::symbol::ExtractionMethod;
use crate::models::window::TimeWindow;

const TOP_CHURN_FILES: usize = 25;
const SESSION_TOP_FILES: usize = 10;

// ---------------------------------------------------------------------------
// AppService: one analysis run over a fixed configuration snapshot
// ---------------------------------------------------------------------------

pub struct AppService {
    config: Config,
    sources: BTreeMap<String, Box<dyn VcsSource>>,
    generated_at: OffsetDateTime,
}

impl AppService {
    /// One `git` source per configured repository.
    pub fn from_config(config: Config, generated_at: OffsetDateTime) -> Self {
        let sources = config
            .repos
            .iter()
            .map(|(name, dir)| (name.clone(), Box::new(GitCli::new(dir)) as Box<dyn VcsSource>))
            .collect();
        Self::with_sources(config, sources, generated_at)
    }

    pub fn with_sources(
        config: Config,
        sources: BTreeMap<String, Box<dyn VcsSource>>,
        generated_at: OffsetDateTime,
    ) -> Self {
        Self {
            config,
            sources,
            generated_at,
        }
    }

    pub fn generated_at(&self) -> OffsetDateTime {
        self.generated_at
    }

    /// The `days`-long window ending at `end`, or at generation time.
    pub fn window(&self, days: i64, end: Option<OffsetDateTime>) -> Result<TimeWindow> {
        Ok(TimeWindow::trailing_days(end.unwrap_or(self.generated_at), days)?)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn source(&self, repo: &str) -> Result<&dyn VcsSource> {
        self.config.repo_path(repo)?;
        match self.sources.get(repo) {
            Some(source) => Ok(source.as_ref()),
            None => bail!(TimelapseError::unknown_repo(repo)),
        }
    }

    fn history(&self, repo: &str, window: &TimeWindow) -> Result<HistoryExtract> {
        extract_history(repo, self.source(repo)?, window)
    }

    fn sessions(&self) -> SessionLoad {
        let layout = SessionLayout {
            claude_dirs: &self.config.sessions.claude_dirs,
            codex_dir: self.config.sessions.codex_dir.as_deref(),
            repos: &self.config.repos,
        };
        load_sessions(&layout, self.config.analysis.prompt_text_limit)
    }

    fn envelope(&self, window: &TimeWindow, flags: QualityLog) -> Envelope {
        Envelope::new(self.generated_at, window, flags.into_vec())
    }

    /// Selected repositories: the named one, or every configured one.
    fn select_repos(&self, repo: Option<&str>) -> Result<Vec<String>> {
        match repo {
            Some(name) => {
                self.config.repo_path(name)?;
                Ok(vec![name.to_string()])
            }
            None if self.config.repos.is_empty() => bail!(TimelapseError::new(
                ErrorCode::InvalidConfig,
                "No repositories configured; add a [repos] section",
            )),
            None => Ok(self.config.repos.keys().cloned().collect()),
        }
    }

    // -----------------------------------------------------------------------
    // Payloads
    // -----------------------------------------------------------------------

    /// Throughput, mix, rework, coupling and attribution over `window`.
    pub fn repo_report(&self, repo: Option<&str>, window: &TimeWindow) -> Result<Report<RepoBody>> {
        let repos = self.select_repos(repo)?;
        let options = &self.config.analysis;
        let mut flags = QualityLog::new();

        let mut commits: Vec<Commit> = Vec::new();
        let mut coupling = Vec::new();
        for name in &repos {
            let extract = self.history(name, window)?;
            flags.extend(extract.flags);
            let report = top_coupling(&extract.commits, options);
            flags.extend(report.flags);
            coupling.extend(report.edges);
            commits.extend(extract.commits);
        }
        commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));
        cochange::sort_and_truncate(&mut coupling, options.coupling_top_n);

        let load = self.sessions();
        flags.extend(load.flags);
        let selected: BTreeSet<&str> = repos.iter().map(String::as_str).collect();
        let sessions: Vec<_> = load
            .sessions
            .into_iter()
            .filter(|s| selected.contains(s.repo.as_str()))
            .collect();
        let prompts: Vec<&Prompt> = sessions
            .iter()
            .flat_map(|s| &s.prompts)
            .filter(|p| window.contains(p.timestamp))
            .collect();

        let attribution = attribute_commits(&commits, &sessions, options);
        flags.extend(attribution.flags);
        // Full-session context, since a linked prompt may precede the window.
        let assessments: Vec<_> = sessions.iter().flat_map(|s| assess_session(s, None, options)).collect();
        let lazy_links = lazy_commit_links(&attribution.rows, &assessments);

        let body = RepoBody {
            repos,
            throughput: metrics::throughput(&commits, prompts.len(), window),
            mix: metrics::mix(&commits, &prompts),
            optimization: Optimization {
                rework_ratio_7day: metrics::rework_ratio(
                    &commits,
                    window.end,
                    options.rework_window_days,
                    options.rework_window_days,
                ),
                median_prompt_lag_hours: metrics::median_prompt_lag(&attribution.rows),
            },
            top_churn_files: metrics::top_churn_files(&commits, TOP_CHURN_FILES),
            rework_series: metrics::rework_series(
                &commits,
                window,
                options.bucket_days,
                options.rework_window_days,
            ),
            top_coupling: coupling,
            commits: commits.iter().map(CommitRow::from).collect(),
            commit_attribution: attribution.rows,
            lazy_commit_links: lazy_links,
        };
        debug!(
            repos = body.repos.len(),
            commits = body.commits.len(),
            prompts = body.throughput.prompts,
            "repo report built"
        );
        Ok(Report {
            envelope: self.envelope(window, flags),
            body,
        })
    }

    /// Churn, coupling and velocity of one file.
    pub fn file_report(&self, repo: &str, file: &str, window: &TimeWindow) -> Result<Report<FileBody>> {
        let options = &self.config.analysis;
        let extract = self.history(repo, window)?;
        let mut flags = QualityLog::new();
        flags.extend(extract.flags);
        let commits = extract.commits;

        let touches: Vec<FileTouchRow> = commits
            .iter()
            .filter_map(|c| c.touch(file).map(|t| FileTouchRow::new(c, t)))
            .collect();
        if touches.is_empty() {
            warn!(repo, file, "no commits touch file in window");
            flags.record(FlagKind::NoCommitsForFile, file);
        }

        let coupling = coupling_for(file, &commits, options);
        flags.extend(coupling.flags);

        let body = FileBody {
            repo: repo.to_string(),
            file: file.to_string(),
            summary: metrics::file_summary(file, &commits),
            retouch_ratio: metrics::retouch_ratio(file, &commits, options.rework_window_days),
            coupling: coupling.edges,
            velocity: velocity(file, &commits, window, options.bucket_days),
            touches,
        };
        Ok(Report {
            envelope: self.envelope(window, flags),
            body,
        })
    }

    /// Symbol touches and per-symbol aggregates of one file.
    pub fn symbol_report(&self, repo: &str, file: &str, window: &TimeWindow) -> Result<Report<SymbolBody>> {
        let source = self.source(repo)?;
        let extract = extract_history(repo, source, window)?;
        let mut flags = QualityLog::new();
        flags.extend(extract.flags);

        let commits: Vec<Commit> = extract
            .commits
            .into_iter()
            .filter(|c| c.touches_file(file))
            .collect();
        if commits.is_empty() {
            flags.record(FlagKind::NoCommitsForFile, file);
        }

        let symbols = extract_symbol_touches(&commits, source, Some(file), self.config.analysis.parse_timeout());
        flags.extend(symbols.flags);

        let mut extraction: BTreeMap<ExtractionMethod, usize> = BTreeMap::new();
        for touch in &symbols.touches {
            *extraction.entry(touch.extractor).or_insert(0) += 1;
        }

        let body = SymbolBody {
            repo: repo.to_string(),
            file: file.to_string(),
            extraction,
            symbols: aggregate_symbols(&symbols.touches),
            symbol_touches: symbols.touches,
        };
        Ok(Report {
            envelope: self.envelope(window, flags),
            body,
        })
    }

    /// Prompts, linked commits and totals of one session.
    ///
    /// The window spans the session widened by the attribution lead margin and
    /// the maximum lag, so every commit the session could explain is seen.
    pub fn session_report(&self, session_id: &str, repo: Option<&str>) -> Result<Report<SessionBody>> {
        let options = &self.config.analysis;
        let load = self.sessions();
        let Some(session) = load
            .sessions
            .iter()
            .find(|s| s.id == session_id && repo.is_none_or(|r| s.repo == r))
        else {
            bail!(TimelapseError::new(
                ErrorCode::InvalidRequest,
                format!("Unknown session: {session_id}"),
            ));
        };

        // End is exclusive; a commit exactly max_lag_hours after the session still counts.
        let start = session
            .start
            .checked_sub(Duration::minutes(options.attribution_lead_minutes));
        let end = Duration::checked_seconds_f64(options.max_lag_hours * 3600.0)
            .and_then(|lag| session.end.checked_add(lag))
            .and_then(|end| end.checked_add(Duration::seconds(1)));
        let (Some(start), Some(end)) = (start, end) else {
            bail!(TimelapseError::invalid_window(format!(
                "Attribution window of session {session_id} is out of the supported date range"
            )));
        };
        let window = TimeWindow::new(start, end)?;
        let extract = self.history(&session.repo, &window)?;

        let mut flags = QualityLog::new();
        flags.extend(extract.flags);
        flags.extend(
            load.flags
                .iter()
                .filter(|f| f.context == session.id || f.context.starts_with(&format!("{}:", session.id)))
                .cloned(),
        );

        let attribution = attribute_commits(&extract.commits, &load.sessions, options);
        let linked: Vec<_> = attribution
            .rows
            .into_iter()
            .filter(|r| r.session_id.as_deref() == Some(session.id.as_str()))
            .collect();
        let linked_shas: BTreeSet<&str> = linked.iter().map(|r| r.sha.as_str()).collect();
        let linked_commits = extract.commits.iter().filter(|c| linked_shas.contains(c.sha.as_str()));

        let body = SessionBody {
            session: SessionInfo::from(session),
            totals: SessionTotals::derive(session, &linked),
            prompts: assess_session(session, None, options),
            top_files: metrics::top_churn_files(linked_commits, SESSION_TOP_FILES),
            commit_attribution: linked,
        };
        Ok(Report {
            envelope: self.envelope(&window, flags),
            body,
        })
    }

    /// Lazy-prompt assessment of every prompt in `window`.
    pub fn prompt_report(&self, repo: Option<&str>, window: &TimeWindow) -> Result<Report<PromptBody>> {
        if let Some(name) = repo {
            self.config.repo_path(name)?;
        }
        let load = self.sessions();
        let mut flags = QualityLog::new();
        flags.extend(load.flags);

        let mut prompts: Vec<_> = load
            .sessions
            .iter()
            .filter(|s| repo.is_none_or(|r| s.repo == r))
            .flat_map(|s| assess_session(s, Some(window), &self.config.analysis))
            .collect();
        prompts.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });

        let body = PromptBody {
            summary: PromptLintSummary::from_assessments(&prompts),
            prompts,
        };
        Ok(Report {
            envelope: self.envelope(window, flags),
            body,
        })
    }
}
