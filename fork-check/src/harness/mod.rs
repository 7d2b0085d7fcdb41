//! Validation run orchestration.
//!
//! Sequences snapshot → mutate → build → test → restore. Once the snapshot is
//! taken every path goes through restoration: the stage methods return an
//! outcome instead of bailing out, and [`Backup`]'s `Drop` covers unwinding.

pub mod report;


use crate::candidate::Candidate;
use crate::invoker::{Invoker, StageStatus};
use crate::manifest::{self, backup::Backup, ManifestFields};
use crate::utils::errors::RestoreError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Snapshotting,
    Mutating,
    Building,
    Testing,
    Restoring,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Snapshotting => "snapshot",
            Stage::Mutating => "mutate",
            Stage::Building => "build",
            Stage::Testing => "test",
            Stage::Restoring => "restore",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Final result of one validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    BuildFailed,
    TestFailed,
    /// Manifest unreadable or unparsable, or the mutation could not be written
    AbortedBeforeRun,
    /// The manifest could not be put back; the repository is left mutated
    RestoreFailed,
    /// SIGINT/SIGTERM arrived; the manifest was restored before exiting
    Interrupted,
}

impl RunOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::BuildFailed => 1,
            RunOutcome::TestFailed => 2,
            RunOutcome::AbortedBeforeRun => 3,
            RunOutcome::RestoreFailed => 4,
            RunOutcome::Interrupted => 130,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunOutcome::Success => "success",
            RunOutcome::BuildFailed => "build failed",
            RunOutcome::TestFailed => "tests failed",
            RunOutcome::AbortedBeforeRun => "aborted before run",
            RunOutcome::RestoreFailed => "RESTORE FAILED",
            RunOutcome::Interrupted => "interrupted",
        };
        f.write_str(text)
    }
}

/// What happened in one stage.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub ok: bool,
    pub detail: String,
    pub elapsed: Duration,
}

/// Everything the operator is told about a run.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub manifest: PathBuf,
    pub candidate: Candidate,
    pub stages: Vec<StageRecord>,
    /// Set only for [`RunOutcome::RestoreFailed`]
    pub restore_error: Option<RestoreError>,
}

impl RunReport {
    /// The first stage that did not succeed.
    pub fn failed_stage(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|record| !record.ok)
    }
}

/// Stage bookkeeping for a single run.
struct Progress {
    stage: Stage,
    entered: Instant,
    records: Vec<StageRecord>,
}

impl Progress {
    fn new() -> Self {
        Self {
            stage: Stage::Idle,
            entered: Instant::now(),
            records: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("stage {} -> {}", self.stage, stage);
        self.stage = stage;
        self.entered = Instant::now();
    }

    fn record(&mut self, ok: bool, detail: impl Into<String>) {
        let detail = detail.into();
        if ok {
            info!("[{}] {}", self.stage, detail);
        } else {
            error!("[{}] {}", self.stage, detail);
        }
        self.records.push(StageRecord {
            stage: self.stage,
            ok,
            detail,
            elapsed: self.entered.elapsed(),
        });
    }
}

/// Runs a candidate fork through build and test against one manifest.
pub struct Harness<B, T> {
    manifest: PathBuf,
    fields: ManifestFields,
    default_branch: String,
    build: B,
    test: T,
}

impl<B: Invoker, T: Invoker> Harness<B, T> {
    pub fn new(
        manifest: impl Into<PathBuf>,
        fields: ManifestFields,
        default_branch: impl Into<String>,
        build: B,
        test: T,
    ) -> Self {
        Self {
            manifest: manifest.into(),
            fields,
            default_branch: default_branch.into(),
            build,
            test,
        }
    }

    pub fn manifest(&self) -> &Path {
        &self.manifest
    }

    /// Validate `candidate`. The manifest is back to its original bytes
    /// afterwards unless the outcome is [`RunOutcome::RestoreFailed`].
    pub async fn run(&self, candidate: &Candidate, cancel: &CancellationToken) -> RunReport {
        info!(
            "Validating {} (branch {}) against {}",
            candidate.source,
            candidate.branch_or(&self.default_branch),
            self.manifest.display()
        );
        let mut progress = Progress::new();

        progress.enter(Stage::Snapshotting);
        let mut backup = match Backup::snapshot(&self.manifest) {
            Ok(backup) => {
                progress.record(true, format!("{} bytes saved", backup.original().len()));
                backup
            }
            Err(e) => {
                progress.record(false, e.to_string());
                return self.finish(progress, candidate, RunOutcome::AbortedBeforeRun, None);
            }
        };

        let outcome = self.mutate_and_check(&mut backup, candidate, cancel, &mut progress).await;

        progress.enter(Stage::Restoring);
        let restore_error = match backup.restore() {
            Ok(()) => {
                progress.record(true, "manifest restored");
                None
            }
            Err(e) => {
                progress.record(false, e.to_string());
                Some(e)
            }
        };

        match restore_error {
            Some(e) => self.finish(progress, candidate, RunOutcome::RestoreFailed, Some(e)),
            None => self.finish(progress, candidate, outcome, None),
        }
    }

    /// Mutating → Building → Testing. Never returns early past the point where
    /// the caller can restore.
    async fn mutate_and_check(
        &self,
        backup: &mut Backup,
        candidate: &Candidate,
        cancel: &CancellationToken,
        progress: &mut Progress,
    ) -> RunOutcome {
        progress.enter(Stage::Mutating);
        let branch = candidate.branch_or(&self.default_branch);
        let mutated = match manifest::substitute(
            backup.original(),
            &self.fields,
            &candidate.source,
            branch,
            &self.default_branch,
        ) {
            Ok(content) => content,
            Err(e) => {
                progress.record(false, e.to_string());
                return RunOutcome::AbortedBeforeRun;
            }
        };

        if cancel.is_cancelled() {
            progress.record(false, "interrupted before the manifest was written");
            return RunOutcome::Interrupted;
        }

        backup.mark_dirty();
        if let Err(e) = manifest::write(&self.manifest, &mutated) {
            progress.record(false, e.to_string());
            return RunOutcome::AbortedBeforeRun;
        }
        match manifest::current_pin(backup.original(), &self.fields) {
            Ok(pin) => progress.record(
                true,
                format!(
                    "{} @ {} -> {} @ {}",
                    pin.source, pin.branch, candidate.source, branch
                ),
            ),
            Err(_) => progress.record(true, format!("-> {} @ {}", candidate.source, branch)),
        }

        progress.enter(Stage::Building);
        if let Some(outcome) = self.run_stage(&self.build, cancel, progress, RunOutcome::BuildFailed).await {
            return outcome;
        }

        progress.enter(Stage::Testing);
        if let Some(outcome) = self.run_stage(&self.test, cancel, progress, RunOutcome::TestFailed).await {
            return outcome;
        }

        RunOutcome::Success
    }

    /// Run one tool stage; `Some` ends the run with that outcome.
    async fn run_stage<I: Invoker>(
        &self,
        invoker: &I,
        cancel: &CancellationToken,
        progress: &mut Progress,
        on_failure: RunOutcome,
    ) -> Option<RunOutcome> {
        if cancel.is_cancelled() {
            progress.record(false, "interrupted before start");
            return Some(RunOutcome::Interrupted);
        }

        match invoker.invoke(cancel).await {
            Ok(StageStatus::Passed) => {
                progress.record(true, StageStatus::Passed.to_string());
                None
            }
            Ok(StageStatus::Cancelled) => {
                progress.record(false, StageStatus::Cancelled.to_string());
                Some(RunOutcome::Interrupted)
            }
            Ok(status) => {
                progress.record(false, status.to_string());
                Some(on_failure)
            }
            Err(e) => {
                progress.record(false, e.to_string());
                Some(on_failure)
            }
        }
    }

    fn finish(
        &self,
        mut progress: Progress,
        candidate: &Candidate,
        outcome: RunOutcome,
        restore_error: Option<RestoreError>,
    ) -> RunReport {
        progress.enter(Stage::Done);
        match outcome {
            RunOutcome::Success => info!("Run finished: {}", outcome),
            RunOutcome::RestoreFailed => error!("Run finished: {}", outcome),
            _ => warn!("Run finished: {}", outcome),
        }
        RunReport {
            outcome,
            manifest: self.manifest.clone(),
            candidate: candidate.clone(),
            stages: progress.records,
            restore_error,
        }
    }
}
