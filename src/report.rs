//! # Run Reporting
//!
//! Warnings raised while planning and the per-operation outcome of a run.
//! A [`RunSummary`] lists every completed, failed and skipped operation and
//! determines the process exit code.

use std::fmt;

use crate::config::PublishKey;
use crate::error::Error;
use crate::operation::Operation;
use crate::resolver::EntityRef;

/// Something the reconciler chose not to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A retired snapshot was kept because something still references it.
    RetentionGuardSkipped { family: String, snapshot: String },
    /// An existing repo differs from its configuration; repos are never changed in place.
    RepoDrift { repo: String, detail: String },
    /// A publish with `automatic-update = false` points at other snapshots than configured.
    PublishPinned {
        publish: PublishKey,
        current: Vec<String>,
        desired: Vec<String>,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::RetentionGuardSkipped { family, snapshot } => write!(
                f,
                "RetentionGuardSkipped: kept {} of {}, it is still referenced",
                snapshot, family
            ),
            Warning::RepoDrift { repo, detail } => write!(
                f,
                "repo {} differs from configuration ({}), not changed",
                repo, detail
            ),
            Warning::PublishPinned {
                publish,
                current,
                desired,
            } => write!(
                f,
                "publish {} has automatic-update disabled: publishes [{}], configured [{}]",
                publish,
                current.join(", "),
                desired.join(", ")
            ),
        }
    }
}

/// What happened to one planned operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Completed,
    Failed { diagnostic: String },
    Skipped { reason: String },
}

/// One operation and its outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub entity: EntityRef,
    pub operation: Operation,
    pub status: Status,
}

/// Everything that happened during one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: Vec<OperationRecord>,
    /// Entities that could not be planned, with the reason
    pub planning_errors: Vec<(EntityRef, String)>,
    pub warnings: Vec<Warning>,
}

impl RunSummary {
    pub fn record(&mut self, entity: &EntityRef, operation: &Operation, status: Status) {
        self.records.push(OperationRecord {
            entity: entity.clone(),
            operation: operation.clone(),
            status,
        });
    }

    pub fn completed(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records
            .iter()
            .filter(|r| r.status == Status::Completed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.status, Status::Failed { .. }))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.status, Status::Skipped { .. }))
    }

    /// Failed operations as errors carrying entity, kind and diagnostic.
    pub fn errors(&self) -> Vec<Error> {
        self.records
            .iter()
            .filter_map(|r| match &r.status {
                Status::Failed { diagnostic } => Some(Error::OperationFailed {
                    entity: r.entity.to_string(),
                    operation: r.operation.kind().to_string(),
                    diagnostic: diagnostic.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.planning_errors.is_empty() && self.failed().next().is_none()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            match &record.status {
                Status::Completed => writeln!(f, "  done     {}", record.operation)?,
                Status::Failed { diagnostic } => writeln!(
                    f,
                    "  FAILED   {} [{}]: {}",
                    record.operation, record.entity, diagnostic
                )?,
                Status::Skipped { reason } => {
                    writeln!(f, "  skipped  {}: {}", record.operation, reason)?
                }
            }
        }
        for (entity, message) in &self.planning_errors {
            writeln!(f, "  ERROR    {}: {}", entity, message)?;
        }
        for warning in &self.warnings {
            writeln!(f, "  warning  {}", warning)?;
        }
        write!(
            f,
            "{} completed, {} failed, {} skipped, {} planning errors, {} warnings",
            self.completed().count(),
            self.failed().count(),
            self.skipped().count(),
            self.planning_errors.len(),
            self.warnings.len()
        )
    }
}
