//! Runs a [`Plan`] and records what happened to every operation.
//!
//! - Entities run in plan order. Within an entity, actions run in sequence
//!   and the first failure skips the rest of that entity's actions.
//! - An entity whose dependency failed, was skipped or could not be planned
//!   is skipped entirely. Unrelated entities still run.
//! - Cleanup (retired snapshot deletions) runs after every entity's actions,
//!   only for entities whose actions all completed. A failed deletion does not
//!   stop the remaining ones.
//! - Each completed operation invalidates the live entity it touched in the
//!   [`StateReader`], if one is given.

use std::collections::HashSet;

use log::{error, info, warn};

use super::Plan;
use crate::operation::Operation;
use crate::report::{RunSummary, Status};
use crate::resolver::EntityRef;
use crate::runner::CommandRunner;
use crate::state::{StateReader, Touched};

pub fn execute(plan: &Plan, runner: &dyn CommandRunner, reader: Option<&StateReader>) -> RunSummary {
    let mut summary = RunSummary {
        warnings: plan.warnings().cloned().collect(),
        ..Default::default()
    };
    let mut blocked: HashSet<&EntityRef> = HashSet::new();

    for entity in &plan.entities {
        if let Some(message) = &entity.error {
            summary
                .planning_errors
                .push((entity.entity.clone(), message.clone()));
            blocked.insert(&entity.entity);
            continue;
        }

        if let Some(dependency) = entity.depends_on.iter().find(|d| blocked.contains(d)) {
            warn!("Skipping {}: {} did not complete", entity.entity, dependency);
            let reason = format!("dependency failed: {}", dependency);
            for op in entity.operations() {
                summary.record(&entity.entity, op, Status::Skipped { reason: reason.clone() });
            }
            blocked.insert(&entity.entity);
            continue;
        }

        let mut failed = false;
        for op in &entity.actions {
            if failed {
                summary.record(
                    &entity.entity,
                    op,
                    Status::Skipped {
                        reason: "earlier operation failed".to_string(),
                    },
                );
                continue;
            }
            let status = run_one(op, runner, reader);
            failed = status != Status::Completed;
            summary.record(&entity.entity, op, status);
        }
        if failed {
            for op in &entity.cleanup {
                summary.record(
                    &entity.entity,
                    op,
                    Status::Skipped {
                        reason: "earlier operation failed".to_string(),
                    },
                );
            }
            blocked.insert(&entity.entity);
        }
    }

    for entity in plan.entities.iter().filter(|e| !blocked.contains(&e.entity)) {
        for op in &entity.cleanup {
            let status = run_one(op, runner, reader);
            summary.record(&entity.entity, op, status);
        }
    }

    summary
}

fn run_one(op: &Operation, runner: &dyn CommandRunner, reader: Option<&StateReader>) -> Status {
    info!("Running {}", op);
    match runner.run(op) {
        Ok(output) if output.success => {
            if let Some(reader) = reader {
                if let Err(e) = reader.invalidate(Touched::of(op)) {
                    warn!("Could not invalidate state after {}: {}", op, e);
                }
            }
            Status::Completed
        }
        Ok(output) => {
            let diagnostic = output.diagnostic();
            error!("{} failed: {}", op, diagnostic);
            Status::Failed { diagnostic }
        }
        Err(e) => {
            error!("{} could not be run: {}", op, e);
            Status::Failed {
                diagnostic: e.to_string(),
            }
        }
    }
}
