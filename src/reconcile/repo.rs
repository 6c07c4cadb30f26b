//! Local repos are created when absent and otherwise left alone; a repo
//! whose defaults differ from the configuration is reported, not recreated,
//! since dropping it would lose its packages.

use super::{Context, Decision};
use crate::config::RepoSpec;
use crate::error::Result;
use crate::operation::Operation;
use crate::report::Warning;

pub fn reconcile(name: &str, spec: &RepoSpec, ctx: &mut Context<'_>) -> Result<Decision> {
    let mut decision = Decision::default();
    match ctx.live.repos.get(name) {
        None => decision.actions.push(Operation::CreateRepo {
            name: name.to_string(),
            distribution: spec.distribution.clone(),
            component: spec.component.clone(),
            architectures: spec.architectures.clone(),
            comment: spec.comment.clone(),
        }),
        Some(live) => {
            let mut differences = Vec::new();
            if live.distribution != spec.distribution {
                differences.push(format!(
                    "distribution {} != {}",
                    live.distribution, spec.distribution
                ));
            }
            if live.component != spec.component {
                differences.push(format!("component {} != {}", live.component, spec.component));
            }
            if !differences.is_empty() {
                decision.warnings.push(Warning::RepoDrift {
                    repo: name.to_string(),
                    detail: differences.join("; "),
                });
            }
        }
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reconcile::Options;
    use crate::state::{LiveState, RepoRecord};

    fn spec() -> RepoSpec {
        RepoSpec {
            distribution: "stable".to_string(),
            component: "main".to_string(),
            architectures: vec![],
            comment: None,
        }
    }

    #[test]
    fn test_absent_repo_is_created() {
        let config = Config::default();
        let live = LiveState::default();
        let mut ctx = Context::new(&config, &live, &Options::default());
        let decision = reconcile("local", &spec(), &mut ctx).unwrap();
        assert_eq!(decision.actions.len(), 1);
        assert_eq!(decision.actions[0].kind(), "create-repo");
    }

    #[test]
    fn test_drifted_repo_is_reported_only() {
        let config = Config::default();
        let mut live = LiveState::default();
        live.repos.insert(
            "local".to_string(),
            RepoRecord {
                name: "local".to_string(),
                distribution: "testing".to_string(),
                component: "main".to_string(),
            },
        );
        let mut ctx = Context::new(&config, &live, &Options::default());
        let decision = reconcile("local", &spec(), &mut ctx).unwrap();
        assert!(decision.actions.is_empty());
        assert_eq!(
            decision.warnings,
            vec![Warning::RepoDrift {
                repo: "local".to_string(),
                detail: "distribution testing != stable".to_string(),
            }]
        );
    }
}
