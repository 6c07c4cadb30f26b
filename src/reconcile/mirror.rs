//! Mirror reconciliation: import missing signing keys, create absent mirrors,
//! recreate drifted ones and refresh the rest.

use log::{debug, info};

use super::{Context, Decision};
use crate::config::MirrorSpec;
use crate::error::Result;
use crate::operation::Operation;
use crate::state::MirrorRecord;

/// Differences between a live mirror and its configuration, empty if none.
pub fn drift(spec: &MirrorSpec, live: &MirrorRecord) -> Vec<String> {
    let mut differences = Vec::new();
    if spec.archive.trim_end_matches('/') != live.archive.trim_end_matches('/') {
        differences.push(format!("archive {} != {}", live.archive, spec.archive));
    }
    if spec.distribution != live.distribution {
        differences.push(format!(
            "distribution {} != {}",
            live.distribution, spec.distribution
        ));
    }
    if sorted(&spec.components) != sorted(&live.components) {
        differences.push(format!(
            "components {} != {}",
            live.components.join(","),
            spec.components.join(",")
        ));
    }
    // aptly fills in its default architectures when none are configured
    if !spec.architectures.is_empty() && sorted(&spec.architectures) != sorted(&live.architectures)
    {
        differences.push(format!(
            "architectures {} != {}",
            live.architectures.join(","),
            spec.architectures.join(",")
        ));
    }
    differences
}

fn sorted(items: &[String]) -> Vec<&str> {
    let mut items: Vec<&str> = items.iter().map(String::as_str).collect();
    items.sort_unstable();
    items
}

pub fn reconcile(name: &str, spec: &MirrorSpec, ctx: &mut Context<'_>) -> Result<Decision> {
    let mut decision = Decision::default();

    let recreate = match ctx.live.mirrors.get(name) {
        None => true,
        Some(live) => {
            let differences = drift(spec, live);
            if differences.is_empty() {
                false
            } else {
                info!("Mirror {} drifted: {}", name, differences.join("; "));
                decision.actions.push(Operation::DropMirror {
                    name: name.to_string(),
                });
                true
            }
        }
    };

    for (index, key) in spec.gpg_keys.iter().enumerate() {
        if ctx.live.has_gpg_key(key) {
            continue;
        }
        if !ctx.claim_import(key) {
            debug!("Key {} already imported for another mirror", key);
            continue;
        }
        decision.actions.push(Operation::ImportGpgKey {
            key: key.clone(),
            keyserver: spec.keyserver().to_string(),
            url: spec.gpg_url(index).map(str::to_string),
        });
    }

    if recreate {
        decision.actions.push(Operation::CreateMirror {
            name: name.to_string(),
            archive: spec.archive.clone(),
            distribution: spec.distribution.clone(),
            components: spec.components.clone(),
            architectures: spec.architectures.clone(),
            sources: spec.sources,
            udeb: spec.udeb,
        });
    }

    if recreate || ctx.refresh {
        decision.actions.push(Operation::UpdateMirror {
            name: name.to_string(),
            max_tries: spec.max_tries,
        });
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DEFAULT_KEYSERVER};
    use crate::reconcile::Options;
    use crate::state::LiveState;

    fn spec() -> MirrorSpec {
        MirrorSpec {
            archive: "http://localhost:3123/fakerepo01".to_string(),
            distribution: "main".to_string(),
            components: vec!["main".to_string()],
            architectures: vec![],
            gpg_keys: vec!["2841988729C7F3FF".to_string()],
            gpg_urls: vec![],
            keyserver: None,
            sources: false,
            udeb: false,
            max_tries: None,
        }
    }

    fn record() -> MirrorRecord {
        MirrorRecord {
            name: "fakerepo01".to_string(),
            archive: "http://localhost:3123/fakerepo01/".to_string(),
            distribution: "main".to_string(),
            components: vec!["main".to_string()],
            architectures: vec!["amd64".to_string()],
        }
    }

    fn kinds(decision: &Decision) -> Vec<&'static str> {
        decision.actions.iter().map(Operation::kind).collect()
    }

    fn run(live: &LiveState, refresh: bool) -> Decision {
        let config = Config::default();
        let mut ctx = Context::new(
            &config,
            live,
            &Options {
                now: chrono::Utc::now(),
                refresh,
            },
        );
        reconcile("fakerepo01", &spec(), &mut ctx).unwrap()
    }

    #[test]
    fn test_absent_mirror_is_created_after_key_import() {
        let decision = run(&LiveState::default(), false);
        assert_eq!(
            kinds(&decision),
            vec!["import-gpg-key", "create-mirror", "update-mirror"]
        );
        match &decision.actions[0] {
            Operation::ImportGpgKey { keyserver, .. } => assert_eq!(keyserver, DEFAULT_KEYSERVER),
            other => panic!("Expected key import, got {:?}", other),
        }
    }

    #[test]
    fn test_matching_mirror_only_refreshes() {
        let mut live = LiveState::default();
        live.mirrors.insert("fakerepo01".to_string(), record());
        live.gpg_keys.insert("2841988729C7F3FF".to_string());

        assert_eq!(kinds(&run(&live, true)), vec!["update-mirror"]);
        assert!(run(&live, false).actions.is_empty());
    }

    #[test]
    fn test_drifted_mirror_is_dropped_and_recreated() {
        let mut live = LiveState::default();
        let mut drifted = record();
        drifted.distribution = "stable".to_string();
        live.mirrors.insert("fakerepo01".to_string(), drifted);
        live.gpg_keys.insert("2841988729C7F3FF".to_string());

        assert_eq!(
            kinds(&run(&live, false)),
            vec!["drop-mirror", "create-mirror", "update-mirror"]
        );
    }

    #[test]
    fn test_drift_ignores_trailing_slash_and_component_order() {
        let mut spec = spec();
        spec.components = vec!["contrib".to_string(), "main".to_string()];
        let mut live = record();
        live.components = vec!["main".to_string(), "contrib".to_string()];
        assert!(drift(&spec, &live).is_empty());

        spec.architectures = vec!["i386".to_string()];
        assert_eq!(drift(&spec, &live).len(), 1);
    }

    #[test]
    fn test_shared_key_is_imported_once() {
        let config = Config::default();
        let live = LiveState::default();
        let mut ctx = Context::new(&config, &live, &Options::default());
        let first = reconcile("a", &spec(), &mut ctx).unwrap();
        let second = reconcile("b", &spec(), &mut ctx).unwrap();
        assert_eq!(kinds(&first)[0], "import-gpg-key");
        assert!(!kinds(&second).contains(&"import-gpg-key"));
    }
}
