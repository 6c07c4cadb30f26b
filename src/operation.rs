//! # Operations
//!
//! Every change the reconciler can make to an aptly installation is one
//! [`Operation`] value. The set is closed: reconcilers only ever emit these
//! variants, and the [`CommandRunner`](crate::runner::CommandRunner) turns
//! each one into a single `aptly` or `gpg` invocation via [`Operation::args`].
//!
//! Refresh operations (`update-mirror`, `update-publish`) re-sync content
//! without changing the set of entities and are reported as such by
//! [`Operation::is_refresh`].

use std::fmt;

use crate::config::PublishKey;

/// Keyring mirrors are verified against
pub const TRUSTED_KEYRING: &str = "trustedkeys.gpg";

/// External program an operation is executed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Aptly,
    Gpg,
}

impl Tool {
    pub fn default_program(&self) -> &'static str {
        match self {
            Tool::Aptly => "aptly",
            Tool::Gpg => "gpg",
        }
    }
}

/// Where a plain (non-merge) snapshot takes its packages from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotOrigin {
    Mirror(String),
    Repo(String),
}

/// What a new publish exposes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublishTarget {
    Snapshots(Vec<String>),
    Repo(String),
}

/// Options shared by `publish snapshot|repo` and `publish switch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PublishOptions {
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub label: Option<String>,
    pub origin: Option<String>,
    pub gpg_key: Option<String>,
    pub skip_contents: bool,
}

/// A single state-changing invocation of aptly or gpg
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    ImportGpgKey {
        key: String,
        keyserver: String,
        /// Download location used when the keyserver does not have the key
        url: Option<String>,
    },
    CreateMirror {
        name: String,
        archive: String,
        distribution: String,
        components: Vec<String>,
        architectures: Vec<String>,
        sources: bool,
        udeb: bool,
    },
    UpdateMirror {
        name: String,
        max_tries: Option<u32>,
    },
    DropMirror {
        name: String,
    },
    CreateRepo {
        name: String,
        distribution: String,
        component: String,
        architectures: Vec<String>,
        comment: Option<String>,
    },
    CreateSnapshot {
        name: String,
        origin: SnapshotOrigin,
    },
    /// Merge of the given snapshots; a single source makes a clone
    MergeSnapshot {
        name: String,
        sources: Vec<String>,
    },
    FilterSnapshot {
        name: String,
        source: String,
        query: String,
    },
    DeleteSnapshot {
        name: String,
    },
    /// Moves a snapshot aside; publishes keep serving it under the new name
    RenameSnapshot {
        name: String,
        to: String,
    },
    CreatePublish {
        key: PublishKey,
        target: PublishTarget,
        options: PublishOptions,
    },
    SwitchPublish {
        key: PublishKey,
        snapshots: Vec<String>,
        components: Vec<String>,
        skip_contents: bool,
    },
    UpdatePublish {
        key: PublishKey,
        skip_contents: bool,
    },
}

impl Operation {
    /// Stable kebab-case name of the operation kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::ImportGpgKey { .. } => "import-gpg-key",
            Operation::CreateMirror { .. } => "create-mirror",
            Operation::UpdateMirror { .. } => "update-mirror",
            Operation::DropMirror { .. } => "drop-mirror",
            Operation::CreateRepo { .. } => "create-repo",
            Operation::CreateSnapshot { .. } => "create-snapshot",
            Operation::MergeSnapshot { .. } => "merge-snapshot",
            Operation::FilterSnapshot { .. } => "filter-snapshot",
            Operation::DeleteSnapshot { .. } => "delete-snapshot",
            Operation::RenameSnapshot { .. } => "rename-snapshot",
            Operation::CreatePublish { .. } => "create-publish",
            Operation::SwitchPublish { .. } => "switch-publish",
            Operation::UpdatePublish { .. } => "update-publish",
        }
    }

    /// Name of the entity the operation acts on.
    pub fn target(&self) -> String {
        match self {
            Operation::ImportGpgKey { key, .. } => key.clone(),
            Operation::CreateMirror { name, .. }
            | Operation::UpdateMirror { name, .. }
            | Operation::DropMirror { name }
            | Operation::CreateRepo { name, .. }
            | Operation::CreateSnapshot { name, .. }
            | Operation::MergeSnapshot { name, .. }
            | Operation::FilterSnapshot { name, .. }
            | Operation::DeleteSnapshot { name }
            | Operation::RenameSnapshot { name, .. } => name.clone(),
            Operation::CreatePublish { key, .. }
            | Operation::SwitchPublish { key, .. }
            | Operation::UpdatePublish { key, .. } => key.to_string(),
        }
    }

    /// Re-syncs content of an existing entity without adding or removing any.
    pub fn is_refresh(&self) -> bool {
        matches!(
            self,
            Operation::UpdateMirror { .. } | Operation::UpdatePublish { .. }
        )
    }

    pub fn tool(&self) -> Tool {
        match self {
            Operation::ImportGpgKey { .. } => Tool::Gpg,
            _ => Tool::Aptly,
        }
    }

    /// Arguments for the tool, without the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            Operation::ImportGpgKey { key, keyserver, .. } => {
                args.extend(keyring_args());
                args.push("--keyserver".into());
                args.push(keyserver.clone());
                args.push("--recv-keys".into());
                args.push(key.clone());
            }
            Operation::CreateMirror {
                name,
                archive,
                distribution,
                components,
                architectures,
                sources,
                udeb,
            } => {
                args.extend(["mirror".into(), "create".into()]);
                args.push(if *sources {
                    "-with-sources".into()
                } else {
                    "-with-sources=false".into()
                });
                if *udeb {
                    args.push("-with-udebs".into());
                }
                if !architectures.is_empty() {
                    args.push(format!("-architectures={}", architectures.join(",")));
                }
                args.push(name.clone());
                args.push(archive.clone());
                args.push(distribution.clone());
                args.extend(components.iter().cloned());
            }
            Operation::UpdateMirror { name, max_tries } => {
                args.extend(["mirror".into(), "update".into()]);
                if let Some(tries) = max_tries {
                    args.push(format!("-max-tries={}", tries));
                }
                args.push(name.clone());
            }
            Operation::DropMirror { name } => {
                args.extend(["mirror".into(), "drop".into(), "-force".into(), name.clone()]);
            }
            Operation::CreateRepo {
                name,
                distribution,
                component,
                architectures,
                comment,
            } => {
                args.extend(["repo".into(), "create".into()]);
                if !architectures.is_empty() {
                    args.push(format!("-architectures={}", architectures.join(",")));
                }
                if let Some(comment) = comment {
                    args.push(format!("-comment={}", comment));
                }
                args.push(format!("-component={}", component));
                args.push(format!("-distribution={}", distribution));
                args.push(name.clone());
            }
            Operation::CreateSnapshot { name, origin } => {
                args.extend(["snapshot".into(), "create".into(), name.clone(), "from".into()]);
                match origin {
                    SnapshotOrigin::Mirror(mirror) => {
                        args.extend(["mirror".into(), mirror.clone()])
                    }
                    SnapshotOrigin::Repo(repo) => args.extend(["repo".into(), repo.clone()]),
                }
            }
            Operation::MergeSnapshot { name, sources } => {
                args.extend(["snapshot".into(), "merge".into(), name.clone()]);
                args.extend(sources.iter().cloned());
            }
            Operation::FilterSnapshot {
                name,
                source,
                query,
            } => {
                args.extend([
                    "snapshot".into(),
                    "filter".into(),
                    source.clone(),
                    name.clone(),
                    query.clone(),
                ]);
            }
            Operation::DeleteSnapshot { name } => {
                args.extend(["snapshot".into(), "drop".into(), name.clone()]);
            }
            Operation::RenameSnapshot { name, to } => {
                args.extend(["snapshot".into(), "rename".into(), name.clone(), to.clone()]);
            }
            Operation::CreatePublish {
                key,
                target,
                options,
            } => {
                args.push("publish".into());
                args.push(match target {
                    PublishTarget::Snapshots(_) => "snapshot".into(),
                    PublishTarget::Repo(_) => "repo".into(),
                });
                if options.skip_contents {
                    args.push("-skip-contents=true".into());
                }
                if !options.architectures.is_empty() {
                    args.push(format!("-architectures={}", options.architectures.join(",")));
                }
                args.push(format!("-component={}", options.components.join(",")));
                if let Some(label) = &options.label {
                    args.push(format!("-label={}", label));
                }
                if let Some(origin) = &options.origin {
                    args.push(format!("-origin={}", origin));
                }
                args.push(format!("-distribution={}", key.distribution));
                if let Some(gpg_key) = &options.gpg_key {
                    args.push(format!("-gpg-key={}", gpg_key));
                }
                match target {
                    PublishTarget::Snapshots(snapshots) => args.extend(snapshots.iter().cloned()),
                    PublishTarget::Repo(repo) => args.push(repo.clone()),
                }
                args.push(key.prefix.clone());
            }
            Operation::SwitchPublish {
                key,
                snapshots,
                components,
                skip_contents,
            } => {
                args.extend(["publish".into(), "switch".into()]);
                args.push(format!("-component={}", components.join(",")));
                if *skip_contents {
                    args.push("-skip-contents=true".into());
                }
                args.push(key.distribution.clone());
                args.push(key.prefix.clone());
                args.extend(snapshots.iter().cloned());
            }
            Operation::UpdatePublish { key, skip_contents } => {
                args.extend(["publish".into(), "update".into()]);
                if *skip_contents {
                    args.push("-skip-contents=true".into());
                }
                args.push(key.distribution.clone());
                args.push(key.prefix.clone());
            }
        }
        args
    }

    /// Full command line using the default program names.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.tool().default_program().to_string()];
        argv.extend(self.args());
        argv
    }
}

/// `--no-default-keyring --keyring trustedkeys.gpg`
pub fn keyring_args() -> Vec<String> {
    vec![
        "--no-default-keyring".to_string(),
        "--keyring".to_string(),
        TRUSTED_KEYRING.to_string(),
    ]
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(op: &Operation) -> String {
        op.argv().join(" ")
    }

    #[test]
    fn test_import_gpg_key_argv() {
        let op = Operation::ImportGpgKey {
            key: "2841988729C7F3FF".to_string(),
            keyserver: "hkps://keys.openpgp.org".to_string(),
            url: None,
        };
        assert_eq!(op.tool(), Tool::Gpg);
        assert_eq!(
            argv(&op),
            "gpg --no-default-keyring --keyring trustedkeys.gpg --keyserver hkps://keys.openpgp.org --recv-keys 2841988729C7F3FF"
        );
        assert_eq!(op.to_string(), "import-gpg-key(2841988729C7F3FF)");
    }

    #[test]
    fn test_create_mirror_argv() {
        let op = Operation::CreateMirror {
            name: "fakerepo01".to_string(),
            archive: "http://localhost:3123/fakerepo01".to_string(),
            distribution: "main".to_string(),
            components: vec!["main".to_string(), "contrib".to_string()],
            architectures: vec!["amd64".to_string(), "i386".to_string()],
            sources: false,
            udeb: true,
        };
        assert_eq!(
            argv(&op),
            "aptly mirror create -with-sources=false -with-udebs -architectures=amd64,i386 fakerepo01 http://localhost:3123/fakerepo01 main main contrib"
        );
    }

    #[test]
    fn test_update_mirror_argv() {
        let op = Operation::UpdateMirror {
            name: "fakerepo01".to_string(),
            max_tries: Some(3),
        };
        assert_eq!(argv(&op), "aptly mirror update -max-tries=3 fakerepo01");
        assert!(op.is_refresh());
    }

    #[test]
    fn test_create_repo_argv() {
        let op = Operation::CreateRepo {
            name: "local".to_string(),
            distribution: "stable".to_string(),
            component: "main".to_string(),
            architectures: vec![],
            comment: Some("uploads".to_string()),
        };
        assert_eq!(
            argv(&op),
            "aptly repo create -comment=uploads -component=main -distribution=stable local"
        );
    }

    #[test]
    fn test_snapshot_argv() {
        let create = Operation::CreateSnapshot {
            name: "fakerepo01-20121010T0000Z".to_string(),
            origin: SnapshotOrigin::Mirror("fakerepo01".to_string()),
        };
        assert_eq!(
            argv(&create),
            "aptly snapshot create fakerepo01-20121010T0000Z from mirror fakerepo01"
        );

        let merge = Operation::MergeSnapshot {
            name: "superfake-20121010T0000Z".to_string(),
            sources: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(argv(&merge), "aptly snapshot merge superfake-20121010T0000Z a b");

        let filter = Operation::FilterSnapshot {
            name: "filtered".to_string(),
            source: "a".to_string(),
            query: "Priority (required)".to_string(),
        };
        assert_eq!(
            filter.argv(),
            vec!["aptly", "snapshot", "filter", "a", "filtered", "Priority (required)"]
        );

        let delete = Operation::DeleteSnapshot {
            name: "a".to_string(),
        };
        assert_eq!(argv(&delete), "aptly snapshot drop a");

        let rename = Operation::RenameSnapshot {
            name: "fake-current".to_string(),
            to: "fake-current-rotated-20121010T1010Z".to_string(),
        };
        assert_eq!(
            argv(&rename),
            "aptly snapshot rename fake-current fake-current-rotated-20121010T1010Z"
        );
        assert_eq!(rename.to_string(), "rename-snapshot(fake-current)");
        assert!(!rename.is_refresh());
        assert!(!delete.is_refresh());
    }

    #[test]
    fn test_publish_argv() {
        let key = PublishKey::new("fakerepo01", "main");
        let create = Operation::CreatePublish {
            key: key.clone(),
            target: PublishTarget::Snapshots(vec!["fakerepo01-20121010T0000Z".to_string()]),
            options: PublishOptions {
                components: vec!["main".to_string()],
                gpg_key: Some("7FAC5991".to_string()),
                ..Default::default()
            },
        };
        assert_eq!(
            argv(&create),
            "aptly publish snapshot -component=main -distribution=main -gpg-key=7FAC5991 fakerepo01-20121010T0000Z fakerepo01"
        );

        let switch = Operation::SwitchPublish {
            key: key.clone(),
            snapshots: vec!["fakerepo01-20121011T0000Z".to_string()],
            components: vec!["main".to_string()],
            skip_contents: true,
        };
        assert_eq!(
            argv(&switch),
            "aptly publish switch -component=main -skip-contents=true main fakerepo01 fakerepo01-20121011T0000Z"
        );
        assert_eq!(switch.target(), "fakerepo01/main");

        let update = Operation::UpdatePublish {
            key,
            skip_contents: false,
        };
        assert_eq!(argv(&update), "aptly publish update main fakerepo01");
    }
}
