//! Shared test utilities for integration and E2E tests.
//!
//! Add `mod common;` to a test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_config(configs::NIGHTLY).with_empty_aptly();
//!     fixture.command_with_tools().arg("plan").assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
#[allow(unused_imports)]
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    pub use super::configs;
    pub use super::TestFixture;
}

/// Configuration documents used across tests.
#[allow(dead_code)]
pub mod configs {
    /// A mirror with two signing keys and a nightly snapshot published as `stable`.
    pub const NIGHTLY: &str = r#"
[mirror.repo1]
archive = "http://localhost:3123/repo1"
distribution = "main"
gpg-keys = ["2841988729C7F3FF", "7FAC5991ABCD1234"]

[snapshot."nightly-%T"]
mirror = "repo1"
timestamp = { time = "00:00" }
retention = { keep-count = 3 }

[[publish.stable]]
distribution = "main"
snapshots = [{ name = "nightly-%T", timestamp = "current" }]
"#;

    /// `merged` names a snapshot that is defined nowhere.
    pub const UNDEFINED_SOURCE: &str = r#"
[mirror.a]
archive = "http://localhost:3123/a"
distribution = "main"

[snapshot.A]
mirror = "a"

[snapshot.merged]
merge = ["A", "B"]
"#;

    /// `a` and `b` merge each other.
    pub const CYCLE: &str = r#"
[snapshot.a]
merge = ["b"]

[snapshot.b]
merge = ["a"]
"#;

    /// Pre-TOML configuration without explicit defaults.
    pub const LEGACY_YAML: &str = r#"
mirror:
  repo1:
    archive: http://localhost:3123/repo1
snapshot:
  repo1-snap:
    mirror: repo1
publish:
  repo1:
    - snapshots: [repo1-snap]
"#;
}

/// A temporary directory with a configuration file and stand-in `aptly`/`gpg` programs.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `aptly.toml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.with_file("aptly.toml", content)
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Install `aptly` and `gpg` scripts that succeed and print nothing,
    /// i.e. an installation with no mirrors, snapshots, publishes or keys.
    #[allow(dead_code)]
    pub fn with_empty_aptly(self) -> Self {
        self.with_aptly("exit 0\n")
    }

    /// Install an `aptly` script that fails every call.
    #[allow(dead_code)]
    pub fn with_broken_aptly(self) -> Self {
        self.with_aptly("echo 'ERROR: no aptly database' >&2\nexit 1\n")
    }

    /// Install an `aptly` script that answers `list` queries with nothing and
    /// rejects every change.
    #[allow(dead_code)]
    pub fn with_read_only_aptly(self) -> Self {
        self.with_aptly(
            "case \"$2\" in\n  list) exit 0 ;;\nesac\necho 'ERROR: unable to create: database is locked' >&2\nexit 1\n",
        )
    }

    /// Install an `aptly` script with the given shell body and a `gpg` that
    /// knows no keys.
    #[allow(dead_code)]
    pub fn with_aptly(self, body: &str) -> Self {
        self.with_script("bin/aptly", body)
            .with_script("bin/gpg", "exit 0\n")
    }

    fn with_script(self, path: &str, body: &str) -> Self {
        let child = self.temp_dir.child(path);
        child
            .write_str(&format!("#!/bin/sh\n{}", body))
            .expect("Failed to write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(child.path(), std::fs::Permissions::from_mode(0o755))
                .expect("Failed to make script executable");
        }
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("aptly.toml")
    }

    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// Command running in the fixture directory.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("aptly-reconcile");
        cmd.current_dir(self.path())
            .env_remove("APTLY_RECONCILE_CONFIG")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Command pointed at the fixture's stand-in programs, with colours off.
    ///
    /// Subcommand-specific flags go after the subcommand; `APTLY_BIN` and
    /// `GPG_BIN` are set through the environment so any subcommand picks them up.
    #[allow(dead_code)]
    pub fn command_with_tools(&self) -> assert_cmd::Command {
        let mut cmd = self.command();
        cmd.env("APTLY_BIN", self.path().join("bin/aptly"))
            .env("GPG_BIN", self.path().join("bin/gpg"))
            .env("APTLY_RECONCILE_CONFIG", self.config_path())
            .env("NO_COLOR", "1");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aptly_reconcile::config::{self, Format};

    #[test]
    fn test_fixture_with_config() {
        let fixture = TestFixture::new().with_config(configs::NIGHTLY);
        assert!(fixture.config_path().exists());
    }

    #[test]
    fn test_configs_parse() {
        config::parse(configs::NIGHTLY, Format::Toml)
            .unwrap()
            .validate()
            .unwrap();
        config::parse(configs::UNDEFINED_SOURCE, Format::Toml).unwrap();
        config::parse(configs::CYCLE, Format::Toml).unwrap();
        config::parse(configs::LEGACY_YAML, Format::Yaml).unwrap_err();
    }
}
