//! # aptly-reconcile
//!
//! Declarative management of an [aptly](https://www.aptly.info/)
//! installation. A configuration document describes the mirrors, local
//! repos, snapshot families and publishes that should exist; this library
//! compares it with what aptly reports and computes the operations that close
//! the gap, then runs them.
//!
//! ## Quick Example
//!
//! ```
//! # #[cfg(feature = "integration-tests")]
//! # fn main() {
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use aptly_reconcile::config::{self, Format};
//! use aptly_reconcile::fake::FakeAptly;
//! use aptly_reconcile::reconcile::{self, Options};
//! use aptly_reconcile::state::StateReader;
//!
//! let config = config::parse(r#"
//! [mirror.debian]
//! archive = "http://deb.debian.org/debian"
//! distribution = "bookworm"
//!
//! [snapshot."debian-%T"]
//! mirror = "debian"
//! timestamp = { time = "00:00" }
//! "#, Format::Toml).unwrap();
//!
//! let aptly = Arc::new(FakeAptly::new());
//! let reader = StateReader::new(aptly.clone());
//! let options = Options {
//!     now: Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
//!     refresh: false,
//! };
//!
//! let plan = reconcile::plan(&config, &reader.live().unwrap(), &options).unwrap();
//! let summary = reconcile::execute::execute(&plan, aptly.as_ref(), Some(&reader));
//! assert!(summary.is_success());
//! assert!(aptly.live().snapshots.contains_key("debian-20240102T0000Z"));
//!
//! // A second pass has nothing left to change
//! let again = reconcile::plan(&config, &reader.live().unwrap(), &options).unwrap();
//! assert!(again.converged());
//! # }
//! # #[cfg(not(feature = "integration-tests"))]
//! # fn main() {}
//! ```
//!
//! ## Core Concepts
//!
//! - **Configuration (`config`)**: the desired-state document and its static
//!   validation.
//! - **Live state (`state`)**: strict parsers for aptly/gpg output and a
//!   per-run cached [`state::StateReader`].
//! - **Dependency resolution (`resolver`)**: deterministic reconcile order
//!   and cycle detection.
//! - **Rotation (`timestamp`, `retention`)**: timestamped snapshot names,
//!   schedule windows and retention with a reference guard.
//! - **Reconciliation (`reconcile`)**: one reconciler per entity kind, the
//!   plan and the executor.
//! - **Operations and runners (`operation`, `runner`, `fake`)**: the closed
//!   set of state-changing commands and the ways to run them. The in-memory
//!   `fake` aptly is only built for tests and with the `integration-tests`
//!   feature.
//!
//! ## Execution Flow
//!
//! 1.  **Validate**: every referenced name must be defined.
//! 2.  **Read**: one round of `list`/`show` queries builds the live state.
//! 3.  **Order**: entities are sorted so dependencies come first.
//! 4.  **Plan**: each entity's reconciler emits its operations.
//! 5.  **Execute**: operations run in order; failures skip dependents only.
//! 6.  **Clean up**: retired snapshots are deleted once publishes have moved.

pub mod config;
pub mod error;
#[cfg(any(test, feature = "integration-tests"))]
pub mod fake;
pub mod operation;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod resolver;
pub mod retention;
pub mod runner;
pub mod state;
pub mod timestamp;
