//! # Snapshot Rotation and Retention
//!
//! A timestamped snapshot template such as `nightly-%T` defines a *family*:
//! every live snapshot whose name is the template with `%T` replaced by a
//! `YYYYMMDDTHHMMZ` timestamp. [`plan_rotation`] decides, for one family at
//! one point in time:
//!
//! - whether a new instance is due, and its name;
//! - which existing instances the retention policy retires;
//! - which of those must be kept anyway because something still uses them.
//!
//! ## Rules
//!
//! - Rotation is due when no instance exists at or after the start of the
//!   current schedule window. When it is not due, nothing is created and
//!   nothing is deleted.
//! - An instance is kept if it is among the `keep_count` most recent existing
//!   instances **or** newer than `max_age`. It is deleted only if it fails
//!   every configured rule. With no rule configured everything is kept.
//! - A retired instance the [`RetentionGuard`] holds on to is withheld from
//!   deletion and reported; it stays as [`InstanceState::ActiveOrphaned`].
//!
//! [`retire`] applies the same policy without a schedule; it is used for the
//! instances a rotating plain-named snapshot moves aside.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::timestamp::{NameTemplate, Schedule};

/// Which instances of a family to keep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep this many of the most recent instances
    pub keep_count: Option<usize>,
    /// Keep instances younger than this
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.keep_count.is_none() && self.max_age.is_none()
    }
}

/// One live member of a family
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instance {
    pub timestamp: DateTime<Utc>,
    pub name: String,
}

/// Live instances of one template, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    pub template: NameTemplate,
    pub instances: Vec<Instance>,
}

impl Family {
    /// Collect the members of `template` from a list of snapshot names.
    pub fn collect<'a>(template: &NameTemplate, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut instances: Vec<Instance> = names
            .into_iter()
            .filter_map(|name| {
                template.instance_timestamp(name).map(|timestamp| Instance {
                    timestamp,
                    name: name.to_string(),
                })
            })
            .collect();
        instances.sort();
        Self {
            template: template.clone(),
            instances,
        }
    }

    pub fn latest(&self) -> Option<&Instance> {
        self.instances.last()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Decides whether a retired instance must be kept
pub trait RetentionGuard {
    /// `deleting` is the set of names still scheduled for deletion.
    fn holds(&self, candidate: &str, deleting: &BTreeSet<String>) -> bool;
}

impl<F> RetentionGuard for F
where
    F: Fn(&str) -> bool,
{
    fn holds(&self, candidate: &str, _deleting: &BTreeSet<String>) -> bool {
        self(candidate)
    }
}

/// Lifecycle state of an instance within a rotation plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// The new instance this pass will create
    Planned,
    /// Exists and was created in the current window
    Created,
    /// Exists and is kept
    Active,
    /// Retired by the policy and scheduled for deletion
    Retired,
    /// Retired by the policy but still referenced, so kept
    ActiveOrphaned,
}

/// Outcome of [`plan_rotation`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationPlan {
    /// Name of the instance to create; `None` when no rotation is due
    pub next_name: Option<String>,
    /// Instances to delete, oldest first
    pub to_delete: Vec<String>,
    /// Retired instances kept because they are still referenced
    pub withheld: Vec<String>,
    /// Name of the instance for the current window
    pub current_name: String,
}

impl RotationPlan {
    pub fn is_due(&self) -> bool {
        self.next_name.is_some()
    }

    /// State of a named instance under this plan, `None` if it is not part of it.
    pub fn state_of(&self, family: &Family, name: &str) -> Option<InstanceState> {
        if self.next_name.as_deref() == Some(name) {
            return Some(InstanceState::Planned);
        }
        if !family.instances.iter().any(|i| i.name == name) {
            return None;
        }
        if self.to_delete.iter().any(|n| n == name) {
            Some(InstanceState::Retired)
        } else if self.withheld.iter().any(|n| n == name) {
            Some(InstanceState::ActiveOrphaned)
        } else if name == self.current_name {
            Some(InstanceState::Created)
        } else {
            Some(InstanceState::Active)
        }
    }
}

/// Plan the next rotation of a family.
pub fn plan_rotation(
    family: &Family,
    policy: &RetentionPolicy,
    schedule: &Schedule,
    now: DateTime<Utc>,
    guard: &dyn RetentionGuard,
) -> RotationPlan {
    let window = schedule.round(now);
    let current_name = family.template.expand(window);
    let due = family
        .latest()
        .map_or(true, |latest| latest.timestamp < window);

    if !due {
        debug!("{}: no rotation needed, current instance {}", family.template, current_name);
        return RotationPlan {
            current_name,
            ..Default::default()
        };
    }

    let Retirement { to_delete, withheld } = retire(family, policy, now, guard);
    let plan = RotationPlan {
        next_name: Some(current_name.clone()),
        to_delete,
        withheld,
        current_name,
    };
    debug!(
        "{}: rotate to {:?}, delete {:?}, withheld {:?}",
        family.template, plan.next_name, plan.to_delete, plan.withheld
    );
    plan
}

/// Instances the policy retires, split by whether the guard lets them go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retirement {
    /// Oldest first
    pub to_delete: Vec<String>,
    pub withheld: Vec<String>,
}

/// Apply `policy` to every instance of `family`, regardless of schedule.
pub fn retire(
    family: &Family,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    guard: &dyn RetentionGuard,
) -> Retirement {
    let count = family.instances.len();
    let retired: Vec<&Instance> = family
        .instances
        .iter()
        .enumerate()
        .filter(|(position, instance)| {
            if policy.is_unbounded() {
                return false;
            }
            let within_count = policy
                .keep_count
                .is_some_and(|keep| count - position <= keep);
            let within_age = policy.max_age.is_some_and(|max_age| {
                // An age reaching past the earliest representable date keeps everything
                now.checked_sub_signed(max_age)
                    .map_or(true, |cutoff| instance.timestamp > cutoff)
            });
            !(within_count || within_age)
        })
        .map(|(_, instance)| instance)
        .collect();

    let mut deleting: BTreeSet<String> = retired.iter().map(|i| i.name.clone()).collect();
    let mut withheld = BTreeSet::new();
    // Keeping one instance can make another one referenced again.
    loop {
        let held: Vec<String> = deleting
            .iter()
            .filter(|name| guard.holds(name, &deleting))
            .cloned()
            .collect();
        if held.is_empty() {
            break;
        }
        for name in held {
            deleting.remove(&name);
            withheld.insert(name);
        }
    }

    Retirement {
        to_delete: retired
            .iter()
            .filter(|i| deleting.contains(&i.name))
            .map(|i| i.name.clone())
            .collect(),
        withheld: retired
            .iter()
            .filter(|i| withheld.contains(&i.name))
            .map(|i| i.name.clone())
            .collect(),
    }
}
