//! Flag precedence
//!
//! A control plane remembers the flags it was configured with. On upgrade
//! those recorded values become the defaults, so the precedence for each
//! flag is: set on this invocation > recorded at the previous install or
//! upgrade > compiled-in default.

use clap::parser::ValueSource;
use clap::{ArgMatches, Command};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::model::InstallFlag;

/// Flags that are meaningful for one invocation only and never recorded
pub const NON_RECORDABLE: &[&str] = &["ignore-cluster", "control-plane-version"];

/// Where a flag's current value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOrigin {
    /// Compiled-in default
    Default,
    /// Restored from the install record
    RecordedOverride,
    /// Set on the command line or through the environment
    ExplicitOverride,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagValue {
    pub value: String,
    pub origin: FlagOrigin,
}

impl FlagValue {
    /// Whether the value differs in origin from the compiled-in default
    pub fn is_changed(&self) -> bool {
        self.origin != FlagOrigin::Default
    }
}

/// Current values of every known flag, keyed by long name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    flags: BTreeMap<String, FlagValue>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        origin: FlagOrigin,
    ) {
        self.flags.insert(
            name.into(),
            FlagValue {
                value: value.into(),
                origin,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(|f| f.value.as_str())
    }

    pub fn origin(&self, name: &str) -> Option<FlagOrigin> {
        self.flags.get(name).map(|f| f.origin)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlagValue)> {
        self.flags.iter().map(|(name, flag)| (name.as_str(), flag))
    }

    /// Capture every long flag of `command` from parsed `matches`.
    ///
    /// Flags given on the command line or through the environment are
    /// explicit. Flags without a value are recorded as an empty default so
    /// the set always covers the full schema.
    pub fn from_matches(command: &Command, matches: &ArgMatches) -> Self {
        let mut set = Self::new();

        for arg in command.get_arguments() {
            let Some(long) = arg.get_long() else { continue };
            let id = arg.get_id().as_str();
            if matches!(id, "help" | "version") {
                continue;
            }

            let value = matches
                .try_get_raw(id)
                .ok()
                .flatten()
                .map(|raw| {
                    raw.map(|v| v.to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();

            let origin = match matches.value_source(id) {
                Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable) => {
                    FlagOrigin::ExplicitOverride
                }
                _ => FlagOrigin::Default,
            };

            set.insert(long, value, origin);
        }

        set
    }

    /// Apply recorded flags beneath explicit ones.
    ///
    /// Each recorded flag that is known and still at its default takes the
    /// recorded value. Returns the names of recorded flags that are not in
    /// this set.
    pub fn apply_recorded(&mut self, recorded: &[InstallFlag]) -> Vec<String> {
        let mut unknown = Vec::new();

        for flag in recorded {
            match self.flags.get_mut(&flag.name) {
                Some(current) if !current.is_changed() => {
                    debug!(flag = %flag.name, value = %flag.value, "Restoring recorded flag");
                    current.value = flag.value.clone();
                    current.origin = FlagOrigin::RecordedOverride;
                }
                Some(_) => {
                    debug!(flag = %flag.name, "Keeping explicitly set flag over recorded value");
                }
                None => unknown.push(flag.name.clone()),
            }
        }

        unknown
    }

    /// Flags to persist in the install record, in name order.
    pub fn recorded(&self) -> Vec<InstallFlag> {
        self.flags
            .iter()
            .filter(|(name, flag)| flag.is_changed() && !NON_RECORDABLE.contains(&name.as_str()))
            .map(|(name, flag)| InstallFlag::new(name.clone(), flag.value.clone()))
            .collect()
    }

    /// Command-line arguments reproducing every changed flag.
    pub fn to_args(&self) -> Vec<String> {
        self.flags
            .iter()
            .filter(|(_, flag)| flag.is_changed())
            .map(|(name, flag)| format!("--{}={}", name, flag.value))
            .collect()
    }
}

/// Merge recorded flags into the current flag set.
///
/// Recorded flags that the current schema no longer knows are dropped
/// with a warning.
pub fn reconcile_flags(recorded: &[InstallFlag], mut current: FlagSet) -> FlagSet {
    for name in current.apply_recorded(recorded) {
        warn!(flag = %name, "Ignoring recorded flag that is no longer supported");
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::recordable_command;

    fn current(entries: &[(&str, &str, FlagOrigin)]) -> FlagSet {
        let mut set = FlagSet::new();
        for (name, value, origin) in entries {
            set.insert(*name, *value, *origin);
        }
        set
    }

    #[test]
    fn test_recorded_overrides_default() {
        let set = current(&[("replicas", "1", FlagOrigin::Default)]);
        let merged = reconcile_flags(&[InstallFlag::new("replicas", "3")], set);

        let flag = merged.get("replicas").unwrap();
        assert_eq!(flag.value, "3");
        assert_eq!(flag.origin, FlagOrigin::RecordedOverride);
        assert!(flag.is_changed());
    }

    #[test]
    fn test_explicit_beats_recorded() {
        let set = current(&[("replicas", "5", FlagOrigin::ExplicitOverride)]);
        let merged = reconcile_flags(&[InstallFlag::new("replicas", "3")], set);

        let flag = merged.get("replicas").unwrap();
        assert_eq!(flag.value, "5");
        assert_eq!(flag.origin, FlagOrigin::ExplicitOverride);
    }

    #[test]
    fn test_unknown_recorded_flags_are_dropped() {
        let mut set = current(&[("ha", "false", FlagOrigin::Default)]);
        let unknown = set.apply_recorded(&[
            InstallFlag::new("removed-flag", "x"),
            InstallFlag::new("ha", "true"),
        ]);

        assert_eq!(unknown, vec!["removed-flag".to_string()]);
        assert!(set.get("removed-flag").is_none());
        assert_eq!(set.value("ha"), Some("true"));
    }

    #[test]
    fn test_order_independent() {
        let base = current(&[
            ("a", "1", FlagOrigin::Default),
            ("b", "2", FlagOrigin::ExplicitOverride),
            ("c", "3", FlagOrigin::Default),
        ]);
        let recorded = vec![
            InstallFlag::new("a", "10"),
            InstallFlag::new("b", "20"),
            InstallFlag::new("c", "30"),
        ];
        let mut reversed = recorded.clone();
        reversed.reverse();

        assert_eq!(
            reconcile_flags(&recorded, base.clone()),
            reconcile_flags(&reversed, base)
        );
    }

    #[test]
    fn test_recorded_excludes_defaults_and_non_recordable() {
        let set = current(&[
            ("ha", "true", FlagOrigin::RecordedOverride),
            ("controller-replicas", "1", FlagOrigin::Default),
            ("control-plane-version", "9.9.9", FlagOrigin::ExplicitOverride),
            ("admin-port", "9000", FlagOrigin::ExplicitOverride),
        ]);

        assert_eq!(
            set.recorded(),
            vec![
                InstallFlag::new("admin-port", "9000"),
                InstallFlag::new("ha", "true"),
            ]
        );
    }

    #[test]
    fn test_to_args_reproduces_changed_flags() {
        let set = current(&[
            ("ha", "true", FlagOrigin::RecordedOverride),
            ("registry", "ghcr.io/meshplane", FlagOrigin::Default),
            ("proxy-log-level", "debug", FlagOrigin::ExplicitOverride),
        ]);

        assert_eq!(
            set.to_args(),
            vec!["--ha=true".to_string(), "--proxy-log-level=debug".to_string()]
        );
    }

    #[test]
    fn test_from_matches_tracks_origin() {
        let command = recordable_command();
        let matches = command
            .clone()
            .try_get_matches_from(["--controller-replicas", "2", "--ha"])
            .unwrap();
        let set = FlagSet::from_matches(&command, &matches);

        assert_eq!(set.value("controller-replicas"), Some("2"));
        assert_eq!(
            set.origin("controller-replicas"),
            Some(FlagOrigin::ExplicitOverride)
        );
        assert_eq!(set.value("ha"), Some("true"));
        assert_eq!(set.origin("ha"), Some(FlagOrigin::ExplicitOverride));
        assert_eq!(set.value("proxy-uid"), Some("2102"));
        assert_eq!(set.origin("proxy-uid"), Some(FlagOrigin::Default));
        assert_eq!(set.origin("skip-inbound-ports"), Some(FlagOrigin::Default));
    }
}
