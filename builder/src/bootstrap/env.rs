//! Environment sanitization and restoration.
//!
//! Copy-on-write environment scoping, done by hand: snapshot the inherited
//! environment, clear it down to an allow-list so sourced image scripts see
//! a clean base, then restore every snapshot variable the image did not
//! deliberately redefine. The caller's explicit overrides win once image
//! sourcing is done, independent of what the scripts did internally.
//!
//! Values are treated as opaque text throughout; nothing here (nor the
//! shell rendition, which disables globbing for these passes) ever expands
//! a value as a pattern.

use std::collections::{BTreeMap, BTreeSet};

/// Variables that survive sanitization: execution context the container
/// cannot function without.
pub const ENV_ALLOWLIST: &[&str] = &[
    "PWD",
    "HOME",
    "OPTIND",
    "UID",
    "GID",
    "APPTAINER_APPNAME",
    "APPTAINER_SHELL",
];

/// Runtime identity markers: kept and made read-only so image scripts
/// cannot spoof them.
pub const ENV_READONLY: &[&str] = &["APPTAINER_NAME", "APPTAINER_CONTAINER"];

/// Immutable capture of the inherited environment, taken before any
/// mutation.
#[derive(Debug, Clone)]
pub struct EnvSnapshot {
    vars: Vec<(String, String)>,
}

impl EnvSnapshot {
    /// Capture the process environment verbatim.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter().map(|(k, v)| (k, v))
    }
}

/// The mutable environment the sourced scripts operate on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingEnv {
    vars: BTreeMap<String, String>,
    readonly: BTreeSet<String>,
}

impl WorkingEnv {
    /// Set a variable. Returns false (and changes nothing) for read-only
    /// identity markers.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.readonly.contains(&key) {
            return false;
        }
        self.vars.insert(key, value.into());
        true
    }

    /// Unset a variable. Returns false for read-only identity markers.
    pub fn unset(&mut self, key: &str) -> bool {
        if self.readonly.contains(key) {
            return false;
        }
        self.vars.remove(key);
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.as_str())
    }

    pub fn is_readonly(&self, key: &str) -> bool {
        self.readonly.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

/// SANITIZE: clear the snapshot down to the allow-list.
///
/// Allow-listed variables carry over; identity markers carry over and
/// become read-only; everything else is dropped.
pub fn sanitize(snapshot: &EnvSnapshot) -> WorkingEnv {
    let mut env = WorkingEnv::default();
    for (key, value) in snapshot.iter() {
        if ENV_READONLY.contains(&key.as_str()) {
            env.vars.insert(key.clone(), value.clone());
            env.readonly.insert(key.clone());
        } else if ENV_ALLOWLIST.contains(&key.as_str()) {
            env.vars.insert(key.clone(), value.clone());
        }
    }
    env
}

/// RESTORE: merge the snapshot back over the post-sourcing environment.
///
/// A snapshot variable the sourcing left untouched is re-exported with its
/// original value; one redefined to an empty value is unset, capturing the
/// intent to explicitly blank it; one redefined to a non-empty value keeps
/// the sourced value.
///
/// A script that redefines a variable to the value it already had is
/// indistinguishable from one that never touched it; that is intentional.
pub fn restore(snapshot: &EnvSnapshot, sourced: &WorkingEnv) -> BTreeMap<String, String> {
    let mut finalenv = sourced.vars.clone();
    for (key, value) in snapshot.iter() {
        match sourced.get(key) {
            None => {
                finalenv.insert(key.clone(), value.clone());
            }
            Some("") => {
                finalenv.remove(key);
            }
            Some(_) => {}
        }
    }
    finalenv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> EnvSnapshot {
        EnvSnapshot::from_pairs([
            ("PATH", "/usr/bin:/bin"),
            ("HOME", "/home/user"),
            ("X", "1"),
            ("SECRET_TOKEN", "hunter2"),
            ("APPTAINER_NAME", "demo.sif"),
            ("APPTAINER_CONTAINER", "/containers/demo"),
            ("APPTAINER_APPNAME", "tool"),
        ])
    }

    #[test]
    fn test_sanitize_clears_everything_but_allowlist() {
        let env = sanitize(&snapshot());

        assert_eq!(env.get("HOME"), Some("/home/user"));
        assert_eq!(env.get("APPTAINER_APPNAME"), Some("tool"));
        assert_eq!(env.get("PATH"), None);
        assert_eq!(env.get("X"), None);
        assert_eq!(env.get("SECRET_TOKEN"), None);
    }

    #[test]
    fn test_sanitize_makes_identity_markers_readonly() {
        let mut env = sanitize(&snapshot());

        assert_eq!(env.get("APPTAINER_NAME"), Some("demo.sif"));
        assert!(env.is_readonly("APPTAINER_NAME"));
        assert!(env.is_readonly("APPTAINER_CONTAINER"));

        // The image's own scripts cannot spoof runtime identity.
        assert!(!env.set("APPTAINER_NAME", "forged.sif"));
        assert_eq!(env.get("APPTAINER_NAME"), Some("demo.sif"));
        assert!(!env.unset("APPTAINER_CONTAINER"));
        assert_eq!(env.get("APPTAINER_CONTAINER"), Some("/containers/demo"));
    }

    #[test]
    fn test_restore_untouched_variable_comes_back() {
        let snapshot = snapshot();
        let sourced = sanitize(&snapshot);

        let finalenv = restore(&snapshot, &sourced);
        // X=1 was cleared and never redefined by sourcing: restored.
        assert_eq!(finalenv.get("X").map(String::as_str), Some("1"));
        assert_eq!(
            finalenv.get("SECRET_TOKEN").map(String::as_str),
            Some("hunter2")
        );
    }

    #[test]
    fn test_restore_keeps_sourced_override() {
        let snapshot = snapshot();
        let mut sourced = sanitize(&snapshot);
        sourced.set("PATH", "/image/bin");

        let finalenv = restore(&snapshot, &sourced);
        // The caller's PATH does not clobber the image-sourced value.
        assert_eq!(
            finalenv.get("PATH").map(String::as_str),
            Some("/image/bin")
        );
    }

    #[test]
    fn test_restore_unsets_variable_blanked_by_sourcing() {
        let snapshot = snapshot();
        let mut sourced = sanitize(&snapshot);
        // A sourced script re-exported X as empty: user intent is "unset".
        sourced.set("X", "");

        let finalenv = restore(&snapshot, &sourced);
        assert!(!finalenv.contains_key("X"));
    }

    #[test]
    fn test_restore_same_value_is_treated_as_untouched() {
        let snapshot = snapshot();
        let mut sourced = sanitize(&snapshot);
        sourced.set("X", "1");

        let finalenv = restore(&snapshot, &sourced);
        assert_eq!(finalenv.get("X").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_restore_preserves_new_image_variables() {
        let snapshot = snapshot();
        let mut sourced = sanitize(&snapshot);
        sourced.set("IMAGE_ONLY", "value");

        let finalenv = restore(&snapshot, &sourced);
        assert_eq!(
            finalenv.get("IMAGE_ONLY").map(String::as_str),
            Some("value")
        );
    }

    #[test]
    fn test_glob_metacharacters_stay_opaque() {
        let snapshot = EnvSnapshot::from_pairs([("PATTERN", "*.rs"), ("HOME", "/h")]);
        let sourced = sanitize(&snapshot);
        let finalenv = restore(&snapshot, &sourced);
        assert_eq!(finalenv.get("PATTERN").map(String::as_str), Some("*.rs"));
    }
}
