//! Environment variables visible to scripts.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum template expansion passes before giving up on nested references.
pub const MAX_RESOLVE_DEPTH: usize = 10;

static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<([^<>]+)>>").expect("static regex is valid"));

/// A single environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub key: String,
    /// Current value.
    pub value: String,
    /// Whether the value is a secret. Secrets are readable by scripts but
    /// never echoed into logs.
    #[serde(default)]
    pub secret: bool,
}

impl EnvVar {
    /// A non-secret variable.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            secret: false,
        }
    }
}

/// Which environment an accessor targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Selected first, then global.
    #[default]
    Any,
    /// Only the selected environment.
    Selected,
    /// Only the global environment.
    Global,
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "any" => Ok(Scope::Any),
            "selected" | "active" => Ok(Scope::Selected),
            "global" => Ok(Scope::Global),
            other => Err(format!("unknown environment scope '{other}'")),
        }
    }
}

/// The global and selected environments for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    /// Workspace-wide variables.
    #[serde(default)]
    pub global: Vec<EnvVar>,
    /// Variables of the environment the user selected.
    #[serde(default)]
    pub selected: Vec<EnvVar>,
}

fn find<'a>(vars: &'a [EnvVar], key: &str) -> Option<&'a EnvVar> {
    vars.iter().find(|v| v.key == key)
}

impl EnvironmentState {
    /// Build from the two variable lists.
    pub fn new(global: Vec<EnvVar>, selected: Vec<EnvVar>) -> Self {
        Self { global, selected }
    }

    /// Look up `key` in `scope`. The selected environment shadows global.
    pub fn get(&self, key: &str, scope: Scope) -> Option<&str> {
        let var = match scope {
            Scope::Any => find(&self.selected, key).or_else(|| find(&self.global, key)),
            Scope::Selected => find(&self.selected, key),
            Scope::Global => find(&self.global, key),
        };
        var.map(|v| v.value.as_str())
    }

    /// Set `key`. Without an explicit scope an existing variable is updated
    /// where it lives (selected first); a new one goes to the selected
    /// environment.
    pub fn set(&mut self, key: &str, value: &str, scope: Scope) {
        let target = match scope {
            Scope::Selected => &mut self.selected,
            Scope::Global => &mut self.global,
            Scope::Any => {
                if find(&self.selected, key).is_some() || find(&self.global, key).is_none() {
                    &mut self.selected
                } else {
                    &mut self.global
                }
            }
        };
        match target.iter_mut().find(|v| v.key == key) {
            Some(var) => var.value = value.to_string(),
            None => target.push(EnvVar::new(key, value)),
        }
    }

    /// Remove `key`, from the selected environment first. Returns whether
    /// anything was removed.
    pub fn unset(&mut self, key: &str, scope: Scope) -> bool {
        fn remove(vars: &mut Vec<EnvVar>, key: &str) -> bool {
            let before = vars.len();
            vars.retain(|v| v.key != key);
            vars.len() != before
        }
        match scope {
            Scope::Selected => remove(&mut self.selected, key),
            Scope::Global => remove(&mut self.global, key),
            Scope::Any => remove(&mut self.selected, key) || remove(&mut self.global, key),
        }
    }

    /// Expand `<<name>>` references. Expanded values may themselves contain
    /// references, up to [`MAX_RESOLVE_DEPTH`] passes. Unknown names are
    /// left in place.
    pub fn resolve(&self, template: &str) -> String {
        let mut current = template.to_string();
        for _ in 0..MAX_RESOLVE_DEPTH {
            let next = TEMPLATE_RE
                .replace_all(&current, |caps: &regex::Captures| {
                    let name = &caps[1];
                    self.get(name, Scope::Any)
                        .map(str::to_string)
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> EnvironmentState {
        EnvironmentState::new(
            vec![EnvVar::new("host", "global.test"), EnvVar::new("g", "1")],
            vec![EnvVar::new("host", "selected.test")],
        )
    }

    #[test]
    fn selected_shadows_global() {
        let env = state();
        assert_eq!(env.get("host", Scope::Any), Some("selected.test"));
        assert_eq!(env.get("host", Scope::Global), Some("global.test"));
        assert_eq!(env.get("g", Scope::Any), Some("1"));
        assert_eq!(env.get("missing", Scope::Any), None);
    }

    #[test]
    fn set_updates_in_place_or_appends_to_selected() {
        let mut env = state();
        env.set("g", "2", Scope::Any);
        assert_eq!(env.global[1].value, "2");
        env.set("fresh", "x", Scope::Any);
        assert_eq!(env.selected.last().unwrap(), &EnvVar::new("fresh", "x"));
        env.set("host", "other", Scope::Global);
        assert_eq!(env.get("host", Scope::Global), Some("other"));
        assert_eq!(env.get("host", Scope::Any), Some("selected.test"));
    }

    #[test]
    fn unset_prefers_selected() {
        let mut env = state();
        assert!(env.unset("host", Scope::Any));
        assert_eq!(env.get("host", Scope::Any), Some("global.test"));
        assert!(!env.unset("missing", Scope::Any));
    }

    #[test]
    fn resolve_expands_nested_references() {
        let mut env = state();
        env.set("url", "https://<<host>>/v1", Scope::Any);
        assert_eq!(
            env.resolve("<<url>>/users?<<unknown>>"),
            "https://selected.test/v1/users?<<unknown>>"
        );
    }

    #[test]
    fn resolve_stops_on_self_reference() {
        let mut env = EnvironmentState::default();
        env.set("loop", "<<loop>>", Scope::Any);
        assert_eq!(env.resolve("<<loop>>"), "<<loop>>");
    }
}
