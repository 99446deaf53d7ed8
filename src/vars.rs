// src/vars.rs

//! Variable mapping with lazy `{{ key }}` interpolation.
//!
//! Values are stored raw and resolved on demand, so a later layer that
//! overrides `deploy_to` also changes every value built from it (e.g.
//! `shared_path`). Resolution tracks the chain of keys being expanded and
//! fails with `CyclicVariableReference` instead of recursing forever.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{DeployError, Result};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Path layout every stage gets unless a layer overrides it.
pub const BUILTIN_DEFAULTS: [(&str, &str); 5] = [
    ("deploy_to", "/var/apps/{{ application }}/{{ stage }}"),
    ("shared_path", "{{ deploy_to }}/shared"),
    ("releases_path", "{{ deploy_to }}/releases"),
    ("release_path", "{{ releases_path }}/{{ release }}"),
    ("current_path", "{{ deploy_to }}/current"),
];

/// Key → raw value mapping. Later inserts override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMap {
    entries: BTreeMap<String, String>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in layer: run identity plus the default path layout.
    pub fn with_builtins(application: &str, stage: &str, release: &str, keep_releases: u32) -> Self {
        let mut vars = Self::new();
        vars.insert("application", application);
        vars.insert("stage", stage);
        vars.insert("release", release);
        vars.insert("keep_releases", keep_releases.to_string());
        for (key, value) in BUILTIN_DEFAULTS {
            vars.insert(key, value);
        }
        vars
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Apply a whole layer on top of the current entries.
    pub fn layer<'a>(&mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) {
        for (key, value) in vars {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Unresolved value of `key`.
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fully resolved value of `key`.
    pub fn resolve(&self, key: &str) -> Result<String> {
        let template = format!("{{{{ {key} }}}}");
        self.resolve_inner(key, &template, &mut Vec::new())
    }

    /// Substitute every placeholder in `template`.
    pub fn interpolate(&self, template: &str) -> Result<String> {
        self.expand(template, &mut Vec::new())
    }

    /// Resolve every key. Used at load time to surface cycles early.
    pub fn resolve_all(&self) -> Result<BTreeMap<String, String>> {
        self.entries
            .keys()
            .map(|key| Ok((key.clone(), self.resolve(key)?)))
            .collect()
    }

    fn expand(&self, template: &str, stack: &mut Vec<String>) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            out.push_str(&self.resolve_inner(name.as_str(), template, stack)?);
            last = whole.end();
        }

        out.push_str(&template[last..]);
        Ok(out)
    }

    fn resolve_inner(&self, name: &str, template: &str, stack: &mut Vec<String>) -> Result<String> {
        if let Some(pos) = stack.iter().position(|k| k == name) {
            let mut chain = stack[pos..].to_vec();
            chain.push(name.to_string());
            return Err(DeployError::CyclicVariableReference(chain));
        }

        let raw = self
            .entries
            .get(name)
            .ok_or_else(|| DeployError::UnknownVariable {
                name: name.to_string(),
                template: template.to_string(),
            })?;

        stack.push(name.to_string());
        let value = self.expand(raw, stack);
        stack.pop();
        value
    }
}

/// Whether `s` still contains a `{{ key }}` placeholder.
pub fn has_placeholders(s: &str) -> bool {
    PLACEHOLDER.is_match(s)
}
