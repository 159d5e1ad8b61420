//! Variable expansion for cross-pipeline dependency templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

pub trait VariableExpander: Send + Sync {
    /// Expand `template` against `scope`.
    fn expand(&self, template: &str, scope: &HashMap<String, String>) -> String;
}

static VARIABLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").ok()
});

/// Expands `$VAR` and `${VAR}`. Unknown variables expand to the empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellStyleExpander;

impl VariableExpander for ShellStyleExpander {
    fn expand(&self, template: &str, scope: &HashMap<String, String>) -> String {
        let Some(pattern) = VARIABLE.as_ref() else {
            return template.to_string();
        };
        if !template.contains('$') {
            return template.to_string();
        }

        pattern
            .replace_all(template, |caps: &Captures<'_>| {
                caps.get(1)
                    .or_else(|| caps.get(2))
                    .and_then(|name| scope.get(name.as_str()))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}
