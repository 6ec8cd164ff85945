//! Known model names and the DashScope application each one is served by.

use std::collections::BTreeMap;

/// Built-in model name → application id table.
pub const BUILTIN_APPS: &[(&str, &str)] = &[
    ("deepseek-r1-distill-qwen-32b", "39d8f00473e14906b3fe4c32cbdb4f18"),
    ("deepseek-r1", "9facbc3b881943eaa6debfe508deee32"),
    ("qwen-plus", "f196f5679be34d4cb2942fad915f21f3"),
    ("qwen-max", "79602e8ff8564665958c8392b507256a"),
];

/// Lookup table from model name to application id.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    apps: BTreeMap<String, String>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        Self {
            apps: BUILTIN_APPS
                .iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect(),
        }
    }

    /// Built-in table plus `extra` (config `apps`); entries in `extra` win.
    pub fn with_overrides(extra: &BTreeMap<String, String>) -> Self {
        let mut registry = Self::builtin();
        for (name, id) in extra {
            let name = name.trim();
            let id = id.trim();
            if name.is_empty() || id.is_empty() {
                continue;
            }
            registry.apps.insert(name.to_string(), id.to_string());
        }
        registry
    }

    /// Application id for a model name, if known.
    pub fn app_id(&self, model: &str) -> Option<&str> {
        self.apps.get(model.trim()).map(String::as_str)
    }

    /// Known model names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup() {
        let r = ModelRegistry::builtin();
        assert_eq!(r.app_id("qwen-max"), Some("79602e8ff8564665958c8392b507256a"));
        assert_eq!(r.app_id(" qwen-plus "), Some("f196f5679be34d4cb2942fad915f21f3"));
        assert_eq!(r.app_id("gpt-4"), None);
        assert_eq!(r.app_id(""), None);
        assert_eq!(r.names().count(), 4);
    }

    #[test]
    fn overrides_add_and_replace() {
        let mut extra = BTreeMap::new();
        extra.insert("qwen-max".to_string(), "custom".to_string());
        extra.insert("qwen-turbo".to_string(), "turbo-app".to_string());
        extra.insert("blank".to_string(), " ".to_string());
        let r = ModelRegistry::with_overrides(&extra);
        assert_eq!(r.app_id("qwen-max"), Some("custom"));
        assert_eq!(r.app_id("qwen-turbo"), Some("turbo-app"));
        assert_eq!(r.app_id("blank"), None);
    }
}
