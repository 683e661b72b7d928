//! `${name}` variable expansion for recipe strings
//!
//! Built-in names cover the node's folders and settings. `${options.X}`
//! reads an effective option of the node and `${env.X}` reads the node's
//! environment (never the orchestrator's own).

use std::collections::BTreeMap;

/// Variables every recipe can use
pub const BUILTIN_VARIABLES: &[&str] = &[
    "source_folder",
    "build_folder",
    "package_folder",
    "generators_folder",
    "recipe_folder",
    "name",
    "version",
    "jobs",
    "os",
    "arch",
    "build_type",
    "cppstd",
];

pub const OPTIONS_PREFIX: &str = "options.";
pub const ENV_PREFIX: &str = "env.";

/// Names referenced as `${name}` in `input`, in order of appearance
#[must_use]
pub fn references(input: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        names.push(&after[..end]);
        rest = &after[end + 1..];
    }
    names
}

/// Substitution table for one node
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Add `options.NAME` for every option
    pub fn set_options(&mut self, options: &BTreeMap<String, String>) {
        for (name, value) in options {
            self.set(format!("{OPTIONS_PREFIX}{name}"), value.clone());
        }
    }

    /// Add `env.NAME` for every variable
    pub fn set_env(&mut self, env: &BTreeMap<String, String>) {
        for (name, value) in env {
            self.set(format!("{ENV_PREFIX}{name}"), value.clone());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Replace every known `${name}`; unknown references are kept verbatim
    #[must_use]
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                return out;
            };
            let key = &after[..end];
            match self.values.get(key) {
                Some(value) => out.push_str(value),
                None => {
                    out.push_str("${");
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Expand every element
    #[must_use]
    pub fn expand_all(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|input| self.expand(input)).collect()
    }
}

/// Whether `${name}` can ever be bound for a recipe declaring `options`
#[must_use]
pub fn is_known_variable<V>(name: &str, options: &BTreeMap<String, V>) -> bool {
    if BUILTIN_VARIABLES.contains(&name) {
        return true;
    }
    if let Some(option) = name.strip_prefix(OPTIONS_PREFIX) {
        return options.contains_key(option);
    }
    name.strip_prefix(ENV_PREFIX)
        .is_some_and(|var| !var.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_known_and_keep_unknown() {
        let vars = Variables::new()
            .with("build_folder", "/b")
            .with("name", "dxc");
        assert_eq!(
            vars.expand("-DCMAKE_INSTALL_PREFIX=${build_folder}/installed ${name} ${missing}"),
            "-DCMAKE_INSTALL_PREFIX=/b/installed dxc ${missing}"
        );
    }

    #[test]
    fn test_unterminated_reference_is_literal() {
        let vars = Variables::new().with("a", "1");
        assert_eq!(vars.expand("x ${a} ${a"), "x 1 ${a");
    }

    #[test]
    fn test_references() {
        assert_eq!(
            references("${source_folder}/cmake/${options.mode}.cmake"),
            vec!["source_folder", "options.mode"]
        );
        assert!(references("no vars").is_empty());
    }

    #[test]
    fn test_known_variables() {
        let mut options = BTreeMap::new();
        options.insert("shared".to_string(), ());
        assert!(is_known_variable("package_folder", &options));
        assert!(is_known_variable("options.shared", &options));
        assert!(!is_known_variable("options.static", &options));
        assert!(is_known_variable("env.PATH", &options));
        assert!(!is_known_variable("env.", &options));
        assert!(!is_known_variable("pkg_folder", &options));
    }

    #[test]
    fn test_options_and_env_prefixes() {
        let mut vars = Variables::new();
        let mut map = BTreeMap::new();
        map.insert("shared".to_string(), "true".to_string());
        vars.set_options(&map);
        vars.set_env(&map);
        assert_eq!(vars.expand("${options.shared}/${env.shared}"), "true/true");
    }
}
