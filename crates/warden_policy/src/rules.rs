//! Validation rules and rule sets.

use serde::{Deserialize, Serialize};

/// Globs selecting the source files content rules look at.
pub const SOURCE_GLOBS: &[&str] = &[
    "**/*.ts",
    "**/*.tsx",
    "**/*.js",
    "**/*.jsx",
    "**/*.mjs",
    "**/*.cjs",
];

/// Folder names treated as project-local even before they exist on disk.
/// Anything else is resolved against the project's top-level entries at
/// scan time.
pub const CONVENTIONAL_LOCAL_ROOTS: &[&str] = &[
    "src", "app", "components", "lib", "hooks", "utils", "styles", "types", "context",
    "services",
];

/// Alias shapes other generators like to invent.
const FOREIGN_ALIASES: &[&str] = &["~/", "@src/", "#/"];

/// How a rule recognises a violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleMatcher {
    /// Regex tested line by line against files matching any of `files`.
    ContentPattern { pattern: String, files: Vec<String> },
    /// Any file whose project-relative path matches one of `globs`.
    PathPattern { globs: Vec<String> },
    /// Import specifiers that are neither relative nor under `alias` but
    /// name a project-local module (absolute paths, or a first segment that
    /// is a top-level entry of the project or its `src/`).
    LocalImport { alias: String, files: Vec<String> },
}

/// A single validation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationRule {
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub matcher: RuleMatcher,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ValidationRule {
    /// Create a content rule over all source files.
    pub fn content_pattern(label: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
            matcher: RuleMatcher::ContentPattern {
                pattern: pattern.into(),
                files: SOURCE_GLOBS.iter().map(|g| g.to_string()).collect(),
            },
            enabled: true,
        }
    }

    /// Create a rule flagging local modules imported around `alias`.
    pub fn local_import(label: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
            matcher: RuleMatcher::LocalImport {
                alias: alias.into(),
                files: SOURCE_GLOBS.iter().map(|g| g.to_string()).collect(),
            },
            enabled: true,
        }
    }

    /// Create a rule flagging files by path.
    pub fn path_pattern(label: impl Into<String>, globs: Vec<String>) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
            matcher: RuleMatcher::PathPattern { globs },
            enabled: true,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Restrict a content rule to the given file globs.
    pub fn with_files(mut self, globs: Vec<String>) -> Self {
        match &mut self.matcher {
            RuleMatcher::ContentPattern { files, .. } | RuleMatcher::LocalImport { files, .. } => {
                *files = globs;
            }
            RuleMatcher::PathPattern { .. } => {}
        }
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// An ordered set of rules. Earlier rules take priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<ValidationRule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Rules for a Next.js project standardised on the app router with
    /// `alias` (e.g. `@/`) as its declared path alias.
    pub fn app_router(alias: &str) -> Self {
        let mut rules = Self::new("Next.js app router");

        rules.add(
            ValidationRule::local_import("non-relative-local-import", alias).with_description(format!(
                "Local module imported by a bare or absolute path; use a relative path or the '{}' alias",
                alias
            )),
        );

        let foreign: Vec<String> = FOREIGN_ALIASES
            .iter()
            .filter(|candidate| **candidate != alias)
            .map(|candidate| regex::escape(candidate))
            .collect();
        if !foreign.is_empty() {
            rules.add(
                ValidationRule::content_pattern(
                    "undeclared-path-alias",
                    format!(r#"['"](?:{})[^'"]*['"]"#, foreign.join("|")),
                )
                .with_description(format!(
                    "Import uses a path alias the project does not declare; only '{}' is configured",
                    alias
                )),
            );
        }

        rules.add(
            ValidationRule::content_pattern(
                "pages-router-import",
                r#"(?:\bfrom\s+|\bimport\s*\(\s*|\brequire\s*\(\s*|^\s*import\s+)['"]next/(?:router|head|document)['"]"#,
            )
            .with_description(
                "Pages-router module imported in an app-router project; use next/navigation or the metadata API",
            ),
        );

        rules.add(
            ValidationRule::content_pattern(
                "pages-router-data-fetching",
                r"\bexport\s+(?:async\s+)?(?:function|const)\s+(?:getServerSideProps|getStaticProps|getStaticPaths|getInitialProps)\b",
            )
            .with_description(
                "Pages-router data fetching export; fetch data in a server component instead",
            ),
        );

        rules.add(
            ValidationRule::path_pattern(
                "pages-directory",
                vec!["pages/**".to_string(), "src/pages/**".to_string()],
            )
            .with_description(
                "pages/ directory found; routes must live under app/ in an app-router project",
            ),
        );

        rules.add(
            ValidationRule::content_pattern(
                "foreign-router",
                r#"['"]react-router(?:-dom)?['"]"#,
            )
            .with_description("react-router imported; routing is handled by the Next.js app router"),
        );

        rules
    }

    /// Add a rule with the lowest priority so far.
    pub fn add(&mut self, rule: ValidationRule) {
        self.rules.push(rule);
    }

    /// Append rules after the existing ones.
    pub fn extend(&mut self, rules: impl IntoIterator<Item = ValidationRule>) {
        self.rules.extend(rules);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_router_rule_order() {
        let rules = RuleSet::app_router("@/");
        let labels: Vec<&str> = rules.rules.iter().map(|r| r.label.as_str()).collect();

        assert_eq!(
            labels,
            vec![
                "non-relative-local-import",
                "undeclared-path-alias",
                "pages-router-import",
                "pages-router-data-fetching",
                "pages-directory",
                "foreign-router",
            ]
        );
    }

    #[test]
    fn test_declared_alias_is_not_foreign() {
        let rules = RuleSet::app_router("~/");
        let alias_rule = rules
            .rules
            .iter()
            .find(|r| r.label == "undeclared-path-alias")
            .unwrap();

        match &alias_rule.matcher {
            RuleMatcher::ContentPattern { pattern, .. } => {
                assert!(!pattern.contains("~/"));
                assert!(pattern.contains("@src/"));
            }
            other => panic!("unexpected matcher: {:?}", other),
        }
    }

    #[test]
    fn test_local_import_rule_carries_alias() {
        let rules = RuleSet::app_router("@/");

        assert_eq!(
            rules.rules[0].matcher,
            RuleMatcher::LocalImport {
                alias: "@/".to_string(),
                files: SOURCE_GLOBS.iter().map(|g| g.to_string()).collect(),
            }
        );
    }

    #[test]
    fn test_rules_deserialize_from_json() {
        let json = r#"{
            "name": "custom",
            "rules": [
                {"label": "no-jquery", "matcher": {"type": "content_pattern", "pattern": "jquery", "files": ["**/*.js"]}},
                {"label": "no-legacy", "matcher": {"type": "path_pattern", "globs": ["legacy/**"]}, "enabled": false},
                {"label": "bare-local", "matcher": {"type": "local_import", "alias": "~/", "files": ["**/*.ts"]}}
            ]
        }"#;

        let set: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.rules[0].enabled);
        assert!(!set.rules[1].enabled);
        assert!(matches!(&set.rules[2].matcher, RuleMatcher::LocalImport { alias, .. } if alias == "~/"));
    }
}
