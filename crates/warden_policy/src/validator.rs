//! Depth-first scan of a project for the first rule violation.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{PolicyError, PolicyResult};
use crate::rules::{RuleMatcher, RuleSet, CONVENTIONAL_LOCAL_ROOTS};

/// Directories never scanned: installed packages, build output, tooling state.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".next",
    ".git",
    ".warden",
    "dist",
    "out",
    "coverage",
];

const MAX_EXCERPT_CHARS: usize = 200;

/// Captures the specifier of `import`/`export ... from`, dynamic `import()`
/// and `require()`.
const IMPORT_SPECIFIER: &str =
    r#"(?:\bfrom\s+|\bimport\s*\(\s*|\brequire\s*\(\s*|^\s*import\s+)['"]([^'"]+)['"]"#;

/// Extensions whose files can be imported by their stem.
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// A single structural violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationFinding {
    /// Label of the rule that matched
    pub rule: String,
    /// Project-relative path, `/`-separated
    pub file_path: String,
    /// What is wrong, including the offending excerpt for content rules
    pub detail: String,
    /// 1-based line for content rules
    pub line: Option<usize>,
}

impl ValidationFinding {
    /// Text handed to the generator when asking for a repair.
    pub fn to_error_context(&self) -> String {
        let location = match self.line {
            Some(line) => format!("{}:{}", self.file_path, line),
            None => self.file_path.clone(),
        };
        format!(
            "Static validation failed before compilation.\n\
             Rule: {}\n\
             File: {}\n\
             Problem: {}\n\
             Fix this file (or remove it) and return the complete corrected project.",
            self.rule, location, self.detail
        )
    }
}

impl fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "[{}] {}:{}: {}", self.rule, self.file_path, line, self.detail),
            None => write!(f, "[{}] {}: {}", self.rule, self.file_path, self.detail),
        }
    }
}

enum CompiledMatcher {
    Content { regex: Regex, files: Vec<Pattern> },
    Path { globs: Vec<Pattern> },
    LocalImport { specifier: Regex, alias: String, files: Vec<Pattern> },
}

/// Names a bare specifier can resolve to inside the project being scanned.
struct ProjectRoots {
    names: BTreeSet<String>,
}

impl ProjectRoots {
    /// Top-level entries of `root` and of `root/src`, plus the conventional
    /// folder names.
    fn scan(root: &Path, excluded_dirs: &[String]) -> Self {
        let mut names: BTreeSet<String> =
            CONVENTIONAL_LOCAL_ROOTS.iter().map(|n| n.to_string()).collect();

        for base in [root.to_path_buf(), root.join("src")] {
            let Ok(entries) = fs::read_dir(&base) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') || excluded_dirs.iter().any(|d| *d == name) {
                    continue;
                }
                if path.is_dir() {
                    names.insert(name);
                } else if let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) {
                    if SOURCE_EXTENSIONS.iter().any(|e| ext == *e) {
                        names.insert(stem.to_string_lossy().into_owned());
                    }
                }
            }
        }

        Self { names }
    }

    fn is_local(&self, specifier: &str, alias: &str) -> bool {
        if specifier.starts_with('.') || (!alias.is_empty() && specifier.starts_with(alias)) {
            return false;
        }
        if specifier.starts_with('/') {
            return true;
        }
        let first = specifier.split('/').next().unwrap_or(specifier);
        self.names.contains(first)
    }
}

struct CompiledRule {
    label: String,
    description: String,
    matcher: CompiledMatcher,
}

struct SourceFile {
    path: PathBuf,
    relative: String,
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

fn compile_globs(rule: &str, globs: &[String]) -> PolicyResult<Vec<Pattern>> {
    globs
        .iter()
        .map(|g| {
            Pattern::new(g).map_err(|e| PolicyError::InvalidRule {
                rule: rule.to_string(),
                message: format!("Invalid glob '{}': {}", g, e),
            })
        })
        .collect()
}

fn matches_any(patterns: &[Pattern], relative: &str) -> bool {
    let options = match_options();
    patterns.iter().any(|p| p.matches_with(relative, options))
}

impl CompiledRule {
    fn check(&self, file: &SourceFile, roots: &ProjectRoots) -> Option<ValidationFinding> {
        match &self.matcher {
            CompiledMatcher::Path { globs } => {
                if !matches_any(globs, &file.relative) {
                    return None;
                }
                Some(ValidationFinding {
                    rule: self.label.clone(),
                    file_path: file.relative.clone(),
                    detail: self.description.clone(),
                    line: None,
                })
            }
            CompiledMatcher::Content { regex, files } => {
                if !files.is_empty() && !matches_any(files, &file.relative) {
                    return None;
                }
                // Unreadable or non-UTF-8 files are not source
                let content = std::fs::read_to_string(&file.path).ok()?;
                content.lines().enumerate().find_map(|(index, line)| {
                    regex.find(line).map(|_| self.line_finding(file, index, line))
                })
            }
            CompiledMatcher::LocalImport { specifier, alias, files } => {
                if !files.is_empty() && !matches_any(files, &file.relative) {
                    return None;
                }
                let content = std::fs::read_to_string(&file.path).ok()?;
                content.lines().enumerate().find_map(|(index, line)| {
                    specifier
                        .captures_iter(line)
                        .filter_map(|caps| caps.get(1))
                        .any(|m| roots.is_local(m.as_str(), alias))
                        .then(|| self.line_finding(file, index, line))
                })
            }
        }
    }

    fn line_finding(&self, file: &SourceFile, index: usize, line: &str) -> ValidationFinding {
        let excerpt: String = line.trim().chars().take(MAX_EXCERPT_CHARS).collect();
        ValidationFinding {
            rule: self.label.clone(),
            file_path: file.relative.clone(),
            detail: format!("{} (`{}`)", self.description, excerpt),
            line: Some(index + 1),
        }
    }
}

/// Applies a rule set to a project tree.
pub struct Validator {
    rules: Vec<CompiledRule>,
    excluded_dirs: Vec<String>,
}

impl Validator {
    /// Compile every enabled rule of `rule_set`, keeping its order.
    pub fn new(rule_set: &RuleSet) -> PolicyResult<Self> {
        let mut rules = Vec::new();
        for rule in rule_set.rules.iter().filter(|r| r.enabled) {
            let matcher = match &rule.matcher {
                RuleMatcher::ContentPattern { pattern, files } => CompiledMatcher::Content {
                    regex: Regex::new(pattern).map_err(|e| PolicyError::InvalidRule {
                        rule: rule.label.clone(),
                        message: format!("Invalid regex: {}", e),
                    })?,
                    files: compile_globs(&rule.label, files)?,
                },
                RuleMatcher::PathPattern { globs } => CompiledMatcher::Path {
                    globs: compile_globs(&rule.label, globs)?,
                },
                RuleMatcher::LocalImport { alias, files } => CompiledMatcher::LocalImport {
                    specifier: Regex::new(IMPORT_SPECIFIER).map_err(|e| PolicyError::InvalidRule {
                        rule: rule.label.clone(),
                        message: format!("Invalid regex: {}", e),
                    })?,
                    alias: alias.clone(),
                    files: compile_globs(&rule.label, files)?,
                },
            };
            let description = if rule.description.is_empty() {
                format!("Violates rule '{}'", rule.label)
            } else {
                rule.description.clone()
            };
            rules.push(CompiledRule {
                label: rule.label.clone(),
                description,
                matcher,
            });
        }

        Ok(Self {
            rules,
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
        })
    }

    /// Replace the set of directory names skipped during the scan.
    pub fn with_excluded_dirs(mut self, dirs: Vec<String>) -> Self {
        self.excluded_dirs = dirs;
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Return the first violation under `root`, or `None` when clean.
    ///
    /// Rules are tried in priority order; within a rule, files are visited
    /// depth-first in file-name order.
    pub fn find_violation(&self, root: &Path) -> PolicyResult<Option<ValidationFinding>> {
        if !root.is_dir() {
            return Err(PolicyError::InvalidTarget(root.display().to_string()));
        }

        let files = self.collect_files(root);
        let roots = ProjectRoots::scan(root, &self.excluded_dirs);
        debug!(
            "Validating {} files against {} rules",
            files.len(),
            self.rules.len()
        );

        for rule in &self.rules {
            if let Some(finding) = files.iter().find_map(|file| rule.check(file, &roots)) {
                debug!("Validation finding: {}", finding);
                return Ok(Some(finding));
            }
        }

        Ok(None)
    }

    fn collect_files(&self, root: &Path) -> Vec<SourceFile> {
        let excluded = &self.excluded_dirs;
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                !(entry.depth() > 0
                    && entry.file_type().is_dir()
                    && excluded
                        .iter()
                        .any(|d| entry.file_name().to_string_lossy() == d.as_str()))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|entry| {
                let path = entry.path().to_path_buf();
                let relative = path
                    .strip_prefix(root)
                    .unwrap_or(path.as_path())
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                SourceFile { path, relative }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::ValidationRule;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_clean_project_has_no_finding() {
        let temp = tempdir().unwrap();
        write(
            temp.path(),
            "app/page.tsx",
            "import { Button } from '@/components/button';\nimport x from './x';\nimport React from 'react';\n",
        );

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        assert_eq!(validator.find_violation(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_bare_local_import_is_flagged() {
        let temp = tempdir().unwrap();
        write(
            temp.path(),
            "app/page.tsx",
            "import React from 'react';\nimport { Card } from \"components/card\";\n",
        );

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();

        assert_eq!(finding.rule, "non-relative-local-import");
        assert_eq!(finding.file_path, "app/page.tsx");
        assert_eq!(finding.line, Some(2));
        assert!(finding.detail.contains("components/card"));
    }

    #[test]
    fn test_bare_import_of_any_project_folder_is_flagged() {
        let temp = tempdir().unwrap();
        write(temp.path(), "models/user.ts", "export const u = 1;\n");
        write(temp.path(), "app/page.tsx", "import { u } from 'models/user';\n");

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();

        assert_eq!(finding.rule, "non-relative-local-import");
        assert_eq!(finding.file_path, "app/page.tsx");
        assert!(finding.detail.contains("models/user"));
    }

    #[test]
    fn test_bare_import_resolves_against_src_and_root_files() {
        let temp = tempdir().unwrap();
        write(temp.path(), "src/features/cart.ts", "export const cart = [];\n");
        write(temp.path(), "config.ts", "export const config = {};\n");
        write(temp.path(), "src/app/page.tsx", "import { config } from 'config';\n");
        write(temp.path(), "src/app/shop/page.tsx", "const { cart } = require('features/cart');\n");

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();

        assert_eq!(finding.file_path, "src/app/page.tsx");
        std::fs::remove_file(temp.path().join("src/app/page.tsx")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();
        assert_eq!(finding.file_path, "src/app/shop/page.tsx");
    }

    #[test]
    fn test_packages_and_alias_imports_are_allowed() {
        let temp = tempdir().unwrap();
        write(temp.path(), "models/user.ts", "export const u = 1;\n");
        write(temp.path(), "next.config.mjs", "export default {};\n");
        write(
            temp.path(),
            "app/page.tsx",
            "import React from 'react';\nimport Link from 'next/link';\nimport { z } from '@scope/zod';\n\
             import { u } from '@/models/user';\nexport { u as v } from '../models/user';\n",
        );

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        assert_eq!(validator.find_violation(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_absolute_import_is_flagged() {
        let temp = tempdir().unwrap();
        write(temp.path(), "app/page.tsx", "const data = await import('/data/items');\n");

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();

        assert_eq!(finding.rule, "non-relative-local-import");
    }

    #[test]
    fn test_priority_order_beats_file_order() {
        let temp = tempdir().unwrap();
        // `a.tsx` sorts first but violates a lower-priority rule
        write(temp.path(), "app/a.tsx", "import Link from 'react-router-dom';\n");
        write(temp.path(), "app/z.tsx", "import { useRouter } from 'next/router';\n");

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();

        assert_eq!(finding.rule, "pages-router-import");
        assert_eq!(finding.file_path, "app/z.tsx");
    }

    #[test]
    fn test_pages_directory_is_flagged() {
        let temp = tempdir().unwrap();
        write(temp.path(), "src/pages/index.tsx", "export default function Home() { return null; }\n");

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let finding = validator.find_violation(temp.path()).unwrap().unwrap();

        assert_eq!(finding.rule, "pages-directory");
        assert_eq!(finding.file_path, "src/pages/index.tsx");
        assert_eq!(finding.line, None);
    }

    #[test]
    fn test_excluded_directories_are_skipped() {
        let temp = tempdir().unwrap();
        write(temp.path(), "node_modules/pkg/index.js", "const r = require('next/router');\n");
        write(temp.path(), ".next/server/pages/index.js", "import x from 'src/x';\n");

        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        assert_eq!(validator.find_violation(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_disabled_rules_are_ignored() {
        let temp = tempdir().unwrap();
        write(temp.path(), "app/page.tsx", "const legacy = true;\n");

        let mut rules = RuleSet::new("custom");
        rules.add(ValidationRule::content_pattern("no-legacy", r"\blegacy\b").disabled());

        let validator = Validator::new(&rules).unwrap();
        assert_eq!(validator.rule_count(), 0);
        assert_eq!(validator.find_violation(temp.path()).unwrap(), None);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let mut rules = RuleSet::new("broken");
        rules.add(ValidationRule::content_pattern("broken", "(unclosed"));

        assert!(matches!(
            Validator::new(&rules),
            Err(PolicyError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
        let result = validator.find_violation(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(PolicyError::InvalidTarget(_))));
    }

    #[test]
    fn test_error_context_mentions_location() {
        let finding = ValidationFinding {
            rule: "pages-router-import".to_string(),
            file_path: "app/page.tsx".to_string(),
            detail: "bad import".to_string(),
            line: Some(3),
        };

        let context = finding.to_error_context();
        assert!(context.contains("app/page.tsx:3"));
        assert!(context.contains("pages-router-import"));
    }
}
