//! Integration tests for the static validator.

use std::fs;
use std::path::Path;

use tempfile::tempdir;
use warden_policy::{RuleSet, ValidationRule, Validator};

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn scaffold_app(root: &Path) {
    write(root, "package.json", r#"{"name":"demo","scripts":{"build":"next build"}}"#);
    write(root, "tsconfig.json", r#"{"compilerOptions":{"paths":{"@/*":["./*"]}}}"#);
    write(
        root,
        "app/layout.tsx",
        "import './globals.css';\nexport default function RootLayout({ children }) { return children; }\n",
    );
    write(
        root,
        "app/page.tsx",
        "import { Hero } from '@/components/hero';\nexport default function Page() { return <Hero />; }\n",
    );
    write(
        root,
        "components/hero.tsx",
        "'use client';\nimport { useRouter } from 'next/navigation';\nexport function Hero() { return null; }\n",
    );
}

/// A freshly generated app-router project passes.
#[test]
fn test_generated_app_passes() {
    let temp = tempdir().unwrap();
    scaffold_app(temp.path());

    let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
    assert!(validator.find_violation(temp.path()).unwrap().is_none());
}

/// Only one finding is surfaced even when several files are broken.
#[test]
fn test_only_first_finding_is_reported() {
    let temp = tempdir().unwrap();
    scaffold_app(temp.path());
    write(temp.path(), "app/about/page.tsx", "import Head from 'next/head';\n");
    write(temp.path(), "pages/legacy.tsx", "export default function Legacy() {}\n");
    write(temp.path(), "app/blog/page.tsx", "import { Post } from 'lib/posts';\n");

    let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();
    let finding = validator.find_violation(temp.path()).unwrap().unwrap();

    // Highest-priority rule wins, regardless of how many others match
    assert_eq!(finding.rule, "non-relative-local-import");
    assert_eq!(finding.file_path, "app/blog/page.tsx");
}

/// Fixing the reported file surfaces the next defect on the following pass.
#[test]
fn test_findings_surface_one_per_pass() {
    let temp = tempdir().unwrap();
    scaffold_app(temp.path());
    write(temp.path(), "app/about/page.tsx", "import Head from 'next/head';\n");
    write(temp.path(), "pages/legacy.tsx", "export default function Legacy() {}\n");

    let validator = Validator::new(&RuleSet::app_router("@/")).unwrap();

    let first = validator.find_violation(temp.path()).unwrap().unwrap();
    assert_eq!(first.rule, "pages-router-import");
    write(temp.path(), "app/about/page.tsx", "export const metadata = { title: 'About' };\n");

    let second = validator.find_violation(temp.path()).unwrap().unwrap();
    assert_eq!(second.rule, "pages-directory");
    fs::remove_dir_all(temp.path().join("pages")).unwrap();

    assert!(validator.find_violation(temp.path()).unwrap().is_none());
}

/// New rules are added as data, without touching the scanner.
#[test]
fn test_custom_rules_extend_the_default_set() {
    let temp = tempdir().unwrap();
    scaffold_app(temp.path());
    write(temp.path(), "lib/data.ts", "import $ from 'jquery';\n");

    let mut rules = RuleSet::app_router("@/");
    rules.add(
        ValidationRule::content_pattern("no-jquery", r#"['"]jquery['"]"#)
            .with_description("jQuery is not part of the stack"),
    );

    let validator = Validator::new(&rules).unwrap();
    let finding = validator.find_violation(temp.path()).unwrap().unwrap();

    assert_eq!(finding.rule, "no-jquery");
    assert_eq!(finding.file_path, "lib/data.ts");
    assert!(finding.detail.starts_with("jQuery is not part of the stack"));
}
