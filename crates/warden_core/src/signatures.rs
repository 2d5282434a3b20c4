//! Known output signatures of a broken dependency install.
//!
//! The table is data: adding a signature never touches control flow. Both the
//! installer and the repair loop classify output against it.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionKind {
    /// A package tarball was cut short while extracting
    TruncatedArchive,
    /// A helper package nested inside the installed tree is missing
    MissingNestedPackage,
    /// A cache references files that no longer exist
    StaleCacheReference,
}

impl CorruptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TruncatedArchive => "truncated_archive",
            Self::MissingNestedPackage => "missing_nested_package",
            Self::StaleCacheReference => "stale_cache_reference",
        }
    }
}

impl std::fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One `{signature, classification}` pair.
#[derive(Debug, Clone, Copy)]
pub struct CorruptionSignature {
    pub kind: CorruptionKind,
    pub pattern: &'static str,
}

pub const CORRUPTION_SIGNATURES: &[CorruptionSignature] = &[
    CorruptionSignature {
        kind: CorruptionKind::TruncatedArchive,
        pattern: r"TAR_ENTRY_(?:ERROR|INVALID)",
    },
    CorruptionSignature {
        kind: CorruptionKind::TruncatedArchive,
        pattern: r"(?i)unexpected end of (?:file|data)",
    },
    CorruptionSignature {
        kind: CorruptionKind::TruncatedArchive,
        pattern: r"(?i)zlib: (?:unexpected end|incorrect header)",
    },
    CorruptionSignature {
        kind: CorruptionKind::MissingNestedPackage,
        pattern: r"Cannot find module '[^']*node_modules[^']*'",
    },
    CorruptionSignature {
        kind: CorruptionKind::MissingNestedPackage,
        pattern: r"Cannot find module '(?:next/dist|@next|@swc|styled-jsx)/?[^']*'",
    },
    CorruptionSignature {
        kind: CorruptionKind::StaleCacheReference,
        pattern: r"ENOENT[^\n]*(?:node_modules|\.next)",
    },
    CorruptionSignature {
        kind: CorruptionKind::StaleCacheReference,
        pattern: r"EINTEGRITY",
    },
];

fn compiled() -> &'static [(CorruptionKind, Regex)] {
    static COMPILED: OnceLock<Vec<(CorruptionKind, Regex)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        CORRUPTION_SIGNATURES
            .iter()
            .filter_map(|sig| match Regex::new(sig.pattern) {
                Ok(re) => Some((sig.kind, re)),
                Err(e) => {
                    warn!("Skipping invalid corruption signature {}: {}", sig.pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Classify captured output. Returns the first matching signature's kind.
pub fn classify_corruption(output: &str) -> Option<CorruptionKind> {
    compiled()
        .iter()
        .find(|(_, re)| re.is_match(output))
        .map(|(kind, _)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_signatures_compile() {
        assert_eq!(compiled().len(), CORRUPTION_SIGNATURES.len());
    }

    #[test]
    fn test_truncated_archive() {
        let output = "npm WARN tar TAR_ENTRY_ERROR ENOENT: no such file or directory, open '/app/node_modules/next/dist/server.js'";
        assert_eq!(
            classify_corruption(output),
            Some(CorruptionKind::TruncatedArchive)
        );
    }

    #[test]
    fn test_missing_nested_package() {
        let output = "Error: Cannot find module '@swc/helpers/_/_interop_require_default'";
        assert_eq!(
            classify_corruption(output),
            Some(CorruptionKind::MissingNestedPackage)
        );
    }

    #[test]
    fn test_stale_cache() {
        let output = "Error: ENOENT: no such file or directory, open '/app/.next/server/pages-manifest.json'";
        assert_eq!(
            classify_corruption(output),
            Some(CorruptionKind::StaleCacheReference)
        );
    }

    #[test]
    fn test_code_defects_are_not_corruption() {
        assert_eq!(
            classify_corruption("Type error: Cannot find module '@/components/Hero'"),
            None
        );
        assert_eq!(
            classify_corruption("npm ERR! code ETARGET\nnpm ERR! notarget No matching version"),
            None
        );
    }
}
