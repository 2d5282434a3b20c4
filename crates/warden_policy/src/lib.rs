//! # warden_policy
//!
//! Static validation of generated sources for buildwarden.
//!
//! Rules are plain data ([`ValidationRule`] = label + [`RuleMatcher`]) grouped
//! in a [`RuleSet`] whose order is the priority order. The [`Validator`] walks
//! the project depth-first and reports only the first violation it finds, so a
//! repair round-trip always carries one concrete defect.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use warden_policy::{RuleSet, Validator};
//!
//! let validator = Validator::new(&RuleSet::app_router("@/"))?;
//! if let Some(finding) = validator.find_violation(Path::new("./my-app"))? {
//!     println!("{}", finding);
//! }
//! # Ok::<(), warden_policy::PolicyError>(())
//! ```

pub mod error;
pub mod rules;
pub mod validator;

pub use error::{PolicyError, PolicyResult};
pub use rules::{RuleMatcher, RuleSet, ValidationRule, CONVENTIONAL_LOCAL_ROOTS, SOURCE_GLOBS};
pub use validator::{ValidationFinding, Validator, DEFAULT_EXCLUDED_DIRS};
