//! Rule-level stylesheet diffing for critical CSS extraction
//!
//! - [`diff`]: subtract a critical CSS fragment from a full stylesheet
//! - [`optimize`]: filter and deduplicate concatenated critical CSS
//! - [`ast`]: the raw-text preserving stylesheet model both are built on

pub mod ast;
pub mod diff;
pub mod optimize;

pub use ast::{AtRule, Declaration, MediaBlock, Node, Rule, Stylesheet};
pub use diff::{diff, diff_stylesheets};
pub use optimize::{ExcludePattern, IgnoreOptions, OptimizeOptions, optimize};
