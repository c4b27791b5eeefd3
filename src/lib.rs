//! PDF Clean Library
//!
//! Rewrites PDF page content streams and rebuilds their resource
//! dictionaries so that each holds only what the content actually uses.
//! This library provides functionality to:
//! - Re-emit page content through a filtering pipeline, merging fragments
//! - Rebuild minimal `Resources` for pages, form XObjects, soft-mask groups
//!   and Type3 fonts
//! - Flatten resource inheritance so nested objects carry their own resources
//! - Inspect which nested objects still borrow resources from their user
//!
//! # Example
//!
//! ```no_run
//! use pdf_clean::pdf::{clean_pdf, CleanOptions};
//! use std::path::PathBuf;
//!
//! let options = CleanOptions {
//!     pages: Some(vec![1, 2]),
//!     ..CleanOptions::default()
//! };
//!
//! clean_pdf(&PathBuf::from("input.pdf"), &PathBuf::from("cleaned.pdf"), &options)
//!     .expect("Failed to clean PDF");
//! ```

pub mod cookie;
pub mod error;
pub mod pdf;

// Re-export commonly used items
pub use cookie::Cookie;
pub use error::{CleanPhase, Error, Result};
