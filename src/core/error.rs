//! Error handling for stacksplit.
//!
//! All failures in a split run surface as a [`SplitError`] (or an
//! `anyhow::Error` wrapping one, with call-site context). There are no
//! partial-success semantics: a structural problem in the input template, a
//! failed upload, or an unresolvable deployment bucket all reject the run
//! before the parent template is written.
//!
//! # Error categories
//!
//! - [`SplitError::Structural`] — a reference inside the template does not
//!   have the shape the rewriters expect (for example an event-rule target
//!   whose `Arn` is neither `Ref` nor `Fn::GetAtt`). Raised at decode time
//!   rather than mid-rewrite so no partition is ever half-mutated.
//! - [`SplitError::Upload`] — a partition document or function archive
//!   failed to upload. Composition never proceeds past a failed upload.
//! - [`SplitError::ConfigResolution`] — the deployment bucket name could
//!   not be resolved from the CLI, environment, or deployment state file.
//!   Raised before any upload is attempted.
//! - [`SplitError::TemplateParse`] — the compiled template file is not
//!   valid JSON or not a valid template document.

use thiserror::Error;

/// The error type for all stacksplit operations.
#[derive(Error, Debug)]
pub enum SplitError {
    /// A reference could not be classified or extracted.
    ///
    /// Silently dropping a malformed reference would produce a template
    /// that deploys but is wired wrong, so this always fails the run.
    #[error("structural error in resource '{resource}': {reason}")]
    Structural {
        /// Logical name of the offending resource.
        resource: String,
        /// What was expected and what was found.
        reason: String,
    },

    /// Uploading a partition document or archive to the deployment bucket failed.
    #[error("failed to upload '{key}': {reason}")]
    Upload {
        /// Object key (artifact path + file name) of the failed upload.
        key: String,
        /// Underlying transport error.
        reason: String,
    },

    /// The deployment bucket name could not be resolved.
    #[error("cannot resolve deployment bucket name: {reason}")]
    ConfigResolution {
        /// Why resolution failed and where stacksplit looked.
        reason: String,
    },

    /// The compiled template file could not be parsed.
    #[error("invalid template file '{file}': {reason}")]
    TemplateParse {
        /// Path of the file that failed to parse.
        file: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SplitError {
    /// Shorthand for a [`SplitError::Structural`] against a named resource.
    pub fn structural(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Structural {
            resource: resource.into(),
            reason: reason.into(),
        }
    }
}
