//! Loading and saving template documents.
//!
//! Writes are atomic (temp file + rename) so a crashed run never leaves a
//! half-written stack document in the package directory.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::core::SplitError;

use super::Template;

/// Load and decode a compiled template from disk.
///
/// Parse failures are reported as [`SplitError::TemplateParse`] with the
/// file path; reference-shape violations surface as
/// [`SplitError::Structural`].
pub fn load_template(path: &Path) -> Result<Template> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("cannot read compiled template: {}", path.display()))?;

    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| SplitError::TemplateParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;

    Ok(Template::from_value(value)?)
}

/// Serialize a template to pretty-printed JSON.
pub fn render_template(template: &Template) -> Result<String> {
    serde_json::to_string_pretty(template)
        .context("failed to serialize template")
}

/// Write a template to `path` atomically, creating parent directories.
pub fn write_template(path: &Path, template: &Template) -> Result<()> {
    let body = render_template(template)?;
    atomic_write(path, body.as_bytes())
        .with_context(|| format!("failed to write template: {}", path.display()))
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("failed to write temp file: {}", temp_path.display()))?;
        file.sync_all().context("failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename temp file to: {}", path.display()))?;
    Ok(())
}
