// SPDX-License-Identifier: MIT

//! Guest-supplied path sanitization for result uploads.
//!
//! Guest VMs are hostile: every upload path is category-allowlisted,
//! length-bounded and stripped of characters that could escape the
//! task directory. Modeled on the original result server's
//! `sanitize_dumppath`/banned-character handling.

const MAX_FILENAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    #[error("path contains a parent-directory reference")]
    ParentTraversal,
    #[error("path is empty")]
    Empty,
    #[error("filename exceeds the maximum length")]
    TooLong,
}

/// Normalize backslashes to `/`, reject `..` segments, and replace NUL,
/// colon, and any other filesystem-hostile byte in the filename with `X`
/// — banned characters are sanitized in place, not grounds to reject the
/// whole upload, matching the original's `name.replace(c, "X")`.
///
/// Returns the sanitized `(category_relative_filename)` on success — the
/// caller is responsible for joining it under an already-allowlisted
/// category directory.
pub fn sanitize_filename(raw: &str) -> Result<String, SanitizeError> {
    if raw.is_empty() {
        return Err(SanitizeError::Empty);
    }
    let normalized = raw.replace('\\', "/");
    if normalized.split('/').any(|segment| segment == "..") {
        return Err(SanitizeError::ParentTraversal);
    }
    if normalized.len() > MAX_FILENAME_LEN {
        return Err(SanitizeError::TooLong);
    }
    let cleaned: String = normalized
        .chars()
        .map(|c| if is_filesystem_safe(c) { c } else { 'X' })
        .collect();
    Ok(cleaned)
}

fn is_filesystem_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/')
}

/// Split a `<category>/<filename>` upload path into its two parts.
pub fn split_category_path(raw: &str) -> Option<(&str, &str)> {
    raw.split_once('/')
}
