//! Machine and backup name handling

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static SAFE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("safe name regex is valid"));
static UNSAFE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_-]+").expect("unsafe run regex is valid"));

/// Prefixes under the base that hold the continuous session mirrors
pub const RESERVED_MACHINE_NAMES: &[&str] = &["claude-code", "opencode"];

/// Validate that a name is non-empty and only contains `[A-Za-z0-9_-]`
///
/// `field` is used in the error message, e.g. "machine name".
pub fn validate_safe_name<'a>(name: &'a str, field: &str) -> Result<&'a str> {
    if name.trim().is_empty() {
        return Err(Error::invalid_name(field, "cannot be empty"));
    }
    if !SAFE_NAME.is_match(name) {
        return Err(Error::invalid_name(
            field,
            format!(
                "must contain only alphanumeric characters, hyphens, and underscores: {}",
                name
            ),
        ));
    }
    Ok(name)
}

/// Validate a machine name, additionally rejecting the mirror prefixes
pub fn validate_machine_name(name: &str) -> Result<&str> {
    validate_safe_name(name, "machine name")?;
    if RESERVED_MACHINE_NAMES.contains(&name) {
        return Err(Error::invalid_name(
            "machine name",
            format!("'{}' is reserved for session mirrors", name),
        ));
    }
    Ok(name)
}

/// Turn an arbitrary hostname into a safe machine name
///
/// Runs of invalid characters collapse to a single `-`, leading and trailing
/// hyphens are trimmed, and an empty result becomes `unknown`.
pub fn sanitize_machine_name(hostname: &str) -> String {
    let sanitized = UNSAFE_RUN.replace_all(hostname, "-");
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Raw hostname of this machine
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Machine identifier derived from the hostname
pub fn default_machine_name() -> String {
    sanitize_machine_name(&local_hostname())
}
