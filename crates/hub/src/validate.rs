//! Input validation for anything that ends up in a blob path.
//!
//! Runs before any path is derived from caller or remote supplied strings.

use crate::error::{ErrorKind, Result};
use modelhub_storage::is_canonical_path;
use regex::Regex;
use std::sync::LazyLock;

static OWNER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(-[A-Za-z0-9]+)*$").unwrap());
static NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());
static REVISION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.-]*$").unwrap());

/// Validate `owner/name` (or a bare `name`).
pub fn check_model(model: &str) -> Result<()> {
    let valid = match model.split_once('/') {
        Some((owner, name)) => OWNER.is_match(owner) && is_name(name),
        None => is_name(model),
    };
    if !valid {
        exn::bail!(ErrorKind::InvalidInput("model"));
    }
    Ok(())
}

fn is_name(name: &str) -> bool {
    NAME.is_match(name) && !name.contains("..")
}

pub fn check_revision(revision: &str) -> Result<()> {
    if !REVISION.is_match(revision) || revision.contains("..") {
        exn::bail!(ErrorKind::InvalidInput("revision"));
    }
    Ok(())
}

/// The file must match the configured pattern and already be a canonical
/// relative path, so nothing is normalized away after validation.
pub fn check_file(file: &str, pattern: &Regex) -> Result<()> {
    if !pattern.is_match(file) || !is_canonical_path(file) {
        exn::bail!(ErrorKind::InvalidInput("file"));
    }
    Ok(())
}

/// Validate a `(model, revision, file)` triple.
pub fn check_input(model: &str, revision: &str, file: &str, file_pattern: &Regex) -> Result<()> {
    check_model(model)?;
    check_revision(revision)?;
    check_file(file, file_pattern)
}
