//! Command-line argument checks, shaped as clap `value_parser`s.

use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const MAX_APP_NAME_LEN: usize = 63;
pub const TARGET_ENVS: [&str; 2] = ["prod", "staging"];

#[allow(clippy::unwrap_used)]
static APP_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]+$").unwrap());

#[allow(clippy::unwrap_used)]
static APP_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^v?\d+\.\d+\.\d+$").unwrap());

/// Lowercase DNS-style name; it ends up inside release and Deployment names
pub fn parse_app_name(value: &str) -> Result<String, String> {
    if value.len() > MAX_APP_NAME_LEN {
        return Err(format!(
            "app name must be shorter than {} characters",
            MAX_APP_NAME_LEN + 1
        ));
    }
    if !APP_NAME.is_match(value) {
        return Err(
            "app name must start with a lowercase letter and contain only a-z, 0-9 and '-'"
                .to_string(),
        );
    }
    Ok(value.to_string())
}

/// Semantic version, optionally prefixed with `v`
pub fn parse_app_version(value: &str) -> Result<String, String> {
    if !APP_VERSION.is_match(value) {
        return Err(format!("{value:?} is not a version like 1.2.3 or v1.2.3"));
    }
    Ok(value.to_string())
}

pub fn parse_target_env(value: &str) -> Result<String, String> {
    if !TARGET_ENVS.contains(&value) {
        return Err(format!("target env must be one of {}", TARGET_ENVS.join(", ")));
    }
    Ok(value.to_string())
}

/// Existing directory, with any trailing `/` dropped
pub fn parse_chart_dir(value: &str) -> Result<PathBuf, String> {
    let trimmed = value.trim_end_matches('/');
    let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
    let path = PathBuf::from(trimmed);
    if !path.is_dir() {
        return Err(format!("chart dir {trimmed} is not a directory"));
    }
    Ok(path)
}
