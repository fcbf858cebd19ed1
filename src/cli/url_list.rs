use std::path::Path;

use tracing::warn;
use url::Url;

use crate::error::{ExplorerError, Result};

/// Normalize one line of a URL list. Blank lines and `#` comments yield
/// `None`; entries without an http(s) scheme get `http://` prefixed.
pub fn normalize_url(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    match Url::parse(&candidate) {
        Ok(_) => Some(candidate),
        Err(e) => {
            warn!(entry = trimmed, error = %e, "skipping invalid URL");
            None
        }
    }
}

pub fn parse_url_list(content: &str) -> Vec<String> {
    content.lines().filter_map(normalize_url).collect()
}

pub fn load_url_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ExplorerError::io(format!("reading URL list {}", path.display()), e))?;
    Ok(parse_url_list(&content))
}
