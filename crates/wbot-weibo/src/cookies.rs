//! Credential (cookie) file handling.
//!
//! The file is a flat JSON object of cookie name → value, rewritten in
//! sorted key order whenever the token set refreshes so successive writes
//! diff cleanly.

use std::collections::BTreeMap;
use std::path::Path;

use wbot_core::{config::CredentialSource, Result};

/// Load the stored cookie set. A missing file is not an error: it simply
/// means the interactive login will have to run.
pub fn load(source: &CredentialSource) -> Result<BTreeMap<String, String>> {
    match source {
        CredentialSource::Inline(json) => Ok(serde_json::from_str(json)?),
        CredentialSource::File(path) => {
            if !path.exists() {
                tracing::info!(path = %path.display(), "no credential file yet");
                return Ok(BTreeMap::new());
            }
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
    }
}

/// Rewrite the credential file. `BTreeMap` keeps the key order stable.
pub fn save(path: &Path, cookies: &BTreeMap<String, String>) -> Result<()> {
    let body = serde_json::to_string_pretty(cookies)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// Split a `Cookie:` header value ("a=1; b=2") into a sorted map.
pub fn from_header_value(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}
