//! Asset universe for batch backtesting.
//!
//! Parses the configured asset list. Each entry is `ID` or `ID:Display Name`.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    pub asset_id: String,
    pub display_name: String,
}

impl AssetSpec {
    pub fn new(asset_id: &str, display_name: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            display_name: display_name.to_string(),
        }
    }

    pub fn artifact_stem(&self) -> String {
        artifact_stem(&self.asset_id)
    }
}

/// File-name-safe form of an asset id, used to qualify per-asset artifacts.
///
/// ASCII letters, digits and `-` pass through. Every other byte, `_` included,
/// becomes `_XX` (uppercase hex), so distinct ids never share a stem and the
/// result stays a single path component.
pub fn artifact_stem(asset_id: &str) -> String {
    let mut stem = String::with_capacity(asset_id.len());
    for b in asset_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("_{b:02X}"));
        }
    }
    stem
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in asset list")]
    EmptyToken,

    #[error("duplicate asset: {0}")]
    DuplicateAsset(String),
}

pub fn parse_assets(input: &str) -> Result<Vec<AssetSpec>, UniverseError> {
    let mut assets = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }

        let (id, name) = match trimmed.split_once(':') {
            Some((id, name)) => (id.trim(), name.trim()),
            None => (trimmed, ""),
        };
        if id.is_empty() {
            return Err(UniverseError::EmptyToken);
        }

        let asset_id = id.to_uppercase();
        if !seen.insert(asset_id.clone()) {
            return Err(UniverseError::DuplicateAsset(asset_id));
        }
        let display_name = if name.is_empty() { asset_id.clone() } else { name.to_string() };

        assets.push(AssetSpec {
            asset_id,
            display_name,
        });
    }

    Ok(assets)
}
