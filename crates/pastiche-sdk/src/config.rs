// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Loading [`PipelineConfig`] from disk.

use anyhow::{bail, Context, Result};
use pastiche_core::PipelineConfig;
use std::path::Path;

/// File formats a configuration can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// Rusty Object Notation.
    Ron,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ron") => Ok(Self::Ron),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => bail!(
                "cannot tell the format of '{}': expected a .ron or .json file",
                path.display()
            ),
        }
    }
}

/// Parses a configuration. Missing fields take their default values.
pub fn parse_config(text: &str, format: ConfigFormat) -> Result<PipelineConfig> {
    let config = match format {
        ConfigFormat::Ron => ron::from_str(text).context("invalid RON pipeline configuration")?,
        ConfigFormat::Json => {
            serde_json::from_str(text).context("invalid JSON pipeline configuration")?
        }
    };
    Ok(config)
}

/// Reads a `.ron` or `.json` configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let config = parse_config(&text, format)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;
    log::info!("Loaded pipeline configuration from '{}'", path.display());
    Ok(config)
}

/// Writes a configuration, in the format given by the file extension.
pub fn save_config(config: &PipelineConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = match ConfigFormat::from_path(path)? {
        ConfigFormat::Ron => ron::ser::to_string_pretty(config, ron::ser::PrettyConfig::default())
            .context("failed to serialize configuration")?,
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).context("failed to serialize configuration")?
        }
    };
    std::fs::write(path, text).with_context(|| format!("failed to write '{}'", path.display()))
}
