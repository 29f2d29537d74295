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

//! A RON file listing the style models a host offers.

use anyhow::{bail, Context, Result};
use pastiche_core::inference::{ModelDescriptor, ModelId, ModelProvider, ModelSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Descriptors addressable by id.
///
/// ```ron
/// (
///     models: [
///         (id: "mosaic", source: File("mosaic.onnx"), runtime: Some("onnx")),
///         (id: "identity", source: Pointwise(width: 256, height: 256,
///             weights: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], bias: [0.0, 0.0, 0.0])),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `descriptor`, replacing any entry with the same id.
    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.retain(|existing| existing.id != descriptor.id);
        self.models.push(descriptor);
        self
    }

    /// Parses a catalog. Ids must be unique.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let catalog: Self = ron::from_str(text).context("invalid model catalog")?;
        let mut seen = BTreeSet::new();
        for descriptor in &catalog.models {
            if !seen.insert(&descriptor.id) {
                bail!("model '{}' is listed twice", descriptor.id);
            }
        }
        Ok(catalog)
    }

    /// Reads a catalog file. Relative model paths are resolved against the
    /// catalog's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model catalog '{}'", path.display()))?;
        let mut catalog = Self::from_ron_str(&text)
            .with_context(|| format!("failed to parse model catalog '{}'", path.display()))?;
        if let Some(base) = path.parent() {
            for descriptor in &mut catalog.models {
                if let ModelSource::File(file) = &mut descriptor.source {
                    if file.is_relative() {
                        *file = base.join(&*file);
                    }
                }
            }
        }
        log::info!(
            "Loaded {} model(s) from '{}'",
            catalog.models.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Ids of every model, in file order.
    pub fn ids(&self) -> impl Iterator<Item = &ModelId> {
        self.models.iter().map(|descriptor| &descriptor.id)
    }

    /// The descriptor of `id`.
    pub fn get(&self, id: &ModelId) -> Option<&ModelDescriptor> {
        self.models.iter().find(|descriptor| &descriptor.id == id)
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog lists no model.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelProvider for ModelCatalog {
    fn resolve(&self, id: &ModelId) -> Option<ModelDescriptor> {
        self.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastiche_core::tensor::PixelRange;

    const CATALOG: &str = r#"(
        models: [
            (id: "mosaic", source: File("styles/mosaic.onnx"), runtime: Some("onnx")),
            (
                id: "identity",
                source: Pointwise(width: 4, height: 4, weights: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0], bias: [0.0, 0.0, 0.0]),
                output_range: Unit,
            ),
        ],
    )"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = ModelCatalog::from_ron_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        let identity = catalog.resolve(&ModelId::new("identity")).unwrap();
        assert_eq!(identity.output_range, PixelRange::Unit);
        assert!(catalog.resolve(&ModelId::new("missing")).is_none());
    }

    #[test]
    fn test_relative_paths_follow_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        std::fs::write(&path, CATALOG).unwrap();
        let catalog = ModelCatalog::load(&path).unwrap();
        let mosaic = catalog.get(&ModelId::new("mosaic")).unwrap();
        assert_eq!(
            mosaic.file_path().unwrap(),
            &dir.path().join("styles/mosaic.onnx")
        );
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let text = r#"(models: [
            (id: "a", source: File("a.onnx")),
            (id: "a", source: File("b.onnx")),
        ])"#;
        let err = ModelCatalog::from_ron_str(text).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_with_model_replaces() {
        let catalog = ModelCatalog::new()
            .with_model(ModelDescriptor::identity("a", 4, 4))
            .with_model(ModelDescriptor::identity("a", 8, 8));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.ids().count(), 1);
    }
}
