//! Material catalog boundary.
//!
//! Rooms only need to know how many pages their bound material has; the HTTP
//! API also lists materials so clients can pick one. The conversion pipeline
//! writes `manifest.json` into the materials directory and
//! [`ManifestCatalog`] reads it once at startup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClassroomError, Result};

/// A converted teaching material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub total_pages: u32,
}

impl Material {
    pub fn new(id: impl Into<String>, total_pages: u32) -> Self {
        Self {
            id: id.into(),
            title: None,
            category: None,
            total_pages,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Read-only material lookup.
pub trait MaterialCatalog: Send + Sync {
    fn material(&self, material_id: &str) -> Option<Material>;

    /// Every material, in catalog order.
    fn materials(&self) -> Vec<Material>;

    fn total_pages(&self, material_id: &str) -> Option<u32> {
        self.material(material_id).map(|material| material.total_pages)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    materials: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    category: Option<String>,
    total_pages: u32,
}

/// Catalog backed by `<materials_dir>/manifest.json`. Keeps manifest order.
#[derive(Debug, Default)]
pub struct ManifestCatalog {
    materials: Vec<Material>,
    index: HashMap<String, usize>,
}

impl ManifestCatalog {
    /// Load the manifest. A missing file yields an empty catalog, matching a
    /// fresh install where no material has been converted yet.
    pub fn load(materials_dir: &Path) -> Result<Self> {
        let path = materials_dir.join("manifest.json");
        if !path.exists() {
            tracing::warn!(path = %path.display(), "No material manifest found, catalog is empty");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let catalog = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            materials = catalog.len(),
            "Loaded material catalog"
        );
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)
            .map_err(|e| ClassroomError::CatalogLoadFailed(e.to_string()))?;

        let mut catalog = Self::default();
        for entry in manifest.materials {
            if entry.total_pages == 0 {
                tracing::warn!(material_id = %entry.id, title = ?entry.title, "Skipping material with no pages");
                continue;
            }
            if catalog.index.contains_key(&entry.id) {
                tracing::warn!(material_id = %entry.id, "Duplicate material in manifest, keeping the first");
                continue;
            }
            catalog.index.insert(entry.id.clone(), catalog.materials.len());
            catalog.materials.push(Material {
                id: entry.id,
                title: entry.title,
                category: entry.category,
                total_pages: entry.total_pages,
            });
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

impl MaterialCatalog for ManifestCatalog {
    fn material(&self, material_id: &str) -> Option<Material> {
        self.index
            .get(material_id)
            .and_then(|&i| self.materials.get(i))
            .cloned()
    }

    fn materials(&self) -> Vec<Material> {
        self.materials.clone()
    }
}

/// In-memory catalog ordered by id, handy for tests and demos.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    materials: BTreeMap<String, Material>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_material(self, material_id: impl Into<String>, total_pages: u32) -> Self {
        self.with(Material::new(material_id, total_pages))
    }

    pub fn with(mut self, material: Material) -> Self {
        self.materials.insert(material.id.clone(), material);
        self
    }
}

impl MaterialCatalog for StaticCatalog {
    fn material(&self, material_id: &str) -> Option<Material> {
        self.materials.get(material_id).cloned()
    }

    fn materials(&self) -> Vec<Material> {
        self.materials.values().cloned().collect()
    }
}
