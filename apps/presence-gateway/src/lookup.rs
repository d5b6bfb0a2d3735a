use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

pub const INVALID_TAG: &str = "Invalid tag";

const SAMPLE_CATALOG: &[(&str, &str)] = &[
    ("90127838712", "Nike Air Max 90"),
    ("76834512904", "Adidas Ultraboost 22"),
    ("55201983746", "Puma Suede Classic"),
    ("83467021955", "New Balance 990v6"),
    ("19628403751", "Converse Chuck 70"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub authorized: bool,
    pub description: Option<String>,
}

impl Enrichment {
    pub fn authorized(description: impl Into<String>) -> Self {
        Self {
            authorized: true,
            description: Some(description.into()),
        }
    }

    pub fn invalid() -> Self {
        Self {
            authorized: false,
            description: Some(INVALID_TAG.to_string()),
        }
    }
}

/// Resolves metadata for a tag id.
///
/// Must be total over non-empty ids: an unknown tag is `Ok` with `authorized = false`, and `Err`
/// is reserved for the lookup service itself failing.
#[async_trait]
pub trait EnrichmentLookup: Send + Sync {
    async fn lookup(&self, tag_id: &str) -> Result<Enrichment>;
}

/// Item-authentication lookup over an in-memory product catalog.
#[derive(Debug, Clone)]
pub struct CatalogLookup {
    catalog: HashMap<String, String>,
}

impl CatalogLookup {
    pub fn new(catalog: HashMap<String, String>) -> Self {
        Self { catalog }
    }

    pub fn sample() -> Self {
        Self::new(
            SAMPLE_CATALOG
                .iter()
                .map(|(id, info)| (id.to_string(), info.to_string()))
                .collect(),
        )
    }

    /// Loads a JSON object of `{"<tag id>": "<description>"}`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        let mut bytes = contents.into_bytes();
        let catalog: HashMap<String, String> = simd_json::serde::from_slice(&mut bytes)
            .with_context(|| format!("failed to parse catalog {}", path.display()))?;
        tracing::info!(path = %path.display(), entries = catalog.len(), "loaded tag catalog");
        Ok(Self::new(catalog))
    }

    pub fn resolve(&self, tag_id: &str) -> Enrichment {
        let key = tag_id.trim();
        if key.is_empty() {
            return Enrichment::invalid();
        }
        match self.catalog.get(key) {
            Some(info) => Enrichment::authorized(info.clone()),
            None => Enrichment::invalid(),
        }
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}

#[async_trait]
impl EnrichmentLookup for CatalogLookup {
    async fn lookup(&self, tag_id: &str) -> Result<Enrichment> {
        let enrichment = self.resolve(tag_id);
        tracing::debug!(tag_id, authorized = enrichment.authorized, "catalog lookup");
        Ok(enrichment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn known_tag_is_authorized() {
        let lookup = CatalogLookup::sample();
        let result = lookup.lookup("90127838712").await.unwrap();
        assert_eq!(result, Enrichment::authorized("Nike Air Max 90"));
    }

    #[tokio::test]
    async fn unknown_and_blank_tags_are_invalid_not_errors() {
        let lookup = CatalogLookup::sample();
        assert_eq!(lookup.lookup("nope").await.unwrap(), Enrichment::invalid());
        assert_eq!(lookup.lookup("   ").await.unwrap(), Enrichment::invalid());
    }

    #[test]
    fn whitespace_around_id_is_ignored() {
        let lookup = CatalogLookup::sample();
        assert!(lookup.resolve(" 19628403751 ").authorized);
    }

    #[test]
    fn loads_catalog_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"E200001": "Pallet 7", "E200002": "Pallet 8"}}"#).unwrap();

        let lookup = CatalogLookup::from_path(file.path()).unwrap();
        assert_eq!(lookup.len(), 2);
        assert_eq!(lookup.resolve("E200002"), Enrichment::authorized("Pallet 8"));
    }

    #[test]
    fn malformed_catalog_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2, 3]").unwrap();
        assert!(CatalogLookup::from_path(file.path()).is_err());
    }
}
