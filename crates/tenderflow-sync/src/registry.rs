use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tenderflow_core::{CoreError, PlatformProfile};

const EMBEDDED_PLATFORMS: &str = include_str!("../../../platforms.yaml");

#[derive(Debug, Clone, Deserialize)]
struct PlatformsFile {
    platforms: Vec<PlatformProfile>,
}

/// Read-only catalog of platform profiles, fixed at startup.
#[derive(Debug, Clone)]
pub struct PlatformRegistry {
    platforms: Vec<PlatformProfile>,
}

impl PlatformRegistry {
    pub fn new(platforms: Vec<PlatformProfile>) -> Result<Self> {
        let mut seen = HashSet::new();
        for platform in &platforms {
            if platform.id.trim().is_empty() {
                bail!("platform with empty id ({})", platform.name);
            }
            if !seen.insert(platform.id.as_str()) {
                bail!("duplicate platform id {}", platform.id);
            }
        }
        Ok(Self { platforms })
    }

    pub fn embedded() -> Result<Self> {
        Self::from_yaml_str(EMBEDDED_PLATFORMS).context("parsing embedded platforms.yaml")
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let file: PlatformsFile = serde_yaml::from_str(text)?;
        Self::new(file.platforms)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn get_all(&self) -> &[PlatformProfile] {
        &self.platforms
    }

    pub fn get_by_id(&self, id: &str) -> Result<&PlatformProfile, CoreError> {
        self.platforms
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::UnknownPlatform(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderflow_core::ItSpecificity;

    #[test]
    fn embedded_catalog_loads() {
        let registry = PlatformRegistry::embedded().unwrap();
        assert_eq!(registry.len(), 11);

        let ted = registry.get_by_id("ted-europa").unwrap();
        assert_eq!(ted.url, "https://ted.europa.eu");
        assert_eq!(ted.it_specific, ItSpecificity::Partial);
        assert_eq!(ted.scraper_config.rate_limit_ms, 2000);
        assert_eq!(
            ted.scraper_config.selectors.get("title").map(String::as_str),
            Some(".notice-title")
        );

        let evergabe = registry.get_by_id("evergabe-online").unwrap();
        assert_eq!(evergabe.scraper_config.max_retries, 5);
        assert!(evergabe.scraper_config.auth_required);

        let tendara = registry.get_by_id("tendara-ai").unwrap();
        assert!(tendara.scraper_config.ai_enhanced);
    }

    #[test]
    fn unknown_platform_is_an_error() {
        let registry = PlatformRegistry::embedded().unwrap();
        assert_eq!(
            registry.get_by_id("nope").unwrap_err(),
            CoreError::UnknownPlatform("nope".into())
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = PlatformRegistry::embedded().unwrap();
        let mut platforms = registry.get_all().to_vec();
        platforms.push(platforms[0].clone());
        let err = PlatformRegistry::new(platforms).unwrap_err();
        assert!(err.to_string().contains("duplicate platform id ted-europa"));
    }

    #[test]
    fn blank_ids_are_rejected() {
        let registry = PlatformRegistry::embedded().unwrap();
        let mut platforms = registry.get_all().to_vec();
        platforms[3].id = "  ".into();
        let err = PlatformRegistry::new(platforms).unwrap_err();
        assert!(err.to_string().contains("platform with empty id"));
    }
}
