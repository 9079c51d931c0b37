//! Store configuration: supported types, capacity limits and sweep timing.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL used for `Location` headers and bundle links.
    pub base_url: String,
    /// Resource types this store serves. The type registry is built once
    /// from this list at startup; requests for anything else fail fast.
    pub supported_types: Vec<String>,
    /// Per-type resource ceiling enforced by the background sweep.
    pub max_resources_per_type: Option<usize>,
    /// `Type/id` references exempt from deletion and eviction.
    pub protected_ids: Vec<String>,
    /// Background sweep cadence in seconds.
    pub sweep_interval_secs: u64,
    /// Cap on buffered notification events per subscription; older events
    /// are pruned by the sweep.
    pub max_buffered_events: Option<usize>,
    /// FHIR version label advertised in the capability document.
    pub fhir_version: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            supported_types: vec![
                "Patient".to_string(),
                "Encounter".to_string(),
                "Observation".to_string(),
                "SubscriptionTopic".to_string(),
                "Subscription".to_string(),
                "SearchParameter".to_string(),
            ],
            max_resources_per_type: None,
            protected_ids: Vec::new(),
            sweep_interval_secs: 30,
            max_buffered_events: Some(1000),
            fhir_version: "4.3.0".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn from_toml(content: &str) -> Result<Self, StoreError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.base_url.is_empty() {
            return Err(StoreError::configuration("base_url must not be empty"));
        }
        if self.supported_types.is_empty() {
            return Err(StoreError::configuration(
                "supported_types must name at least one resource type",
            ));
        }
        for name in &self.supported_types {
            if !lumen_core::is_valid_resource_type_name(name) {
                return Err(StoreError::configuration(format!(
                    "invalid resource type name: {name}"
                )));
            }
        }
        for id in &self.protected_ids {
            if !id.contains('/') {
                return Err(StoreError::configuration(format!(
                    "protected id must be Type/id, got {id}"
                )));
            }
        }
        Ok(())
    }

    pub fn is_protected(&self, resource_type: &str, id: &str) -> bool {
        let reference = format!("{resource_type}/{id}");
        self.protected_ids.iter().any(|p| p == &reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_defaults() {
        let config = StoreConfig::from_toml(
            r#"
            base_url = "http://fhir.example.org"
            supported_types = ["Patient", "Encounter"]
            max_resources_per_type = 100
            protected_ids = ["Patient/seed-1"]
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "http://fhir.example.org");
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.max_resources_per_type, Some(100));
        assert!(config.is_protected("Patient", "seed-1"));
        assert!(!config.is_protected("Patient", "p-2"));
    }

    #[test]
    fn rejects_bad_type_names_and_protected_ids() {
        assert!(StoreConfig::from_toml(r#"supported_types = ["patient"]"#).is_err());
        assert!(StoreConfig::from_toml(r#"protected_ids = ["no-slash"]"#).is_err());
    }
}
