use std::fmt;

use super::CosmosError;

// Same variables the component manifests resolve through the env secret store
pub const ENV_MASTER_KEY: &str = "AzureCosmosDBMasterKey";
pub const ENV_URL: &str = "AzureCosmosDBUrl";
pub const ENV_DATABASE: &str = "AzureCosmosDB";
pub const ENV_COLLECTION: &str = "AzureCosmosDBCollection";

/// Account coordinates for direct verification queries.
#[derive(Clone)]
pub struct CosmosSettings {
    pub url: String,
    pub master_key: String,
    pub database: String,
    pub collection: String,
}

impl CosmosSettings {
    pub fn from_env() -> Result<Self, CosmosError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reports every missing or empty variable at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CosmosError> {
        let mut missing = Vec::new();
        let mut read = |key: &str| match lookup(key).filter(|value| !value.trim().is_empty()) {
            Some(value) => value,
            None => {
                missing.push(key.to_string());
                String::new()
            }
        };

        let settings = Self {
            url: read(ENV_URL),
            master_key: read(ENV_MASTER_KEY),
            database: read(ENV_DATABASE),
            collection: read(ENV_COLLECTION),
        };

        if missing.is_empty() {
            Ok(settings)
        } else {
            Err(CosmosError::MissingSettings(missing))
        }
    }
}

impl fmt::Debug for CosmosSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosSettings")
            .field("url", &self.url)
            .field("master_key", &"<redacted>")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_reads_all_variables() {
        let settings = CosmosSettings::from_lookup(lookup_from(&[
            (ENV_URL, "https://cert.documents.azure.com:443/"),
            (ENV_MASTER_KEY, "a2V5"),
            (ENV_DATABASE, "certdb"),
            (ENV_COLLECTION, "orders"),
        ]))
        .unwrap();

        assert_eq!(settings.database, "certdb");
        assert_eq!(settings.collection, "orders");
    }

    #[test]
    fn test_reports_every_missing_variable() {
        let err = CosmosSettings::from_lookup(lookup_from(&[
            (ENV_URL, "https://cert.documents.azure.com:443/"),
            (ENV_DATABASE, "  "),
        ]))
        .unwrap_err();

        match err {
            CosmosError::MissingSettings(missing) => {
                assert_eq!(missing, vec![ENV_MASTER_KEY, ENV_DATABASE, ENV_COLLECTION]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_debug_redacts_master_key() {
        let settings = CosmosSettings {
            url: "https://x".to_string(),
            master_key: "c2VjcmV0".to_string(),
            database: "db".to_string(),
            collection: "c".to_string(),
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
    }
}
