use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use serde_json::Value;
use std::time::Duration;

use crate::cosmos::{CosmosSettings, CosmosStore, DocumentStore};
use crate::document::{
    Document, FIELD_ID, FIELD_NESTED, FIELD_ORDER_ID, FIELD_PARTITION_KEY, FIELD_SUBPROPERTY,
};

/// Fields that must read back exactly as written.
pub const VERIFIED_FIELDS: &[&[&str]] = &[
    &[FIELD_ID],
    &[FIELD_ORDER_ID],
    &[FIELD_PARTITION_KEY],
    &[FIELD_NESTED, FIELD_SUBPROPERTY],
];

/// Describes every verified field whose value differs between the two documents.
pub fn compare_fields(expected: &Document, actual: &Document) -> Vec<String> {
    VERIFIED_FIELDS
        .iter()
        .filter_map(|path| {
            let want = expected.get_path(path);
            let got = actual.get_path(path);
            (want != got).then(|| {
                format!(
                    "{}: expected {}, got {}",
                    path.join("."),
                    render(want),
                    render(got)
                )
            })
        })
        .collect()
}

fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "<missing>".to_string(), Value::to_string)
}

/// Reads documents back from the collection, independently of the sidecar.
pub struct Verifier {
    store: Box<dyn DocumentStore>,
    delay: Duration,
}

impl Verifier {
    pub fn new(store: impl DocumentStore + 'static, delay: Duration) -> Self {
        Self {
            store: Box::new(store),
            delay,
        }
    }

    /// Verifier over the collection named by the `AzureCosmosDB*` variables.
    pub fn from_env(delay: Duration) -> Result<Self> {
        let settings = CosmosSettings::from_env()?;
        let store = CosmosStore::from_settings(&settings)
            .context("Failed to create CosmosDB client")?;
        Ok(Self::new(store, delay))
    }

    /// Checks that `expected` was stored, deletes it and confirms it is gone.
    ///
    /// The record is deleted even when fields differ; the mismatch is
    /// reported after cleanup.
    pub async fn verify_and_cleanup(&self, expected: &Document) -> Result<()> {
        let id = expected
            .id()
            .ok_or_else(|| anyhow!("Expected document has no id to query by"))?;
        let location = self.store.location();

        // CosmosDB rate limits metadata requests made right after the binding initialized
        if !self.delay.is_zero() {
            info!("Waiting {:?} before querying CosmosDB", self.delay);
            tokio::time::sleep(self.delay).await;
        }

        let items = self
            .store
            .query_by_id(id)
            .await
            .with_context(|| format!("Failed to query document {id}"))?;
        let Some(actual) = items.into_iter().next() else {
            bail!("Document {id} was not found in {location}");
        };

        let mismatches = compare_fields(expected, &actual);

        let partition_key = actual
            .get(FIELD_PARTITION_KEY)
            .cloned()
            .ok_or_else(|| anyhow!("Stored document {id} has no {FIELD_PARTITION_KEY}"))?;
        self.store
            .delete(id, &partition_key)
            .await
            .with_context(|| format!("Failed to delete document {id}"))?;

        let residue = self
            .store
            .query_by_id(id)
            .await
            .with_context(|| format!("Failed to re-query document {id} after delete"))?;
        if !residue.is_empty() {
            bail!("Document {id} is still present in {location} after cleanup");
        }
        info!("Document {id} verified and removed from {location}");

        if !mismatches.is_empty() {
            warn!("Document {id} differs from what was written");
            bail!(
                "Document {id} differs from what was written: {}",
                mismatches.join("; ")
            );
        }
        Ok(())
    }
}
