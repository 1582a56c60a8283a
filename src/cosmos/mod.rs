//! Read-back access to the CosmosDB collection the binding writes to.

pub mod client;
pub mod settings;

pub use client::{account_from_url, CosmosStore};
pub use settings::CosmosSettings;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::document::Document;

#[derive(Debug, Error)]
pub enum CosmosError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    MissingSettings(Vec<String>),

    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    #[error("Invalid account URL: {0}")]
    InvalidUrl(String),

    #[error("CosmosDB request failed: {0}")]
    Sdk(#[from] azure_core::Error),

    /// The store refused a request without a transport or SDK error.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// The collection operations verification needs.
pub trait DocumentStore: Send + Sync {
    /// `database/collection`, for log and error messages.
    fn location(&self) -> String;

    /// Every document whose `id` equals `id`, across all partitions.
    fn query_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<Document>, CosmosError>>;

    fn delete<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a Value,
    ) -> BoxFuture<'a, Result<(), CosmosError>>;
}
