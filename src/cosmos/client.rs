use azure_data_cosmos::prelude::{
    AuthorizationToken, CollectionClient, CosmosClient, Param, Query,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use log::debug;
use reqwest::Url;
use serde_json::Value;

use super::{CosmosError, CosmosSettings, DocumentStore};
use crate::document::Document;

const QUERY_BY_ID: &str = "SELECT * FROM ROOT r WHERE r.id=@id";

/// Account name from an endpoint such as `https://certacct.documents.azure.com:443/`.
pub fn account_from_url(url: &str) -> Result<String, CosmosError> {
    let parsed = Url::parse(url.trim()).map_err(|e| CosmosError::InvalidUrl(format!("{url}: {e}")))?;
    parsed
        .host_str()
        .and_then(|host| host.split('.').next())
        .filter(|account| !account.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CosmosError::InvalidUrl(format!("{url}: no account host")))
}

/// The configured collection, reached through the Azure SDK with the master key.
pub struct CosmosStore {
    collection: CollectionClient,
    database: String,
    collection_name: String,
}

impl CosmosStore {
    pub fn from_settings(settings: &CosmosSettings) -> Result<Self, CosmosError> {
        let account = account_from_url(&settings.url)?;
        let token = AuthorizationToken::primary_key(settings.master_key.trim())
            .map_err(|e| CosmosError::InvalidKey(e.to_string()))?;

        let collection = CosmosClient::new(account.clone(), token)
            .database_client(settings.database.clone())
            .collection_client(settings.collection.clone());
        debug!(
            "CosmosDB store for account {account}: {}/{}",
            settings.database, settings.collection
        );

        Ok(Self {
            collection,
            database: settings.database.clone(),
            collection_name: settings.collection.clone(),
        })
    }

    async fn query(&self, id: &str) -> Result<Vec<Document>, CosmosError> {
        let query = Query::with_params(
            QUERY_BY_ID.to_string(),
            vec![Param::new("@id".to_string(), id)],
        );
        let mut pages = self
            .collection
            .query_documents(query)
            .query_cross_partition(true)
            .into_stream::<Document>();

        let mut documents = Vec::new();
        while let Some(page) = pages.next().await {
            documents.extend(page?.documents().cloned());
        }
        debug!("Query for {id} returned {} documents", documents.len());
        Ok(documents)
    }

    async fn remove(&self, id: &str, partition_key: &Value) -> Result<(), CosmosError> {
        self.collection
            .document_client(id.to_string(), partition_key)?
            .delete_document()
            .await?;
        debug!("Deleted document {id} from {}", self.location());
        Ok(())
    }
}

impl DocumentStore for CosmosStore {
    fn location(&self) -> String {
        format!("{}/{}", self.database, self.collection_name)
    }

    fn query_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<Document>, CosmosError>> {
        Box::pin(self.query(id))
    }

    fn delete<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a Value,
    ) -> BoxFuture<'a, Result<(), CosmosError>> {
        Box::pin(self.remove(id, partition_key))
    }
}
