//! In-process stand-ins for a sidecar running the CosmosDB output binding and
//! for the collection behind it.
//!
//! The fake sidecar serves the `InvokeBinding` gRPC call on the pair's gRPC
//! port and applies the same document checks the binding and CosmosDB apply,
//! returning their error messages. Accepted documents land in a [`FakeStore`],
//! which verification can read back and delete from.

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tonic::transport::server::TcpIncoming;
use tonic::{Request, Response, Status};

use crate::cosmos::{CosmosError, DocumentStore};
use crate::document::{Document, FIELD_PARTITION_KEY};
use crate::flow::{FlowSidecar, Step};
use crate::ports::PortPair;
use crate::proto::dapr::dapr_server::{Dapr, DaprServer};
use crate::proto::dapr::{InvokeBindingRequest, InvokeBindingResponse};
use crate::{
    BINDING_NAME, ERR_MISSING_ID, ERR_MISSING_PARTITION_KEY, ERR_PARTITION_KEY_MISMATCH,
    OPERATION_CREATE,
};

/// In-memory collection partitioned on `/partitionKey`.
#[derive(Clone, Default)]
pub struct FakeStore {
    documents: Arc<Mutex<HashMap<String, Document>>>,
    deletes: Arc<Mutex<Vec<(String, Value)>>>,
    // Acknowledge deletes without removing anything
    ignore_deletes: bool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring_deletes() -> Self {
        Self {
            ignore_deletes: true,
            ..Self::default()
        }
    }

    pub async fn insert(&self, document: Document) {
        if let Some(id) = document.id().map(str::to_string) {
            self.documents.lock().await.insert(id, document);
        }
    }

    pub async fn get(&self, id: &str) -> Option<Document> {
        self.documents.lock().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.lock().await.is_empty()
    }

    /// `(id, partition key)` of every accepted delete, in order.
    pub async fn deletes(&self) -> Vec<(String, Value)> {
        self.deletes.lock().await.clone()
    }
}

impl DocumentStore for FakeStore {
    fn location(&self) -> String {
        "fakedb/orders".to_string()
    }

    fn query_by_id<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Vec<Document>, CosmosError>> {
        Box::pin(async move { Ok(self.get(id).await.into_iter().collect()) })
    }

    fn delete<'a>(
        &'a self,
        id: &'a str,
        partition_key: &'a Value,
    ) -> BoxFuture<'a, Result<(), CosmosError>> {
        Box::pin(async move {
            let mut documents = self.documents.lock().await;
            let stored_key = match documents.get(id) {
                Some(document) => document.get(FIELD_PARTITION_KEY).cloned(),
                None => {
                    return Err(CosmosError::Rejected(format!(
                        "Entity with the specified id {id} does not exist"
                    )))
                }
            };
            if stored_key.as_ref() != Some(partition_key) {
                return Err(CosmosError::Rejected(format!(
                    "Entity {id} does not exist in partition {partition_key}"
                )));
            }

            self.deletes
                .lock()
                .await
                .push((id.to_string(), partition_key.clone()));
            if !self.ignore_deletes {
                documents.remove(id);
            }
            Ok(())
        })
    }
}

struct FakeBinding {
    // Document field the component reads the partition key from
    partition_key_field: String,
    store: FakeStore,
}

impl FakeBinding {
    fn binding_error(message: &str) -> Status {
        Status::internal(format!(
            "error invoking output binding {BINDING_NAME}: {message}"
        ))
    }
}

#[tonic::async_trait]
impl Dapr for FakeBinding {
    async fn invoke_binding(
        &self,
        request: Request<InvokeBindingRequest>,
    ) -> Result<Response<InvokeBindingResponse>, Status> {
        let req = request.into_inner();

        if req.name != BINDING_NAME {
            return Err(Status::invalid_argument(format!(
                "couldn't find output binding {}",
                req.name
            )));
        }
        if req.operation != OPERATION_CREATE {
            return Err(Self::binding_error(&format!(
                "binding does not support operation {}",
                req.operation
            )));
        }

        let value: serde_json::Value = serde_json::from_slice(&req.data)
            .map_err(|e| Self::binding_error(&format!("invalid document: {e}")))?;
        let document =
            Document::try_from(value).map_err(|e| Self::binding_error(&e.to_string()))?;

        let header_key = document
            .get(&self.partition_key_field)
            .cloned()
            .ok_or_else(|| Self::binding_error(ERR_MISSING_PARTITION_KEY))?;

        if document.id().is_none() {
            return Err(Self::binding_error(&format!(
                "Message: {{\"Errors\":[\"One of the specified inputs is invalid\",\"{ERR_MISSING_ID}\"]}}"
            )));
        }

        // The container is partitioned on /partitionKey
        if document.get(FIELD_PARTITION_KEY) != Some(&header_key) {
            return Err(Self::binding_error(&format!(
                "Message: {{\"Errors\":[\"{ERR_PARTITION_KEY_MISMATCH}\"]}}"
            )));
        }

        self.store.insert(document).await;
        Ok(Response::new(InvokeBindingResponse::default()))
    }
}

pub struct FakeSidecar {
    ports: PortPair,
    store: FakeStore,
    shutdown_tx: watch::Sender<bool>,
    server_handle: tokio::task::JoinHandle<()>,
}

impl FakeSidecar {
    pub async fn start(ports: PortPair, partition_key_field: &str) -> Result<Self> {
        Self::start_with_store(ports, partition_key_field, FakeStore::new()).await
    }

    /// Starts a sidecar that writes accepted documents into `store`.
    pub async fn start_with_store(
        ports: PortPair,
        partition_key_field: &str,
        store: FakeStore,
    ) -> Result<Self> {
        let binding = FakeBinding {
            partition_key_field: partition_key_field.to_string(),
            store: store.clone(),
        };

        let addr = format!("127.0.0.1:{}", ports.grpc).parse()?;
        // Bound before returning, so callers can connect right away
        let incoming = TcpIncoming::new(addr, true, None)
            .map_err(|e| anyhow!("Fake sidecar could not bind port {}: {e}", ports.grpc))?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let server_handle = tokio::spawn(async move {
            let shutdown = async move {
                shutdown_rx.changed().await.ok();
            };
            if let Err(e) = tonic::transport::Server::builder()
                .add_service(DaprServer::new(binding))
                .serve_with_incoming_shutdown(incoming, shutdown)
                .await
            {
                log::error!("Fake sidecar server error: {e}");
            }
        });

        Ok(Self {
            ports,
            store,
            shutdown_tx,
            server_handle,
        })
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub async fn stored(&self, id: &str) -> Option<Document> {
        self.store.get(id).await
    }

    pub async fn stored_count(&self) -> usize {
        self.store.len().await
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server_handle).await;
    }
}

impl FlowSidecar for FakeSidecar {
    fn ports(&self) -> PortPair {
        self.ports
    }

    fn shutdown(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.stop().await;
            Ok(())
        })
    }
}

/// Setup step that starts a fake sidecar and hands it to the flow under `name`.
pub fn run_fake(name: &str, ports: PortPair, partition_key_field: &str) -> Step {
    run_fake_with_store(name, ports, partition_key_field, FakeStore::new())
}

pub fn run_fake_with_store(
    name: &str,
    ports: PortPair,
    partition_key_field: &str,
    store: FakeStore,
) -> Step {
    let sidecar_name = name.to_string();
    let partition_key_field = partition_key_field.to_string();
    Step::new(name, move |ctx| async move {
        let sidecar = FakeSidecar::start_with_store(ports, &partition_key_field, store).await?;
        ctx.register_sidecar(&sidecar_name, Box::new(sidecar)).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PARTITION_KEY_VALUE;
    use crate::ports::PortAllocator;
    use serde_json::json;

    #[test]
    fn test_binding_error_mentions_binding() {
        let status = FakeBinding::binding_error(ERR_MISSING_PARTITION_KEY);
        assert!(status.message().contains(BINDING_NAME));
        assert!(status.message().ends_with(ERR_MISSING_PARTITION_KEY));
    }

    #[tokio::test]
    async fn test_start_fails_when_port_is_taken() {
        let mut allocator = PortAllocator::new();
        let ports = allocator.allocate_pair().unwrap();
        let _holder = std::net::TcpListener::bind(("127.0.0.1", ports.grpc)).unwrap();

        let err = match FakeSidecar::start(ports, FIELD_PARTITION_KEY).await {
            Ok(_) => panic!("fake sidecar should not start on a taken port"),
            Err(e) => e,
        };
        assert!(err.to_string().contains(&ports.grpc.to_string()));
    }

    #[tokio::test]
    async fn test_store_delete_requires_matching_partition_key() {
        let store = FakeStore::new();
        let document = Document::certification(true, true);
        let id = document.id().unwrap().to_string();
        store.insert(document).await;

        let wrong = store.delete(&id, &json!("other")).await;
        assert!(matches!(wrong, Err(CosmosError::Rejected(_))));
        assert_eq!(store.len().await, 1);

        store.delete(&id, &json!(PARTITION_KEY_VALUE)).await.unwrap();
        assert!(store.query_by_id(&id).await.unwrap().is_empty());
        assert_eq!(store.deletes().await, vec![(id, json!(PARTITION_KEY_VALUE))]);
    }
}
