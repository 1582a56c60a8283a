use anyhow::bail;
use log::{debug, info};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};

use crate::document::Document;
use crate::proto::dapr::dapr_client::DaprClient;
use crate::proto::dapr::InvokeBindingRequest;
use crate::OPERATION_CREATE;

const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Connection error: {0}")]
    Connection(#[from] tonic::transport::Error),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sidecar or the binding rejected the call; displays the remote message verbatim.
    #[error("{}", .0.message())]
    Remote(tonic::Status),
}

impl From<tonic::Status> for InvokeError {
    fn from(status: tonic::Status) -> Self {
        Self::Remote(status)
    }
}

impl InvokeError {
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote(status) => Some(status.message()),
            _ => None,
        }
    }
}

/// gRPC client for output binding invocations on one sidecar.
#[derive(Debug, Clone)]
pub struct BindingInvoker {
    client: DaprClient<Channel>,
    binding_name: String,
}

impl BindingInvoker {
    pub async fn connect(grpc_port: u16, binding_name: &str) -> Result<Self, InvokeError> {
        Self::connect_with_timeout(grpc_port, binding_name, DEFAULT_INVOKE_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        grpc_port: u16,
        binding_name: &str,
        timeout: Duration,
    ) -> Result<Self, InvokeError> {
        let endpoint = Endpoint::from_shared(format!("http://127.0.0.1:{grpc_port}"))
            .map_err(|e| InvokeError::InvalidEndpoint(format!("port {grpc_port}: {e}")))?
            .connect_timeout(timeout)
            .timeout(timeout);

        let channel = endpoint.connect().await?;
        debug!("Connected binding client to 127.0.0.1:{grpc_port}");

        Ok(Self {
            client: DaprClient::new(channel),
            binding_name: binding_name.to_string(),
        })
    }

    pub fn binding_name(&self) -> &str {
        &self.binding_name
    }

    /// Invokes `operation` on the binding and returns the response payload.
    pub async fn invoke(
        &mut self,
        operation: &str,
        data: Vec<u8>,
        metadata: HashMap<String, String>,
    ) -> Result<Vec<u8>, InvokeError> {
        let request = InvokeBindingRequest {
            name: self.binding_name.clone(),
            data,
            metadata,
            operation: operation.to_string(),
        };

        debug!(
            "Invoking {} operation {operation} with {} byte payload",
            self.binding_name,
            request.data.len()
        );

        let response = self.client.invoke_binding(request).await?;
        Ok(response.into_inner().data)
    }

    /// Sends `document` through the binding's `create` operation without metadata.
    pub async fn create(&mut self, document: &Document) -> Result<(), InvokeError> {
        let data = document.to_bytes()?;
        self.invoke(OPERATION_CREATE, data, HashMap::new()).await?;
        Ok(())
    }
}

/// Opens a fresh connection to the sidecar and creates `document`.
pub async fn invoke_create(
    grpc_port: u16,
    binding_name: &str,
    document: &Document,
) -> Result<(), InvokeError> {
    let mut invoker = BindingInvoker::connect(grpc_port, binding_name).await?;
    let result = invoker.create(document).await;
    match &result {
        Ok(()) => info!(
            "Created document {} through {binding_name}",
            document.id().unwrap_or("<no id>")
        ),
        Err(e) => info!("Create through {binding_name} returned error: {e}"),
    }
    result
}

/// Passes only when the binding itself rejected the call with a message containing `needle`.
pub fn expect_invoke_error(result: Result<(), InvokeError>, needle: &str) -> anyhow::Result<()> {
    match result {
        Ok(()) => bail!("Expected an error containing {needle:?} but the invocation succeeded"),
        Err(InvokeError::Remote(status)) if status.message().contains(needle) => Ok(()),
        Err(InvokeError::Remote(status)) => bail!(
            "Expected an error containing {needle:?}, got {:?}: {}",
            status.code(),
            status.message()
        ),
        Err(e) => bail!("Expected an error containing {needle:?}, invocation failed before reaching the binding: {e}"),
    }
}
