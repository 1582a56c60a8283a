use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::ports::PortPair;

/// A sidecar started by a flow step and owned by the flow until it ends.
pub trait FlowSidecar: Send + Sync {
    fn ports(&self) -> PortPair;

    fn shutdown(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

struct ContextInner {
    flow_name: String,
    // Kept in start order; torn down in reverse
    sidecars: Mutex<Vec<(String, Box<dyn FlowSidecar>)>>,
}

/// State shared by the steps of one flow. Cheap to clone.
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<ContextInner>,
}

impl FlowContext {
    pub(crate) fn new(flow_name: &str) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                flow_name: flow_name.to_string(),
                sidecars: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn flow_name(&self) -> &str {
        &self.inner.flow_name
    }

    /// Hands a running sidecar to the flow so later steps can reach it.
    ///
    /// Names are unique per flow. A sidecar registered under a taken name is
    /// shut down immediately and the step fails.
    pub async fn register_sidecar(&self, name: &str, sidecar: Box<dyn FlowSidecar>) -> Result<()> {
        let mut sidecars = self.inner.sidecars.lock().await;
        if sidecars.iter().any(|(existing, _)| existing == name) {
            drop(sidecars);
            if let Err(e) = sidecar.shutdown().await {
                warn!("Failed to stop duplicate sidecar {name}: {e:#}");
            }
            return Err(anyhow!(
                "Sidecar {name} is already running in flow \"{}\"",
                self.inner.flow_name
            ));
        }

        debug!(
            "Flow \"{}\": registered sidecar {name} ({})",
            self.inner.flow_name,
            sidecar.ports()
        );
        sidecars.push((name.to_string(), sidecar));
        Ok(())
    }

    pub async fn sidecar_ports(&self, name: &str) -> Result<PortPair> {
        let sidecars = self.inner.sidecars.lock().await;
        sidecars
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, sidecar)| sidecar.ports())
            .ok_or_else(|| {
                anyhow!(
                    "No sidecar named {name} is running in flow \"{}\"",
                    self.inner.flow_name
                )
            })
    }

    pub(crate) async fn teardown(&self) {
        let sidecars: Vec<_> = self.inner.sidecars.lock().await.drain(..).collect();

        for (name, sidecar) in sidecars.into_iter().rev() {
            info!(
                "Flow \"{}\": stopping sidecar {name}",
                self.inner.flow_name
            );
            if let Err(e) = sidecar.shutdown().await {
                warn!("Failed to stop sidecar {name}: {e:#}");
            }
        }
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("flow_name", &self.inner.flow_name)
            .finish()
    }
}
