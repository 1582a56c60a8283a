use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use super::metadata::MetadataResponse;
use super::options::SidecarOptions;
use crate::flow::FlowSidecar;
use crate::ports::PortPair;

const HEALTH_PATH: &str = "/v1.0/healthz";
const METADATA_PATH: &str = "/v1.0/metadata";
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A `daprd` process that passed its health check and loaded every
/// registered component.
pub struct RunningSidecar {
    app_id: String,
    ports: PortPair,
    http_endpoint: String,
    http: reqwest::Client,
    child: Child,
    output_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningSidecar {
    /// Spawns `daprd` and blocks until it is ready for invocations.
    pub async fn start(options: SidecarOptions) -> Result<Self> {
        options
            .validate()
            .with_context(|| format!("Invalid options for sidecar {}", options.app_id))?;

        info!(
            "Starting sidecar {} ({}) with components from {}",
            options.app_id,
            options.ports,
            options.components_path.display()
        );

        let mut cmd = Command::new(&options.daprd_binary_path);
        cmd.args(options.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Spawning sidecar: {} {:?}",
            options.daprd_binary_path.display(),
            cmd.as_std().get_args().collect::<Vec<_>>()
        );

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to spawn daprd at {}",
                options.daprd_binary_path.display()
            )
        })?;
        info!("Sidecar {} started: PID {:?}", options.app_id, child.id());

        let mut output_handles = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            output_handles.push(forward_output(&options.app_id, "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            output_handles.push(forward_output(&options.app_id, "stderr", stderr));
        }

        let http = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build sidecar HTTP client")?;

        let mut sidecar = Self {
            app_id: options.app_id.clone(),
            ports: options.ports,
            http_endpoint: options.http_endpoint(),
            http,
            child,
            output_handles,
        };

        if let Err(e) = sidecar.await_startup(&options).await {
            if let Err(stop_err) = sidecar.stop().await {
                warn!("Failed to stop sidecar {} after failed start: {stop_err:#}", options.app_id);
            }
            return Err(e);
        }

        info!("Sidecar {} is ready", sidecar.app_id);
        Ok(sidecar)
    }

    async fn await_startup(&mut self, options: &SidecarOptions) -> Result<()> {
        self.wait_for_readiness(options.startup_timeout, options.poll_interval)
            .await?;

        let metadata = self.metadata().await?;
        let missing = metadata.missing(&options.registrations);
        if !missing.is_empty() {
            let missing: Vec<String> = missing.iter().map(|r| r.qualified_type()).collect();
            bail!(
                "Sidecar {} is missing required components: {}",
                self.app_id,
                missing.join(", ")
            );
        }

        debug!(
            "Sidecar {} loaded components: {:?}",
            self.app_id,
            metadata
                .components
                .iter()
                .map(|c| format!("{} ({})", c.name, c.component_type))
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    /// Polls the health endpoint until it answers 2xx or the process exits.
    async fn wait_for_readiness(&mut self, timeout: Duration, interval: Duration) -> Result<()> {
        let health_url = format!("{}{HEALTH_PATH}", self.http_endpoint);
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            if let Some(status) = self
                .child
                .try_wait()
                .context("Failed to poll sidecar process")?
            {
                bail!(
                    "Sidecar {} exited before becoming ready: {status}",
                    self.app_id
                );
            }

            match self.http.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        "Sidecar {} healthy after {attempts} attempts",
                        self.app_id
                    );
                    return Ok(());
                }
                Ok(response) => {
                    debug!(
                        "Sidecar {} not ready yet: {}",
                        self.app_id,
                        response.status()
                    );
                }
                Err(e) => {
                    debug!("Sidecar {} not reachable yet: {e}", self.app_id);
                }
            }

            if Instant::now() >= deadline {
                bail!(
                    "Sidecar {} did not become ready within {timeout:?}",
                    self.app_id
                );
            }

            tokio::time::sleep(interval).await;
        }
    }

    pub async fn metadata(&self) -> Result<MetadataResponse> {
        let url = format!("{}{METADATA_PATH}", self.http_endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query sidecar metadata at {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Sidecar metadata request failed with status {}",
                response.status()
            ));
        }

        response
            .json::<MetadataResponse>()
            .await
            .context("Failed to decode sidecar metadata")
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn stop(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_none() {
            if let Err(e) = self.child.start_kill() {
                warn!("Failed to kill sidecar {}: {e}", self.app_id);
            }
        }

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => info!("Sidecar {} stopped: {status}", self.app_id),
            Ok(Err(e)) => return Err(anyhow!("Failed to wait for sidecar {}: {e}", self.app_id)),
            Err(_) => {
                return Err(anyhow!(
                    "Sidecar {} did not exit within {SHUTDOWN_TIMEOUT:?}",
                    self.app_id
                ))
            }
        }

        for handle in self.output_handles.drain(..) {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Kills the process and waits for it to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop().await
    }
}

impl FlowSidecar for RunningSidecar {
    fn ports(&self) -> PortPair {
        self.ports
    }

    fn shutdown(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move { RunningSidecar::shutdown(*self).await })
    }
}

fn forward_output<R>(app_id: &str, stream_name: &'static str, stream: R) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let app_id = app_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!("[{app_id} {stream_name}] {line}"),
                Ok(None) => break,
                Err(e) => {
                    debug!("[{app_id} {stream_name}] output closed: {e}");
                    break;
                }
            }
        }
    })
}
