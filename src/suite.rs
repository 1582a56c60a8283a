//! The CosmosDB binding certification flows.
//!
//! Three flows run one after another, each against its own sidecar on a
//! freshly allocated port pair:
//!
//! - **service principal**: the binding initializes with AAD credentials
//! - **master key**: a valid document is written and read back, then the
//!   missing-id and missing-partition-key documents are rejected
//! - **wrong partition key**: the component extracts the partition key from a
//!   field that does not match the container's partition key path

use anyhow::Result;
use log::info;
use std::time::Duration;

use crate::binding::{expect_invoke_error, invoke_create};
use crate::config::HarnessConfig;
use crate::document::{Document, FIELD_WRONG_PARTITION_KEY, WRONG_PARTITION_KEY_VALUE};
use crate::flow::{Flow, FlowReport, Step};
use crate::ports::{PortAllocator, PortPair};
use crate::sidecar::{self, SidecarOptions};
use crate::verify::Verifier;
use crate::{
    ERR_MISSING_ID, ERR_MISSING_PARTITION_KEY, ERR_PARTITION_KEY_MISMATCH,
    OUTPUT_BINDING_COSMOSDB, SECRET_STORE_LOCAL_ENV,
};

pub const FLOW_SERVICE_PRINCIPAL: &str = "cosmosdb binding authentication using service principal";
pub const FLOW_MASTER_KEY: &str = "cosmosdb binding authentication using master key";
pub const FLOW_WRONG_PARTITION_KEY: &str = "cosmosdb binding with wrong partition key specified";

pub const COMPONENTS_SERVICE_PRINCIPAL: &str = "serviceprincipal";
pub const COMPONENTS_MASTER_KEY: &str = "masterkey";
pub const COMPONENTS_WRONG_PARTITION_KEY: &str = "wrongPartitionKey";

pub const STEP_CREATE_AND_VERIFY: &str = "verify data sent to output binding is written to Cosmos DB";
pub const STEP_MISSING_ID: &str = "expect error if id is missing from document";
pub const STEP_MISSING_PARTITION_KEY: &str = "expect error if partition key is missing from document";
pub const STEP_WRONG_PARTITION_KEY: &str = "verify error when wrong partition key used";

/// Writes a complete document and checks it directly in CosmosDB.
pub fn create_and_verify(sidecar: &str, binding: &str, delay: Duration) -> Step {
    create_and_verify_with(sidecar, binding, move || Verifier::from_env(delay))
}

/// Like [`create_and_verify`], reading back through the verifier `make_verifier` builds.
///
/// The verifier is built before anything is written, so a document is never
/// created without a way to clean it up.
pub fn create_and_verify_with<F>(sidecar: &str, binding: &str, make_verifier: F) -> Step
where
    F: FnOnce() -> Result<Verifier> + Send + 'static,
{
    let (sidecar, binding) = (sidecar.to_string(), binding.to_string());
    Step::new(STEP_CREATE_AND_VERIFY, move |ctx| async move {
        let verifier = make_verifier()?;
        let ports = ctx.sidecar_ports(&sidecar).await?;
        let document = Document::certification(true, true);
        invoke_create(ports.grpc, &binding, &document).await?;

        verifier.verify_and_cleanup(&document).await
    })
}

pub fn create_without_id(sidecar: &str, binding: &str) -> Step {
    expect_create_error(
        STEP_MISSING_ID,
        sidecar,
        binding,
        Document::certification(false, true),
        ERR_MISSING_ID,
    )
}

pub fn create_without_partition_key(sidecar: &str, binding: &str) -> Step {
    expect_create_error(
        STEP_MISSING_PARTITION_KEY,
        sidecar,
        binding,
        Document::certification(true, false),
        ERR_MISSING_PARTITION_KEY,
    )
}

pub fn create_with_wrong_partition_key(sidecar: &str, binding: &str) -> Step {
    let document = Document::certification(true, false)
        .with_field(FIELD_WRONG_PARTITION_KEY, WRONG_PARTITION_KEY_VALUE);
    expect_create_error(
        STEP_WRONG_PARTITION_KEY,
        sidecar,
        binding,
        document,
        ERR_PARTITION_KEY_MISMATCH,
    )
}

fn expect_create_error(
    step_name: &str,
    sidecar: &str,
    binding: &str,
    document: Document,
    needle: &'static str,
) -> Step {
    let (sidecar, binding) = (sidecar.to_string(), binding.to_string());
    Step::new(step_name, move |ctx| async move {
        let ports = ctx.sidecar_ports(&sidecar).await?;
        let result = invoke_create(ports.grpc, &binding, &document).await;
        expect_invoke_error(result, needle)
    })
}

/// Builds and runs the certification flows from harness settings.
#[derive(Debug, Clone)]
pub struct Certification {
    config: HarnessConfig,
}

impl Certification {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn flow_names() -> [&'static str; 3] {
        [FLOW_SERVICE_PRINCIPAL, FLOW_MASTER_KEY, FLOW_WRONG_PARTITION_KEY]
    }

    fn sidecar_step(&self, components_variant: &str, ports: PortPair) -> Step {
        let options = SidecarOptions::from_config(&self.config, components_variant, ports)
            .with_secret_store(SECRET_STORE_LOCAL_ENV)
            .with_output_binding(OUTPUT_BINDING_COSMOSDB);
        sidecar::run(options)
    }

    /// The binding must initialize with service principal credentials.
    pub fn service_principal_flow(&self, ports: PortPair) -> Flow {
        Flow::new(FLOW_SERVICE_PRINCIPAL)
            .add_step(self.sidecar_step(COMPONENTS_SERVICE_PRINCIPAL, ports))
    }

    pub fn master_key_flow(&self, ports: PortPair) -> Flow {
        let sidecar = &self.config.sidecar_name;
        let binding = &self.config.binding_name;
        Flow::new(FLOW_MASTER_KEY)
            .add_step(self.sidecar_step(COMPONENTS_MASTER_KEY, ports))
            .add_step(create_and_verify(
                sidecar,
                binding,
                self.config.verification_delay(),
            ))
            .add_step(create_without_id(sidecar, binding))
            .add_step(create_without_partition_key(sidecar, binding))
    }

    pub fn wrong_partition_key_flow(&self, ports: PortPair) -> Flow {
        Flow::new(FLOW_WRONG_PARTITION_KEY)
            .add_step(self.sidecar_step(COMPONENTS_WRONG_PARTITION_KEY, ports))
            .add_step(create_with_wrong_partition_key(
                &self.config.sidecar_name,
                &self.config.binding_name,
            ))
    }

    /// Builds one flow by name on a fresh port pair from `allocator`.
    pub fn flow(&self, name: &str, allocator: &mut PortAllocator) -> Result<Flow> {
        let build: fn(&Self, PortPair) -> Flow = match name {
            FLOW_SERVICE_PRINCIPAL => Self::service_principal_flow,
            FLOW_MASTER_KEY => Self::master_key_flow,
            FLOW_WRONG_PARTITION_KEY => Self::wrong_partition_key_flow,
            other => anyhow::bail!(
                "Unknown flow {other:?}; expected one of: {}",
                Self::flow_names().join(", ")
            ),
        };

        let ports = allocator.allocate_pair()?;
        info!("Flow \"{name}\" uses ports {ports}");
        Ok(build(self, ports))
    }

    /// Runs the named flows in order; each allocates its ports right before it starts.
    pub async fn run(&self, names: &[&str], allocator: &mut PortAllocator) -> Result<Vec<FlowReport>> {
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            let flow = self.flow(name, allocator)?;
            reports.push(flow.run().await);
        }
        Ok(reports)
    }

    pub async fn run_all(&self, allocator: &mut PortAllocator) -> Result<Vec<FlowReport>> {
        self.run(&Self::flow_names(), allocator).await
    }
}
