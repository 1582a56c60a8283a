use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{resolve_binary, HarnessConfig};
use crate::ports::PortPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    SecretStore,
    OutputBinding,
}

impl ComponentKind {
    /// Prefix daprd puts in front of the component type in its metadata.
    fn type_prefix(&self) -> &'static str {
        match self {
            Self::SecretStore => "secretstores",
            Self::OutputBinding => "bindings",
        }
    }
}

/// A component the sidecar must have loaded before the flow may use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRegistration {
    pub kind: ComponentKind,
    pub component_type: String,
}

impl ComponentRegistration {
    pub fn secret_store(component_type: &str) -> Self {
        Self {
            kind: ComponentKind::SecretStore,
            component_type: component_type.to_string(),
        }
    }

    pub fn output_binding(component_type: &str) -> Self {
        Self {
            kind: ComponentKind::OutputBinding,
            component_type: component_type.to_string(),
        }
    }

    /// Type as reported by the metadata API, e.g. `bindings.azure.cosmosdb`.
    pub fn qualified_type(&self) -> String {
        format!("{}.{}", self.kind.type_prefix(), self.component_type)
    }
}

impl fmt::Display for ComponentRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_type())
    }
}

#[derive(Debug, Clone)]
pub struct SidecarOptions {
    pub app_id: String,
    pub daprd_binary_path: PathBuf,
    pub components_path: PathBuf,
    pub ports: PortPair,
    pub log_level: String,
    pub registrations: Vec<ComponentRegistration>,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
}

impl SidecarOptions {
    pub fn new(app_id: &str, daprd_binary_path: impl Into<PathBuf>, ports: PortPair) -> Self {
        Self {
            app_id: app_id.to_string(),
            daprd_binary_path: daprd_binary_path.into(),
            components_path: PathBuf::from("./components"),
            ports,
            log_level: "info".to_string(),
            registrations: Vec::new(),
            startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Options for one flow: harness settings plus that flow's components variant and ports.
    pub fn from_config(config: &HarnessConfig, components_variant: &str, ports: PortPair) -> Self {
        Self::new(&config.sidecar_name, &config.daprd_binary_path, ports)
            .with_components_path(config.components_path(components_variant))
            .with_log_level(&config.log_level)
            .with_startup_timeout(config.startup_timeout())
            .with_poll_interval(config.readiness_poll_interval())
    }

    pub fn with_components_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.components_path = path.into();
        self
    }

    pub fn with_log_level(mut self, log_level: &str) -> Self {
        self.log_level = log_level.to_string();
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_secret_store(mut self, component_type: &str) -> Self {
        self.registrations
            .push(ComponentRegistration::secret_store(component_type));
        self
    }

    pub fn with_output_binding(mut self, component_type: &str) -> Self {
        self.registrations
            .push(ComponentRegistration::output_binding(component_type));
        self
    }

    pub fn http_endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.ports.http)
    }

    /// Command line for a sidecar with no app attached.
    pub fn args(&self) -> Vec<String> {
        vec![
            "--app-id".to_string(),
            self.app_id.clone(),
            "--dapr-grpc-port".to_string(),
            self.ports.grpc.to_string(),
            "--dapr-http-port".to_string(),
            self.ports.http.to_string(),
            "--resources-path".to_string(),
            self.components_path.to_string_lossy().to_string(),
            "--log-level".to_string(),
            self.log_level.clone(),
            "--enable-metrics=false".to_string(),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if resolve_binary(&self.daprd_binary_path).is_none() {
            return Err(anyhow!(
                "daprd binary not found at path: {}",
                self.daprd_binary_path.display()
            ));
        }

        if self.ports.grpc == self.ports.http {
            return Err(anyhow!(
                "gRPC and HTTP ports must differ (both {})",
                self.ports.grpc
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be greater than 0"));
        }

        let manifests = component_manifests(&self.components_path)?;
        if manifests.is_empty() {
            return Err(anyhow!(
                "No component manifests (*.yaml, *.yml) in {}",
                self.components_path.display()
            ));
        }

        Ok(())
    }
}

/// YAML component manifests directly inside `dir`, sorted by path.
pub fn component_manifests(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read components directory: {}", dir.display()))?;

    let mut manifests = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml && path.is_file() {
            manifests.push(path);
        }
    }
    manifests.sort();
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> PortPair {
        PortPair {
            grpc: 50001,
            http: 3500,
        }
    }

    #[test]
    fn test_qualified_types() {
        assert_eq!(
            ComponentRegistration::secret_store("local.env").qualified_type(),
            "secretstores.local.env"
        );
        assert_eq!(
            ComponentRegistration::output_binding("azure.cosmosdb").to_string(),
            "bindings.azure.cosmosdb"
        );
    }

    #[test]
    fn test_args_bind_ports_and_components() {
        let options = SidecarOptions::new("cosmosdb-sidecar", "/usr/bin/daprd", ports())
            .with_components_path("./components/masterkey")
            .with_log_level("debug");

        let args = options.args();
        let value_of = |flag: &str| {
            let pos = args.iter().position(|a| a == flag).unwrap();
            args[pos + 1].clone()
        };

        assert_eq!(value_of("--app-id"), "cosmosdb-sidecar");
        assert_eq!(value_of("--dapr-grpc-port"), "50001");
        assert_eq!(value_of("--dapr-http-port"), "3500");
        assert_eq!(value_of("--resources-path"), "./components/masterkey");
        assert_eq!(value_of("--log-level"), "debug");
        assert!(!args.iter().any(|a| a == "--app-port"));
        assert_eq!(options.http_endpoint(), "http://127.0.0.1:3500");
    }

    #[test]
    fn test_from_config_uses_variant_directory() {
        let config = HarnessConfig {
            components_root: "/certs".to_string(),
            startup_timeout_secs: 12,
            ..Default::default()
        };
        let options = SidecarOptions::from_config(&config, "wrongPartitionKey", ports())
            .with_secret_store("local.env")
            .with_output_binding("azure.cosmosdb");

        assert_eq!(options.components_path, PathBuf::from("/certs/wrongPartitionKey"));
        assert_eq!(options.startup_timeout, Duration::from_secs(12));
        assert_eq!(options.registrations.len(), 2);
        assert_eq!(options.registrations[1].kind, ComponentKind::OutputBinding);
    }

    #[test]
    fn test_validate_requires_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let daprd = dir.path().join("daprd");
        fs::write(&daprd, "").unwrap();
        let components = dir.path().join("components");
        fs::create_dir(&components).unwrap();

        let options = SidecarOptions::new("app", &daprd, ports()).with_components_path(&components);
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("No component manifests"));

        fs::write(components.join("notes.txt"), "").unwrap();
        assert!(options.validate().is_err());

        fs::write(components.join("cosmosdb.yaml"), "kind: Component").unwrap();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shared_port_and_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c.yml"), "").unwrap();

        let missing = SidecarOptions::new("app", dir.path().join("daprd"), ports())
            .with_components_path(dir.path());
        assert!(missing.validate().is_err());

        let daprd = dir.path().join("daprd");
        fs::write(&daprd, "").unwrap();
        let shared = SidecarOptions::new("app", &daprd, PortPair { grpc: 1, http: 1 })
            .with_components_path(dir.path());
        assert!(shared.validate().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_finds_bare_program_on_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("c.yaml"), "").unwrap();

        // sh is on PATH wherever the process tests run
        let options = SidecarOptions::new("app", "sh", ports()).with_components_path(dir.path());
        assert!(options.validate().is_ok());

        let missing = SidecarOptions::new("app", "no-such-daprd-binary", ports())
            .with_components_path(dir.path());
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_shipped_component_variants_have_manifests() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("components");
        for variant in ["serviceprincipal", "masterkey", "wrongPartitionKey"] {
            let manifests = component_manifests(&root.join(variant)).unwrap();
            assert_eq!(manifests.len(), 2, "variant {variant}");
        }
    }
}
