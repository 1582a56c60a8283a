use serde::Deserialize;

use super::options::ComponentRegistration;

/// Subset of the body returned by `GET /v1.0/metadata`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default, alias = "registeredComponents")]
    pub components: Vec<RegisteredComponent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredComponent {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub version: String,
}

impl MetadataResponse {
    pub fn has_component_type(&self, qualified_type: &str) -> bool {
        self.components
            .iter()
            .any(|component| component.component_type == qualified_type)
    }

    /// Registrations with no loaded component of the matching type.
    pub fn missing<'a>(
        &self,
        registrations: &'a [ComponentRegistration],
    ) -> Vec<&'a ComponentRegistration> {
        registrations
            .iter()
            .filter(|registration| !self.has_component_type(&registration.qualified_type()))
            .collect()
    }
}
