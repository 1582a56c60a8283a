pub mod binding;
pub mod config;
pub mod cosmos;
pub mod document;
pub mod flow;
pub mod ports;
pub mod proto;
pub mod sidecar;
pub mod suite;
pub mod verify;

#[cfg(test)]
pub mod test_sidecar;

// Binding under certification
pub const BINDING_NAME: &str = "azure-cosmosdb-binding";
pub const OPERATION_CREATE: &str = "create";
pub const SIDECAR_NAME: &str = "cosmosdb-sidecar";

// Component types the sidecar must have loaded
pub const SECRET_STORE_LOCAL_ENV: &str = "local.env";
pub const OUTPUT_BINDING_COSMOSDB: &str = "azure.cosmosdb";

// Error substrings produced by the binding and CosmosDB for malformed documents
pub const ERR_MISSING_PARTITION_KEY: &str = "missing partitionKey field";
pub const ERR_MISSING_ID: &str = "the required properties - 'id; ' - are missing";
pub const ERR_PARTITION_KEY_MISMATCH: &str =
    "PartitionKey extracted from document doesn't match the one specified in the header";
