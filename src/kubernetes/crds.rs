use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Workload identity binding consumed by the identity proxy. The agent never
/// reconciles these; the rich health probe lists them to verify the API
/// server is reachable.
#[derive(CustomResource, JsonSchema, Serialize, Deserialize, Default, PartialEq, Clone, Debug)]
#[kube(
    group = "idproxy.dev",
    version = "v1alpha1",
    kind = "WorkloadIdentity",
    derive = "Default",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadIdentitySpec {
    /// Client ID of the cloud identity bound to matching workloads
    pub client_id: String,
    /// Resource ID of the underlying cloud identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}
