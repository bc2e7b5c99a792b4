use kube::{CustomResource, ResourceExt};
use metal::InstanceStatus;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::vocabulary::{INSTANCE_BOOTSTRAP, INSTANCE_READY, PRIVATE_NETWORK_ATTACHED};
use crate::conditions::ConditionSet;
use crate::types::{Error, Result, CLUSTER_NAME_LABEL};

/// Scheme of provider ids written to `spec.providerID`.
pub const PROVIDER_ID_PREFIX: &str = "metal://";

fn default_attach_private_network() -> bool {
    true
}

/// A single Metal instance backing a Cluster API `Machine`.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MetalMachine"
)]
#[kube(namespaced)]
#[kube(status = "MetalMachineStatus")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.instanceState"}"#)]
#[kube(printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MetalMachineSpec {
    /// `metal://<instance-id>`, set once the instance exists and never changed afterwards
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Product (instance type) to order
    pub product: String,

    /// Operating system image, provider default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Additional SSH key that must already exist at the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    /// Attach the instance to the cluster's private network when one exists
    #[serde(default = "default_attach_private_network")]
    pub attach_private_network: bool,
}

/// Instance state as mirrored into the machine status.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Provisioning,
    Installing,
    Running,
    Stopped,
    Error,
    VerificationRequired,
    Rescue,
    Deleting,
    Unknown,
}

impl From<InstanceStatus> for InstanceState {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Provisioning => Self::Provisioning,
            InstanceStatus::Installing => Self::Installing,
            InstanceStatus::Running => Self::Running,
            InstanceStatus::Stopped => Self::Stopped,
            InstanceStatus::Error => Self::Error,
            InstanceStatus::VerificationRequired => Self::VerificationRequired,
            InstanceStatus::Rescue => Self::Rescue,
            InstanceStatus::Deleting => Self::Deleting,
            InstanceStatus::Unknown => Self::Unknown,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum MachineAddressType {
    #[serde(rename = "Hostname")]
    Hostname,
    #[serde(rename = "ExternalIP")]
    ExternalIp,
    #[serde(rename = "InternalIP")]
    InternalIp,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct MachineAddress {
    #[serde(rename = "type")]
    pub type_: MachineAddressType,
    pub address: String,
}

/// Cluster API v1beta2 initialization contract.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Initialization {
    /// Instance is running and attached, the Node may be bound
    #[serde(default)]
    pub provisioned: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetalMachineStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<InstanceState>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    #[serde(default)]
    pub conditions: ConditionSet,

    #[serde(default)]
    pub initialization: Initialization,

    /// Terminal failure; reconciliation stops until the spec changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last reinstall request token that was acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reinstall_token: Option<String>,

    /// Provider has been seen installing since the last reinstall request
    #[serde(default)]
    pub reinstall_started: bool,

    /// Last rescue request token that was acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rescue_token: Option<String>,
}

impl MetalMachineStatus {
    /// Record a terminal failure.
    pub fn set_failure(&mut self, reason: &str, message: impl Into<String>) {
        let message = message.into();
        self.conditions.mark_false(INSTANCE_READY, reason, message.clone());
        self.failure_reason = Some(reason.to_string());
        self.failure_message = Some(message.clone());
        self.initialization.error_message = Some(message);
    }

    pub fn clear_failure(&mut self) {
        self.failure_reason = None;
        self.failure_message = None;
        self.initialization.error_message = None;
    }
}

pub fn provider_id_for(instance_id: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{instance_id}")
}

impl MetalMachine {
    /// Name of the owning CAPI `Machine`.
    pub fn owner_machine_name(&self) -> Option<String> {
        super::capi_owner_name(&self.metadata, "Machine")
    }

    /// Name of the CAPI cluster from the cluster-name label.
    pub fn cluster_name(&self) -> Option<String> {
        self.labels().get(CLUSTER_NAME_LABEL).cloned()
    }

    /// Instance id parsed from `spec.providerID`.
    pub fn instance_id(&self) -> Result<Option<String>> {
        let Some(provider_id) = self.spec.provider_id.as_deref() else {
            return Ok(None);
        };
        match provider_id.strip_prefix(PROVIDER_ID_PREFIX) {
            Some(id) if !id.is_empty() => Ok(Some(id.to_string())),
            _ => Err(Error::Invariant(format!(
                "providerID {provider_id} does not start with {PROVIDER_ID_PREFIX}"
            ))),
        }
    }

    /// Conditions that must all be `True` for the machine to be ready.
    pub fn required_conditions(&self, wants_network: bool) -> Vec<&'static str> {
        let mut required = vec![INSTANCE_READY];
        if wants_network {
            required.push(PRIVATE_NETWORK_ATTACHED);
        }
        required.push(INSTANCE_BOOTSTRAP);
        required
    }
}
