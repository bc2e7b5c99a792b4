use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::vocabulary::{
    CONTROL_PLANE_ENDPOINT_READY, PRIVATE_NETWORK_READY, SSH_KEY_READY,
};
use crate::conditions::ConditionSet;
use crate::types::{owned_tag_key, CLUSTER_NAME_LABEL, OWNED_TAG_VALUE};

fn default_public_key_field() -> String {
    "public-key".to_string()
}

/// Infrastructure backing a Cluster API `Cluster` on the Metal provider.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MetalCluster"
)]
#[kube(namespaced)]
#[kube(status = "MetalClusterStatus")]
#[kube(derive = "PartialEq")]
#[kube(printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.region"}"#)]
#[kube(printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#)]
#[kube(printcolumn = r#"{"name":"Network","type":"string","jsonPath":".status.network.id"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MetalClusterSpec {
    /// Provider region all machines of the cluster are placed in
    pub region: String,

    /// Control plane endpoint, supplied by the user or a load balancer integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Private network to create for the cluster, none when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_network: Option<PrivateNetworkSpec>,

    /// SSH key registered with the provider and installed on every machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<SshKeySpec>,

    /// Extra tags put on every provider resource of the cluster
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ApiEndpoint {
    pub host: String,
    pub port: i32,
}

impl ApiEndpoint {
    pub fn is_set(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetworkSpec {
    /// Network name at the provider, `<namespace>-<cluster>` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// CIDR of the network
    pub ip_range: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshKeySpec {
    /// Key name at the provider
    pub name: String,

    /// Secret holding the OpenSSH public key
    pub secret_ref: SecretKeyRef,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,

    #[serde(default = "default_public_key_field")]
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetalClusterStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<PrivateNetworkStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<SshKeyStatus>,

    #[serde(default)]
    pub conditions: ConditionSet,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: BTreeMap<String, FailureDomain>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Private network recorded after creation or adoption.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrivateNetworkStatus {
    pub id: String,
    pub name: String,
    pub ip_range: String,
    /// Carries this cluster's ownership tag, so teardown deletes it
    #[serde(default)]
    pub managed: bool,
}

/// SSH key recorded after registration or adoption.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyStatus {
    pub name: String,
    pub fingerprint: String,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomain {
    #[serde(default)]
    pub control_plane: bool,
}

impl MetalCluster {
    /// Name of the owning CAPI `Cluster` from the owner references.
    pub fn owner_cluster_name(&self) -> Option<String> {
        super::capi_owner_name(&self.metadata, "Cluster")
    }

    /// Name of the CAPI cluster this object belongs to.
    ///
    /// Falls back to the cluster-name label once the owner reference is gone,
    /// which happens while Cluster API tears a cluster down.
    pub fn cluster_name(&self) -> Option<String> {
        self.owner_cluster_name()
            .or_else(|| self.labels().get(CLUSTER_NAME_LABEL).cloned())
    }

    /// Spec tags plus the ownership tag.
    pub fn provider_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.spec.tags.clone();
        tags.insert(owned_tag_key(&self.name_any()), OWNED_TAG_VALUE.to_string());
        tags
    }

    /// Returns `true` if a provider resource carries this cluster's ownership tag.
    pub fn owns(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&owned_tag_key(&self.name_any()))
            .is_some_and(|v| v == OWNED_TAG_VALUE)
    }

    pub fn network_name(&self) -> Option<String> {
        let spec = self.spec.private_network.as_ref()?;
        Some(spec.name.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                self.namespace().unwrap_or_else(|| "default".to_string()),
                self.name_any()
            )
        }))
    }

    /// Provider id of the cluster network, once recorded.
    pub fn network_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.network.as_ref())
            .map(|n| n.id.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    pub fn condition_is_true(&self, type_: &str) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.conditions.is_true(type_))
    }

    /// Conditions that must all be `True` for the cluster to be ready.
    pub fn required_conditions(&self) -> Vec<&'static str> {
        let mut required = vec![CONTROL_PLANE_ENDPOINT_READY];
        if self.spec.private_network.is_some() {
            required.push(PRIVATE_NETWORK_READY);
        }
        if self.spec.ssh_key.is_some() {
            required.push(SSH_KEY_READY);
        }
        required
    }
}
