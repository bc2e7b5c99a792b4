//! Request and response types shared by all compute providers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Instance types
// ============================================================================

/// Instance status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Hardware is being allocated.
    Provisioning,
    /// Operating system is being installed (also during reinstall).
    Installing,
    /// Instance is on and running.
    Running,
    /// Instance is powered off.
    Stopped,
    /// Provider gave up on the instance.
    Error,
    /// Provider requires manual account or order verification.
    VerificationRequired,
    /// Instance is booted into the rescue system.
    Rescue,
    /// Instance is being deleted.
    Deleting,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::Installing => write!(f, "installing"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
            Self::VerificationRequired => write!(f, "verification_required"),
            Self::Rescue => write!(f, "rescue"),
            Self::Deleting => write!(f, "deleting"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Attachment of an instance to a private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Private network identifier.
    pub network_id: String,
    /// Address assigned inside the private network.
    pub ip: Option<String>,
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique instance identifier.
    pub id: String,
    /// Instance name (hostname).
    pub name: String,
    /// Current status.
    pub status: InstanceStatus,
    /// Primary public IPv4 address.
    pub ipv4: Option<String>,
    /// Primary public IPv6 address.
    pub ipv6: Option<String>,
    /// Private networks the instance is attached to.
    #[serde(default)]
    pub private_networks: Vec<NetworkAttachment>,
    /// Product / instance type.
    pub product: String,
    /// Region the instance lives in.
    pub region: String,
    /// Provider-side labels.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// When the instance was created.
    pub created_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Returns `true` if the instance is attached to the given network.
    #[must_use]
    pub fn is_attached_to(&self, network_id: &str) -> bool {
        self.private_networks
            .iter()
            .any(|attachment| attachment.network_id == network_id)
    }
}

/// Request to create a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Instance name (hostname).
    pub name: String,
    /// Product / instance type (e.g. "c2-small-x86").
    pub product: String,
    /// Region to deploy in.
    pub region: String,
    /// Operating system image, provider default when unset.
    pub image: Option<String>,
    /// Names of SSH keys to install.
    pub ssh_keys: Vec<String>,
    /// Bootstrap user data (cloud-init or similar), passed through verbatim.
    pub user_data: String,
    /// Labels to put on the instance.
    pub tags: BTreeMap<String, String>,
    /// Key that makes repeated create calls return the same instance.
    pub idempotency_key: String,
}

/// Request to reinstall an instance in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReinstallRequest {
    /// Operating system image, provider default when unset.
    pub image: Option<String>,
    /// Names of SSH keys to install.
    pub ssh_keys: Vec<String>,
    /// Bootstrap user data.
    pub user_data: String,
}

/// Request to boot an instance into the rescue system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescueRequest {
    /// Names of SSH keys allowed into the rescue system.
    pub ssh_keys: Vec<String>,
}

// ============================================================================
// Network types
// ============================================================================

/// Private network status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    /// Network is being set up.
    Creating,
    /// Network can accept attachments.
    Available,
    /// Network is being torn down.
    Deleting,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

/// A private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateNetwork {
    /// Unique network identifier.
    pub id: String,
    /// Network name.
    pub name: String,
    /// CIDR of the network.
    pub ip_range: String,
    /// Current status.
    pub status: NetworkStatus,
    /// Provider-side labels.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Request to create a private network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNetworkRequest {
    /// Network name.
    pub name: String,
    /// CIDR of the network (e.g. "10.0.0.0/16").
    pub ip_range: String,
    /// Region the network is created in.
    pub region: String,
    /// Labels to put on the network.
    pub tags: BTreeMap<String, String>,
}

// ============================================================================
// SSH key types
// ============================================================================

/// An SSH public key registered with the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    /// Key name, unique per provider account.
    pub name: String,
    /// Key fingerprint.
    pub fingerprint: String,
    /// Public key in OpenSSH format.
    pub public_key: String,
    /// Provider-side labels.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Request to register an SSH public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSshKeyRequest {
    /// Key name.
    pub name: String,
    /// Public key in OpenSSH format.
    pub public_key: String,
    /// Labels to put on the key.
    pub tags: BTreeMap<String, String>,
}
