//! Condition types and reasons reported on `MetalCluster` and `MetalMachine`.

// ============================================================================
// Condition types
// ============================================================================

/// Top-level summary over the required conditions of an object.
pub const READY: &str = "Ready";

pub const PRIVATE_NETWORK_READY: &str = "PrivateNetworkReady";
pub const CONTROL_PLANE_ENDPOINT_READY: &str = "ControlPlaneEndpointReady";
pub const SSH_KEY_READY: &str = "SshKeyReady";

pub const INSTANCE_READY: &str = "InstanceReady";
pub const INSTANCE_CREATING: &str = "InstanceCreating";
pub const INSTANCE_PROVISIONING: &str = "InstanceProvisioning";
pub const PRIVATE_NETWORK_ATTACHED: &str = "PrivateNetworkAttached";
pub const INSTANCE_BOOTSTRAP: &str = "InstanceBootstrap";

// ============================================================================
// Shared reasons
// ============================================================================

pub const AVAILABLE: &str = "Available";
pub const CREATING: &str = "Creating";
pub const FAILED: &str = "Failed";
pub const DELETING: &str = "Deleting";
pub const DELETION_FAILED: &str = "DeletionFailed";
/// Placeholder reason used by the summary when a required condition is absent.
pub const NOT_REPORTED: &str = "NotReported";

// ============================================================================
// Cluster reasons
// ============================================================================

pub const WAITING_FOR_CONTROL_PLANE_ENDPOINT: &str = "WaitingForControlPlaneEndpoint";
pub const WAITING_FOR_SSH_KEY_SECRET: &str = "WaitingForSshKeySecret";
pub const SSH_KEY_MISMATCH: &str = "SshKeyMismatch";
pub const WAITING_FOR_MACHINES_DELETION: &str = "WaitingForMachinesDeletion";

// ============================================================================
// Machine reasons
// ============================================================================

// Gates evaluated before an instance exists.
pub const WAITING_FOR_CLUSTER_INFRASTRUCTURE: &str = "WaitingForClusterInfrastructure";
pub const WAITING_FOR_BOOTSTRAP_DATA: &str = "WaitingForBootstrapData";
pub const WAITING_FOR_SSH_KEY: &str = "WaitingForSshKey";
pub const WAITING_FOR_MACHINE_SSH_KEY: &str = "WaitingForMachineSshKey";
pub const WAITING_FOR_PRIVATE_NETWORKS: &str = "WaitingForPrivateNetworks";

// Instance lifecycle.
pub const INSTANCE_CREATE_FAILED: &str = "InstanceCreateFailed";
pub const INSTANCE_CREATED: &str = "InstanceCreated";
pub const INSTANCE_INSTALLING: &str = "InstanceInstalling";
pub const INSTANCE_PROVISIONED: &str = "InstanceProvisioned";
pub const INSTANCE_FAILED: &str = "InstanceFailed";
pub const INSTANCE_NOT_FOUND: &str = "InstanceNotFound";
pub const INSTANCE_LOOKUP_FAILED: &str = "InstanceLookupFailed";
pub const INSTANCE_DELETING: &str = "InstanceDeleting";
pub const INSTANCE_REINSTALLING: &str = "InstanceReinstalling";
pub const INSTANCE_REINSTALLING_FAILED: &str = "InstanceReinstallingFailed";
pub const INSTANCE_RESCUE: &str = "InstanceRescue";
pub const INSTANCE_RESCUE_FAILED: &str = "InstanceRescueFailed";
pub const INSTANCE_STOPPED: &str = "InstanceStopped";
pub const INSTANCE_VERIFICATION_REQUIRED: &str = "InstanceVerificationRequired";
pub const INSTANCE_STATE_UNKNOWN: &str = "InstanceStateUnknown";
pub const INSTANCE_BOOTSTRAPPING: &str = "InstanceBootstrapping";

// Private network attachment.
pub const MACHINE_PRIVATE_NETWORK_ATTACHING: &str = "MachinePrivateNetworkAttaching";
pub const MACHINE_PRIVATE_NETWORK_ATTACH_FAILED: &str = "MachinePrivateNetworkAttachFailed";

// Bootstrap.
pub const WAITING_FOR_NODE_JOIN: &str = "WaitingForNodeJoin";
pub const NODE_JOINED: &str = "NodeJoined";
