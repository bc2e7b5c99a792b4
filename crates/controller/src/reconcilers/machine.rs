use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use metal::{
    CreateInstanceRequest, Instance, InstanceStatus, ProviderError, ReinstallRequest,
    RescueRequest,
};
use tracing::{debug, info, instrument, warn};

use super::{finalizer_event, is_paused, with_finalizer, without_finalizer, FinalizerEvent};
use super::{Outcome, Reconciler};
use crate::conditions::vocabulary::{
    AVAILABLE, DELETION_FAILED, INSTANCE_BOOTSTRAP, INSTANCE_BOOTSTRAPPING, INSTANCE_CREATED,
    INSTANCE_CREATE_FAILED, INSTANCE_CREATING, INSTANCE_DELETING, INSTANCE_FAILED,
    INSTANCE_INSTALLING, INSTANCE_LOOKUP_FAILED, INSTANCE_NOT_FOUND, INSTANCE_PROVISIONED,
    INSTANCE_PROVISIONING, INSTANCE_READY, INSTANCE_REINSTALLING, INSTANCE_REINSTALLING_FAILED,
    INSTANCE_RESCUE, INSTANCE_RESCUE_FAILED, INSTANCE_STATE_UNKNOWN, INSTANCE_STOPPED,
    INSTANCE_VERIFICATION_REQUIRED, MACHINE_PRIVATE_NETWORK_ATTACHING,
    MACHINE_PRIVATE_NETWORK_ATTACH_FAILED, NODE_JOINED, PRIVATE_NETWORK_ATTACHED,
    PRIVATE_NETWORK_READY, READY, SSH_KEY_READY, WAITING_FOR_BOOTSTRAP_DATA,
    WAITING_FOR_CLUSTER_INFRASTRUCTURE, WAITING_FOR_MACHINE_SSH_KEY, WAITING_FOR_NODE_JOIN,
    WAITING_FOR_PRIVATE_NETWORKS, WAITING_FOR_SSH_KEY,
};
use crate::crds::{
    provider_id_for, InstanceState, Machine, MachineAddress, MachineAddressType, MetalCluster,
    MetalMachine, MetalMachineStatus,
};
use crate::types::{
    Context, Error, Result, MACHINE_FINALIZER, MACHINE_UID_TAG, REINSTALL_ANNOTATION,
    RESCUE_ANNOTATION,
};

/// Key of the bootstrap secret that carries the user data.
const BOOTSTRAP_DATA_KEY: &str = "value";

/// Reconciles `MetalMachine` objects through the instance lifecycle.
pub struct MachineReconciler {
    ctx: Arc<Context>,
}

/// Objects a machine reconcile depends on, resolved once per reconcile.
struct Scope<'a> {
    namespace: &'a str,
    owner: &'a Machine,
    metal_cluster: Option<&'a MetalCluster>,
}

impl Scope<'_> {
    /// Cluster network this machine should be attached to.
    fn wants_network(&self, machine: &MetalMachine) -> bool {
        machine.spec.attach_private_network
            && self
                .metal_cluster
                .is_some_and(|c| c.spec.private_network.is_some())
    }

    fn network_id(&self) -> Option<&str> {
        self.metal_cluster.and_then(MetalCluster::network_id)
    }

    fn ssh_key_names(&self, machine: &MetalMachine) -> Vec<String> {
        let mut keys: Vec<String> = self
            .metal_cluster
            .and_then(|c| c.spec.ssh_key.as_ref())
            .map(|k| k.name.clone())
            .into_iter()
            .collect();
        if let Some(name) = machine.spec.ssh_key_name.as_ref() {
            if !keys.contains(name) {
                keys.push(name.clone());
            }
        }
        keys
    }
}

/// Outcome of a gate that must pass before work continues.
enum Gate<T> {
    Open(T),
    Waiting { reason: &'static str, message: String },
}

#[async_trait]
impl Reconciler for MachineReconciler {
    #[instrument(skip(self), fields(kind = "MetalMachine"))]
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome> {
        let Some(machine) = self.ctx.store.get_metal_machine(namespace, name).await? else {
            debug!("MetalMachine no longer exists");
            return Ok(Outcome::AwaitChange);
        };

        match finalizer_event(&machine, MACHINE_FINALIZER) {
            FinalizerEvent::Add => {
                let machine = self
                    .ctx
                    .store
                    .replace_metal_machine(&with_finalizer(&machine, MACHINE_FINALIZER))
                    .await?;
                debug!("Added finalizer");
                self.apply(machine).await
            }
            FinalizerEvent::Apply => self.apply(machine).await,
            FinalizerEvent::Cleanup => self.cleanup(machine).await,
            FinalizerEvent::Released => Ok(Outcome::AwaitChange),
        }
    }
}

impl MachineReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    async fn apply(&self, machine: MetalMachine) -> Result<Outcome> {
        let namespace = machine.namespace().ok_or(Error::MissingObjectKey)?;

        let Some(owner_name) = machine.owner_machine_name() else {
            info!("Waiting for Machine Controller to set OwnerRef on MetalMachine");
            return Ok(Outcome::Pending);
        };
        let Some(owner) = self.ctx.store.get_machine(&namespace, &owner_name).await? else {
            info!(machine = %owner_name, "Owner Machine not found yet");
            return Ok(Outcome::Pending);
        };
        let Some(cluster) = self
            .ctx
            .store
            .get_cluster(&namespace, &owner.spec.cluster_name)
            .await?
        else {
            info!(cluster = %owner.spec.cluster_name, "Cluster not found yet");
            return Ok(Outcome::Pending);
        };
        if is_paused(&machine, &cluster) {
            info!("Reconciliation is paused");
            return Ok(Outcome::AwaitChange);
        }

        let metal_cluster = match cluster.spec.infrastructure_ref.as_ref() {
            Some(reference) if reference.is_infrastructure_kind("MetalCluster") => {
                self.ctx
                    .store
                    .get_metal_cluster(&namespace, &reference.name)
                    .await?
            }
            _ => None,
        };

        let original = machine.status.clone();
        let mut status = original.clone().unwrap_or_default();

        if status.failure_reason.is_some() {
            if status.observed_generation == machine.metadata.generation {
                debug!(
                    reason = status.failure_reason.as_deref().unwrap_or_default(),
                    "Machine has a terminal failure for this generation"
                );
                return Ok(Outcome::AwaitChange);
            }
            info!("Spec changed since the terminal failure, retrying");
            status.clear_failure();
        }

        let scope = Scope {
            namespace: &namespace,
            owner: &owner,
            metal_cluster: metal_cluster.as_ref(),
        };
        let mut machine = machine;
        let result = self.reconcile_instance(&mut machine, &scope, &mut status).await;

        let required = machine.required_conditions(scope.wants_network(&machine));
        status.conditions.set_summary(&required);
        status.ready = status.conditions.is_true(READY);
        status.observed_generation = machine.metadata.generation;

        self.write_status(&machine, original.as_ref(), status.clone())
            .await?;
        let outcome = result?;

        if status.ready && outcome == Outcome::Done {
            info!("✅ MetalMachine is ready");
        }
        Ok(outcome)
    }

    async fn reconcile_instance(
        &self,
        machine: &mut MetalMachine,
        scope: &Scope<'_>,
        status: &mut MetalMachineStatus,
    ) -> Result<Outcome> {
        let instance = match machine.instance_id()? {
            None => return self.create_instance(machine, scope, status).await,
            Some(id) => match self.ctx.provider.get_instance(&id).await {
                Ok(instance) => instance,
                Err(e) if e.is_not_found() => {
                    warn!(instance_id = %id, "Instance is gone from the provider");
                    status.set_failure(
                        INSTANCE_NOT_FOUND,
                        format!("Instance {id} no longer exists at the provider"),
                    );
                    return Ok(Outcome::AwaitChange);
                }
                Err(e) => {
                    status.conditions.mark_false(
                        INSTANCE_READY,
                        INSTANCE_LOOKUP_FAILED,
                        format!("Failed to get instance {id}: {e}"),
                    );
                    return Err(e.into());
                }
            },
        };

        mirror_instance(&instance, status);
        if status.conditions.is_true(INSTANCE_CREATING) {
            status.conditions.mark_false(
                INSTANCE_CREATING,
                INSTANCE_CREATED,
                format!("Instance {} is known to the provider", instance.id),
            );
        }

        if let Some(outcome) = self
            .side_actions(machine, &instance, scope, status)
            .await?
        {
            return Ok(outcome);
        }

        let reinstalling = status.conditions.reason(INSTANCE_READY) == Some(INSTANCE_REINSTALLING);
        match instance.status {
            InstanceStatus::Running if reinstalling && !status.reinstall_started => {
                debug!(instance_id = %instance.id, "Reinstall not picked up by the provider yet");
                status.conditions.mark_false(
                    INSTANCE_READY,
                    INSTANCE_REINSTALLING,
                    format!("Waiting for the provider to start reinstalling instance {}", instance.id),
                );
                Ok(Outcome::Pending)
            }
            InstanceStatus::Running => {
                status.reinstall_started = false;
                self.reconcile_running(machine, &instance, scope, status).await
            }
            InstanceStatus::Provisioning | InstanceStatus::Installing => {
                if reinstalling {
                    status.reinstall_started = true;
                }
                let reason = if instance.status == InstanceStatus::Installing {
                    INSTANCE_INSTALLING
                } else {
                    INSTANCE_PROVISIONING
                };
                status.conditions.mark_true(
                    INSTANCE_PROVISIONING,
                    reason,
                    format!("Instance {} is {}", instance.id, instance.status),
                );
                if !reinstalling {
                    status.conditions.mark_false(
                        INSTANCE_READY,
                        reason,
                        format!("Instance {} is {}", instance.id, instance.status),
                    );
                }
                Ok(Outcome::Pending)
            }
            InstanceStatus::Error => {
                warn!(instance_id = %instance.id, "Provider reports instance in error state");
                status.set_failure(
                    INSTANCE_FAILED,
                    format!("Provider reports instance {} in error state", instance.id),
                );
                Ok(Outcome::AwaitChange)
            }
            InstanceStatus::Stopped => not_ready(status, INSTANCE_STOPPED, &instance),
            InstanceStatus::VerificationRequired => {
                not_ready(status, INSTANCE_VERIFICATION_REQUIRED, &instance)
            }
            InstanceStatus::Rescue => not_ready(status, INSTANCE_RESCUE, &instance),
            InstanceStatus::Deleting => not_ready(status, INSTANCE_DELETING, &instance),
            InstanceStatus::Unknown => not_ready(status, INSTANCE_STATE_UNKNOWN, &instance),
        }
    }

    /// Gates and creation for a machine without `providerID`.
    async fn create_instance(
        &self,
        machine: &mut MetalMachine,
        scope: &Scope<'_>,
        status: &mut MetalMachineStatus,
    ) -> Result<Outcome> {
        let metal_cluster = match scope.metal_cluster {
            Some(cluster) if cluster.is_ready() => cluster,
            _ => {
                return Ok(waiting(
                    status,
                    WAITING_FOR_CLUSTER_INFRASTRUCTURE,
                    "Cluster infrastructure is not ready yet",
                ));
            }
        };

        let user_data = match self.bootstrap_data(scope).await? {
            Gate::Open(data) => data,
            Gate::Waiting { reason, message } => return Ok(waiting(status, reason, message)),
        };

        if metal_cluster.spec.ssh_key.is_some() && !metal_cluster.condition_is_true(SSH_KEY_READY) {
            return Ok(waiting(
                status,
                WAITING_FOR_SSH_KEY,
                "Cluster SSH key is not registered yet",
            ));
        }
        if let Some(name) = machine.spec.ssh_key_name.as_deref() {
            match self.ctx.provider.get_ssh_key(name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    return Ok(waiting(
                        status,
                        WAITING_FOR_MACHINE_SSH_KEY,
                        format!("SSH key {name} does not exist at the provider"),
                    ));
                }
                Err(e) => {
                    status.conditions.mark_false(
                        INSTANCE_READY,
                        INSTANCE_CREATE_FAILED,
                        format!("Failed to look up SSH key {name}: {e}"),
                    );
                    return Err(e.into());
                }
            }
        }

        if scope.wants_network(machine)
            && (scope.network_id().is_none()
                || !metal_cluster.condition_is_true(PRIVATE_NETWORK_READY))
        {
            return Ok(waiting(
                status,
                WAITING_FOR_PRIVATE_NETWORKS,
                "Cluster private network is not ready yet",
            ));
        }

        let name = machine.name_any();
        let uid = machine.uid().ok_or(Error::MissingObjectKey)?;
        let instance = match self.ctx.provider.find_instance(&name).await {
            Ok(Some(existing)) if existing.tags.get(MACHINE_UID_TAG) == Some(&uid) => {
                info!(instance_id = %existing.id, "Adopting instance created by an earlier reconcile");
                existing
            }
            Ok(_) => {
                let mut tags = metal_cluster.provider_tags();
                tags.insert(MACHINE_UID_TAG.to_string(), uid.clone());
                let request = CreateInstanceRequest {
                    name: name.clone(),
                    product: machine.spec.product.clone(),
                    region: metal_cluster.spec.region.clone(),
                    image: machine.spec.image.clone(),
                    ssh_keys: scope.ssh_key_names(machine),
                    user_data,
                    tags,
                    idempotency_key: uid,
                };
                match self.ctx.provider.create_instance(request).await {
                    Ok(created) => {
                        info!(instance_id = %created.id, product = %machine.spec.product, "🚀 Created instance");
                        created
                    }
                    Err(e) => return create_failed(status, e),
                }
            }
            Err(e) => return create_failed(status, e),
        };

        let mut updated = machine.clone();
        updated.spec.provider_id = Some(provider_id_for(&instance.id));
        *machine = self.ctx.store.replace_metal_machine(&updated).await?;

        mirror_instance(&instance, status);
        status.conditions.mark_true(
            INSTANCE_CREATING,
            INSTANCE_CREATING,
            format!("Instance {} was ordered", instance.id),
        );
        status.conditions.mark_false(
            INSTANCE_READY,
            INSTANCE_CREATING,
            format!("Instance {} is being created", instance.id),
        );
        Ok(Outcome::Pending)
    }

    async fn reconcile_running(
        &self,
        machine: &MetalMachine,
        instance: &Instance,
        scope: &Scope<'_>,
        status: &mut MetalMachineStatus,
    ) -> Result<Outcome> {
        status.conditions.mark_false(
            INSTANCE_PROVISIONING,
            INSTANCE_PROVISIONED,
            format!("Instance {} is running", instance.id),
        );

        let attached = if scope.wants_network(machine) {
            self.attach_network(instance, scope, status).await?
        } else {
            status.conditions.remove(PRIVATE_NETWORK_ATTACHED);
            true
        };
        status.initialization.provisioned = attached;
        if !attached {
            status.conditions.mark_false(
                INSTANCE_READY,
                MACHINE_PRIVATE_NETWORK_ATTACHING,
                format!("Instance {} is running, attaching private network", instance.id),
            );
            return Ok(Outcome::Pending);
        }

        let node = scope
            .owner
            .status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref());
        if let Some(node) = node {
            status.conditions.mark_true(
                INSTANCE_BOOTSTRAP,
                NODE_JOINED,
                format!("Node {} joined the cluster", node.name),
            );
            status
                .conditions
                .mark_true(INSTANCE_READY, AVAILABLE, "Instance is running and bootstrapped");
            Ok(Outcome::Done)
        } else {
            status.conditions.mark_false(
                INSTANCE_BOOTSTRAP,
                WAITING_FOR_NODE_JOIN,
                "Waiting for the node to join the cluster",
            );
            status.conditions.mark_false(
                INSTANCE_READY,
                INSTANCE_BOOTSTRAPPING,
                format!("Instance {} is running, waiting for bootstrap", instance.id),
            );
            Ok(Outcome::Pending)
        }
    }

    /// Returns `true` once the provider shows the instance attached.
    async fn attach_network(
        &self,
        instance: &Instance,
        scope: &Scope<'_>,
        status: &mut MetalMachineStatus,
    ) -> Result<bool> {
        let Some(network_id) = scope.network_id() else {
            status.conditions.mark_false(
                PRIVATE_NETWORK_ATTACHED,
                WAITING_FOR_PRIVATE_NETWORKS,
                "Cluster private network is not recorded yet",
            );
            return Ok(false);
        };

        if instance.is_attached_to(network_id) {
            status.conditions.mark_true(
                PRIVATE_NETWORK_ATTACHED,
                READY,
                format!("Attached to private network {network_id}"),
            );
            return Ok(true);
        }

        status.conditions.mark_false(
            PRIVATE_NETWORK_ATTACHED,
            MACHINE_PRIVATE_NETWORK_ATTACHING,
            format!("Attaching to private network {network_id}"),
        );
        match self
            .ctx
            .provider
            .attach_private_network(&instance.id, network_id)
            .await
        {
            Ok(()) | Err(ProviderError::Conflict(_)) => {
                info!(instance_id = %instance.id, network_id, "Requested private network attachment");
                Ok(false)
            }
            Err(e) => {
                status.conditions.mark_false(
                    PRIVATE_NETWORK_ATTACHED,
                    MACHINE_PRIVATE_NETWORK_ATTACH_FAILED,
                    format!("Failed to attach private network {network_id}: {e}"),
                );
                Err(e.into())
            }
        }
    }

    /// Reinstall and rescue requests. `Some` short-circuits the reconcile.
    async fn side_actions(
        &self,
        machine: &MetalMachine,
        instance: &Instance,
        scope: &Scope<'_>,
        status: &mut MetalMachineStatus,
    ) -> Result<Option<Outcome>> {
        let annotations = machine.annotations();

        if let Some(token) = annotations.get(REINSTALL_ANNOTATION) {
            if status.last_reinstall_token.as_ref() != Some(token) {
                let user_data = match self.bootstrap_data(scope).await? {
                    Gate::Open(data) => data,
                    Gate::Waiting { reason, message } => {
                        return Ok(Some(waiting(status, reason, message)));
                    }
                };
                let request = ReinstallRequest {
                    image: machine.spec.image.clone(),
                    ssh_keys: scope.ssh_key_names(machine),
                    user_data,
                };
                match self.ctx.provider.reinstall_instance(&instance.id, request).await {
                    Ok(()) => {
                        info!(instance_id = %instance.id, token, "Reinstall requested");
                        status.last_reinstall_token = Some(token.clone());
                        status.reinstall_started = false;
                        status.initialization.provisioned = false;
                        status.conditions.mark_false(
                            INSTANCE_READY,
                            INSTANCE_REINSTALLING,
                            format!("Reinstalling instance {} (request {token})", instance.id),
                        );
                        status.conditions.mark_false(
                            INSTANCE_BOOTSTRAP,
                            WAITING_FOR_NODE_JOIN,
                            "Waiting for the node to join the cluster after reinstall",
                        );
                        return Ok(Some(Outcome::Pending));
                    }
                    Err(e) if e.is_terminal() => {
                        warn!(instance_id = %instance.id, error = %e, "Reinstall rejected");
                        status.last_reinstall_token = Some(token.clone());
                        status.set_failure(
                            INSTANCE_REINSTALLING_FAILED,
                            format!("Reinstall of instance {} was rejected: {e}", instance.id),
                        );
                        return Ok(Some(Outcome::AwaitChange));
                    }
                    Err(e) => {
                        status.conditions.mark_false(
                            INSTANCE_READY,
                            INSTANCE_REINSTALLING_FAILED,
                            format!("Failed to reinstall instance {}: {e}", instance.id),
                        );
                        return Err(e.into());
                    }
                }
            }
        }

        if let Some(token) = annotations.get(RESCUE_ANNOTATION) {
            if status.last_rescue_token.as_ref() != Some(token) {
                let request = RescueRequest {
                    ssh_keys: scope.ssh_key_names(machine),
                };
                match self.ctx.provider.rescue_instance(&instance.id, request).await {
                    Ok(()) => {
                        info!(instance_id = %instance.id, token, "Rescue requested");
                        status.last_rescue_token = Some(token.clone());
                        status.conditions.mark_false(
                            INSTANCE_READY,
                            INSTANCE_RESCUE,
                            format!("Booting instance {} into rescue (request {token})", instance.id),
                        );
                        return Ok(Some(Outcome::Pending));
                    }
                    Err(e) if e.is_terminal() => {
                        warn!(instance_id = %instance.id, error = %e, "Rescue rejected, dropping request");
                        status.last_rescue_token = Some(token.clone());
                    }
                    Err(e) => {
                        status.conditions.mark_false(
                            INSTANCE_READY,
                            INSTANCE_RESCUE_FAILED,
                            format!("Failed to boot instance {} into rescue: {e}", instance.id),
                        );
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(None)
    }

    async fn bootstrap_data(&self, scope: &Scope<'_>) -> Result<Gate<String>> {
        let Some(secret_name) = scope.owner.spec.bootstrap.data_secret_name.as_deref() else {
            return Ok(Gate::Waiting {
                reason: WAITING_FOR_BOOTSTRAP_DATA,
                message: "Bootstrap data secret is not set on the Machine yet".to_string(),
            });
        };

        let data = self
            .ctx
            .store
            .get_secret(scope.namespace, secret_name)
            .await?
            .and_then(|s| s.data)
            .and_then(|data| data.get(BOOTSTRAP_DATA_KEY).cloned());
        let Some(bytes) = data else {
            return Ok(Gate::Waiting {
                reason: WAITING_FOR_BOOTSTRAP_DATA,
                message: format!("Bootstrap secret {secret_name} has no {BOOTSTRAP_DATA_KEY} key"),
            });
        };

        String::from_utf8(bytes.0).map(Gate::Open).map_err(|_| {
            Error::Invariant(format!("Bootstrap secret {secret_name} is not valid UTF-8"))
        })
    }

    async fn cleanup(&self, machine: MetalMachine) -> Result<Outcome> {
        let Some(instance_id) = machine.instance_id()? else {
            info!("No instance was ever created, releasing finalizer");
            self.ctx
                .store
                .replace_metal_machine(&without_finalizer(&machine, MACHINE_FINALIZER))
                .await?;
            return Ok(Outcome::AwaitChange);
        };

        let original = machine.status.clone();
        let mut status = original.clone().unwrap_or_default();
        let result = self.teardown(&instance_id, &mut status).await;
        status.ready = false;
        status.initialization.provisioned = false;
        let machine = self
            .write_status(&machine, original.as_ref(), status)
            .await?;

        if result? {
            self.ctx
                .store
                .replace_metal_machine(&without_finalizer(&machine, MACHINE_FINALIZER))
                .await?;
            info!(instance_id, "🧹 Instance removed, finalizer released");
            Ok(Outcome::AwaitChange)
        } else {
            Ok(Outcome::Pending)
        }
    }

    /// Returns `true` once the instance is gone.
    async fn teardown(&self, instance_id: &str, status: &mut MetalMachineStatus) -> Result<bool> {
        let instance = match self.ctx.provider.get_instance(instance_id).await {
            Ok(instance) => instance,
            Err(e) if e.is_not_found() => {
                debug!(instance_id, "Instance already gone");
                return Ok(true);
            }
            Err(e) => {
                status.conditions.mark_false(
                    INSTANCE_READY,
                    DELETION_FAILED,
                    format!("Failed to get instance {instance_id} for deletion: {e}"),
                );
                return Err(e.into());
            }
        };
        status.instance_state = Some(InstanceState::from(instance.status));

        if instance.status == InstanceStatus::Deleting {
            status.conditions.mark_false(
                INSTANCE_READY,
                INSTANCE_DELETING,
                format!("Instance {instance_id} is being deleted"),
            );
            return Ok(false);
        }

        for attachment in &instance.private_networks {
            match self
                .ctx
                .provider
                .detach_private_network(instance_id, &attachment.network_id)
                .await
            {
                Ok(()) => info!(instance_id, network_id = %attachment.network_id, "Detached private network"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    status.conditions.mark_false(
                        INSTANCE_READY,
                        DELETION_FAILED,
                        format!(
                            "Failed to detach instance {instance_id} from network {}: {e}",
                            attachment.network_id
                        ),
                    );
                    return Err(e.into());
                }
            }
        }

        match self.ctx.provider.delete_instance(instance_id).await {
            Ok(()) => info!(instance_id, "Requested instance deletion"),
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) => {
                status.conditions.mark_false(
                    INSTANCE_READY,
                    DELETION_FAILED,
                    format!("Failed to delete instance {instance_id}: {e}"),
                );
                return Err(e.into());
            }
        }

        status.conditions.mark_false(
            INSTANCE_READY,
            INSTANCE_DELETING,
            format!("Instance {instance_id} is being deleted"),
        );
        Ok(false)
    }

    async fn write_status(
        &self,
        machine: &MetalMachine,
        original: Option<&MetalMachineStatus>,
        status: MetalMachineStatus,
    ) -> Result<MetalMachine> {
        if original == Some(&status) {
            return Ok(machine.clone());
        }
        let mut updated = machine.clone();
        updated.status = Some(status);
        self.ctx.store.replace_metal_machine_status(&updated).await
    }
}

fn waiting(
    status: &mut MetalMachineStatus,
    reason: &'static str,
    message: impl Into<String>,
) -> Outcome {
    let message = message.into();
    debug!(reason, %message, "Waiting on dependency");
    status.conditions.mark_false(INSTANCE_READY, reason, message);
    Outcome::Pending
}

fn not_ready(status: &mut MetalMachineStatus, reason: &str, instance: &Instance) -> Result<Outcome> {
    status.conditions.mark_false(
        INSTANCE_READY,
        reason,
        format!("Instance {} is {}", instance.id, instance.status),
    );
    Ok(Outcome::Pending)
}

/// Terminal errors are recorded and settle; transient ones go to backoff.
fn create_failed(status: &mut MetalMachineStatus, err: ProviderError) -> Result<Outcome> {
    if err.is_terminal() {
        warn!(error = %err, "Instance creation rejected by the provider");
        status.set_failure(
            INSTANCE_FAILED,
            format!("Instance creation was rejected: {err}"),
        );
        return Ok(Outcome::AwaitChange);
    }
    status.conditions.mark_false(
        INSTANCE_READY,
        INSTANCE_CREATE_FAILED,
        format!("Failed to create instance: {err}"),
    );
    Err(err.into())
}

fn mirror_instance(instance: &Instance, status: &mut MetalMachineStatus) {
    status.instance_state = Some(InstanceState::from(instance.status));

    let mut addresses = vec![MachineAddress {
        type_: MachineAddressType::Hostname,
        address: instance.name.clone(),
    }];
    for ip in [instance.ipv4.as_ref(), instance.ipv6.as_ref()].into_iter().flatten() {
        addresses.push(MachineAddress {
            type_: MachineAddressType::ExternalIp,
            address: ip.clone(),
        });
    }
    for ip in instance.private_networks.iter().filter_map(|n| n.ip.as_ref()) {
        addresses.push(MachineAddress {
            type_: MachineAddressType::InternalIp,
            address: ip.clone(),
        });
    }
    status.addresses = addresses;
}
