//! Orchestrator — `run/start/stop/delete/get/list` instance operations.
//!
//! Every operation that mutates a single instance's state acquires that
//! instance's striped lock first, so an operator-initiated transition and
//! the periodic reconciler (§4.2) never race each other.

use std::collections::HashMap;

use crate::driver::{ContainerSpec, ContainerState};
use crate::error::{Error, Result};
use crate::repo::compute::{Instance, InstanceStatus};

use super::fsm::{transition, InstanceEvent};
use super::ComputeService;

const DEFAULT_IMAGE: &str = "emulator/vm-base:latest";
const NIC0_NAME: &str = "nic0";

#[derive(Debug, Clone, Default)]
pub struct NetworkInterfaceSpec {
    pub network_name: Option<String>,
    pub subnet_name: Option<String>,
    pub allocate_external: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunInstanceRequest {
    pub image: Option<String>,
    pub metadata: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub tags: Vec<String>,
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
}

impl ComputeService {
    /// Creates the DB row in `PROVISIONING`, then brings up the backing
    /// container. A create failure still leaves the row behind, terminated,
    /// per the FSM table's `PROVISIONING -[create fails]-> TERMINATED` edge.
    pub async fn run_instance(
        &self,
        project_id: &str,
        name: &str,
        zone: &str,
        machine_type: &str,
        req: RunInstanceRequest,
    ) -> Result<Instance> {
        Self::validate_catalog(zone, machine_type)?;
        let region = crate::catalog::region_for_zone(zone)
            .ok_or_else(|| Error::InvalidArgument(format!("cannot derive region from zone {zone}")))?;

        let (network, subnet) = self.resolve_primary_network(project_id, &region, &req.network_interfaces).await?;

        let instance = self
            .instances
            .create(
                project_id,
                name,
                zone,
                machine_type,
                &network.id,
                &subnet.id,
                &req.metadata,
                &req.labels,
                &req.tags,
            )
            .await?;

        let _guard = self.locks.acquire(&Self::instance_lock_key(&instance.id)).await;

        let internal_ip = self.vpc.allocate_internal_ip(&subnet.id).await?;
        self.vpc
            .create_nic(&instance.id, &network.id, &subnet.id, NIC0_NAME, &internal_ip, 0)
            .await?;

        let allocate_external = req.network_interfaces.first().map(|n| n.allocate_external).unwrap_or(false);
        let external_ip = if allocate_external {
            let addr = self.vpc.allocate_ephemeral_address(project_id, &region, &instance.id).await?;
            Some(addr.ip)
        } else {
            None
        };
        self.instances.set_ips(&instance.id, Some(&internal_ip), external_ip.as_deref()).await?;

        match self.provision_container(&instance, req.image.as_deref(), &req.metadata).await {
            Ok(container_id) => {
                self.instances.set_container_id(&instance.id, Some(&container_id)).await?;
                let next = transition(InstanceStatus::Provisioning, InstanceEvent::ContainerStarted)?;
                self.instances.set_status(&instance.id, next).await?;
            }
            Err(e) => {
                tracing::warn!(instance = %instance.id, error = %e, "container provisioning failed");
                let next = transition(InstanceStatus::Provisioning, InstanceEvent::ContainerCreateFailed)?;
                self.instances.set_status(&instance.id, next).await?;
            }
        }

        self.instances.get_by_id(&instance.id).await
    }

    async fn provision_container(
        &self,
        instance: &Instance,
        image: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let image = image.unwrap_or(DEFAULT_IMAGE);
        let (_, vcpu, mem_mb) = crate::catalog::MACHINE_TYPES
            .iter()
            .find(|(n, _, _)| *n == instance.machine_type)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown machine type {}", instance.machine_type)))?;

        let env: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let spec = ContainerSpec {
            name: instance.name.clone(),
            image: image.to_string(),
            cpu_shares: Some(vcpu as i64),
            memory_mb: Some(mem_mb as i64),
            env,
            labels: instance.labels.clone(),
        };

        self.with_driver_timeout("ensure_image", async { Ok(self.driver.ensure_image(image).await?) }).await?;
        let container_id =
            self.with_driver_timeout("create_container", async { Ok(self.driver.create_container(&spec).await?) }).await?;
        self.with_driver_timeout("start_container", async {
            Ok(self.driver.start_container(&container_id).await?)
        })
        .await?;

        if let Some(docker_net) = self.vpc.fabric_id(&instance.network_id) {
            self.with_driver_timeout("attach_to_network", async {
                Ok(self.driver.attach_to_network(&container_id, &docker_net).await?)
            })
            .await?;
        }
        self.vpc.track_container(&instance.network_id, &container_id);

        // Splice this container into every network already peered with its
        // own, per spec: a peering attaches each side's containers to the
        // other side's fabric.
        for peer_docker_net in self.vpc.peered_docker_networks(&instance.network_id) {
            self.with_driver_timeout("attach_to_network", async {
                Ok(self.driver.attach_to_network(&container_id, &peer_docker_net).await?)
            })
            .await?;
        }

        Ok(container_id)
    }

    async fn resolve_primary_network(
        &self,
        project_id: &str,
        region: &str,
        nics: &[NetworkInterfaceSpec],
    ) -> Result<(crate::repo::vpc::Network, crate::repo::vpc::Subnetwork)> {
        let network_name = nics.first().and_then(|n| n.network_name.as_deref()).unwrap_or("default");
        let network = self.vpc.get_network(project_id, network_name).await?;

        let subnet = if let Some(subnet_name) = nics.first().and_then(|n| n.subnet_name.as_deref()) {
            self.vpc.get_subnet(&network.id, subnet_name).await?
        } else {
            self.vpc
                .list_subnets(&network.id)
                .await?
                .into_iter()
                .find(|s| s.region == region)
                .ok_or_else(|| {
                    Error::FailedPrecondition(format!("network {network_name} has no subnet in region {region}"))
                })?
        };

        Ok((network, subnet))
    }

    pub async fn get_instance(&self, project_id: &str, zone: &str, name: &str) -> Result<Instance> {
        self.instances.get_by_name(project_id, zone, name).await
    }

    pub async fn list_instances(&self, project_id: &str, zone: Option<&str>) -> Result<Vec<Instance>> {
        self.instances.list(project_id, zone).await
    }

    pub async fn stop_instance(&self, instance_id: &str) -> Result<Instance> {
        let _guard = self.locks.acquire(&Self::instance_lock_key(instance_id)).await;
        let instance = self.instances.get_by_id(instance_id).await?;
        let next = transition(instance.status, InstanceEvent::Stop)?;
        self.instances.set_status(instance_id, next).await?;

        if let Some(container_id) = &instance.container_id {
            self.with_driver_timeout("stop_container", async {
                match self.driver.stop_container(container_id, Some(30)).await {
                    Ok(()) => Ok(()),
                    Err(crate::driver::DriverError::ContainerNotFound(_)) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;
        }

        let stopped = transition(next, InstanceEvent::ContainerStopped)?;
        self.instances.set_status(instance_id, stopped).await?;
        self.instances.get_by_id(instance_id).await
    }

    /// Restarts a stopped instance, re-allocating its external IP if it
    /// previously had one (§4.2 FSM table note on `STOPPED -[start]->
    /// RUNNING`).
    pub async fn start_instance(&self, instance_id: &str) -> Result<Instance> {
        let _guard = self.locks.acquire(&Self::instance_lock_key(instance_id)).await;
        let instance = self.instances.get_by_id(instance_id).await?;
        let next = transition(instance.status, InstanceEvent::Start)?;

        if let Some(container_id) = &instance.container_id {
            self.with_driver_timeout("start_container", async {
                Ok(self.driver.start_container(container_id).await?)
            })
            .await?;
        }

        if instance.external_ip.is_none() {
            if let Some(region) = crate::catalog::region_for_zone(&instance.zone) {
                if let Ok(addr) = self.vpc.allocate_ephemeral_address(&instance.project_id, &region, instance_id).await {
                    self.instances.set_ips(instance_id, instance.internal_ip.as_deref(), Some(&addr.ip)).await?;
                }
            }
        }

        self.instances.set_status(instance_id, next).await?;
        self.instances.get_by_id(instance_id).await
    }

    /// Attaches an ephemeral external IP to a running instance's primary
    /// NIC, for the `addAccessConfig` surface. Rejects an instance that
    /// already has one rather than leaking an orphaned address.
    pub async fn add_access_config(&self, instance_id: &str) -> Result<Instance> {
        let _guard = self.locks.acquire(&Self::instance_lock_key(instance_id)).await;
        let instance = self.instances.get_by_id(instance_id).await?;
        if instance.external_ip.is_some() {
            return Err(Error::FailedPrecondition(format!("instance {instance_id} already has an access config")));
        }
        let region = crate::catalog::region_for_zone(&instance.zone)
            .ok_or_else(|| Error::InvalidArgument(format!("cannot derive region from zone {}", instance.zone)))?;
        let addr = self.vpc.allocate_ephemeral_address(&instance.project_id, &region, instance_id).await?;
        self.instances.set_ips(instance_id, instance.internal_ip.as_deref(), Some(&addr.ip)).await?;
        self.instances.get_by_id(instance_id).await
    }

    /// Detaches an instance's external IP, for the `deleteAccessConfig`
    /// surface. A no-op if the instance has none.
    pub async fn delete_access_config(&self, instance_id: &str) -> Result<Instance> {
        let _guard = self.locks.acquire(&Self::instance_lock_key(instance_id)).await;
        let instance = self.instances.get_by_id(instance_id).await?;
        self.vpc.release_instance_address(instance_id).await?;
        self.instances.set_ips(instance_id, instance.internal_ip.as_deref(), None).await?;
        self.instances.get_by_id(instance_id).await
    }

    pub async fn delete_instance(&self, instance_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(&Self::instance_lock_key(instance_id)).await;
        let instance = self.instances.get_by_id(instance_id).await?;
        transition(instance.status, InstanceEvent::Delete)?;

        if let Some(container_id) = &instance.container_id {
            let result = self
                .with_driver_timeout("remove_container", async {
                    Ok(self.driver.remove_container(container_id, true).await?)
                })
                .await;
            if let Err(e) = result {
                if !matches!(e, Error::NotFound(_)) {
                    return Err(e);
                }
            }
            self.vpc.untrack_container(container_id);
        }

        self.vpc.release_nics_for_instance(instance_id).await?;
        self.instances.set_status(instance_id, InstanceStatus::Terminated).await?;
        Ok(())
    }

    /// Maps a container's observed runtime state onto the `ContainerState`
    /// the reconciler (`reconcile.rs`) understands, per §4.2's mapping
    /// table: `running` -> RUNNING, `exited|dead|paused` -> STOPPED,
    /// not-found -> TERMINATED.
    pub(crate) async fn observed_state(&self, container_id: &str) -> Result<ContainerState> {
        Ok(self.driver.inspect_container(container_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::driver::fake::FakeContainerDriver;
    use crate::locks::KeyedLocks;
    use crate::repo::{
        AddressRepo, FirewallRepo, InstanceRepo, NetworkRepo, NicRepo, PeeringRepo, RouteRepo, RouterRepo, SubnetRepo,
        VpnTunnelRepo,
    };
    use crate::repo::vpc::RoutingMode;
    use crate::vpc::VpcService;

    use super::*;

    async fn service() -> ComputeService {
        let pool = sqlx::sqlite::SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();

        let vpc = VpcService::new(
            NetworkRepo::new(pool.clone()),
            SubnetRepo::new(pool.clone()),
            NicRepo::new(pool.clone()),
            AddressRepo::new(pool.clone()),
            FirewallRepo::new(pool.clone()),
            RouteRepo::new(pool.clone()),
            PeeringRepo::new(pool.clone()),
            RouterRepo::new(pool.clone()),
            VpnTunnelRepo::new(pool.clone()),
            Arc::new(KeyedLocks::new()),
            Arc::new(FakeContainerDriver::new()),
            Arc::new(SystemClock),
        );
        vpc.create_network("p1", "default", true, RoutingMode::Regional, 1460).await.unwrap();

        ComputeService::new(
            InstanceRepo::new(pool.clone()),
            vpc,
            Arc::new(FakeContainerDriver::new()),
            Arc::new(KeyedLocks::new()),
            Arc::new(SystemClock),
            std::time::Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn run_instance_reaches_running_with_internal_ip() {
        let svc = service().await;
        let inst = svc
            .run_instance("p1", "vm1", "us-central1-a", "e2-micro", RunInstanceRequest::default())
            .await
            .unwrap();
        assert_eq!(inst.status, InstanceStatus::Running);
        assert!(inst.internal_ip.is_some());
    }

    #[tokio::test]
    async fn unknown_zone_rejected() {
        let svc = service().await;
        let err = svc
            .run_instance("p1", "vm1", "mars-1", "e2-micro", RunInstanceRequest::default())
            .await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn unknown_machine_type_rejected() {
        let svc = service().await;
        let err = svc
            .run_instance("p1", "vm1", "us-central1-a", "bogus-type", RunInstanceRequest::default())
            .await;
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn full_lifecycle_round_trip() {
        let svc = service().await;
        let inst = svc
            .run_instance("p1", "vm1", "us-central1-a", "e2-micro", RunInstanceRequest::default())
            .await
            .unwrap();

        let stopped = svc.stop_instance(&inst.id).await.unwrap();
        assert_eq!(stopped.status, InstanceStatus::Stopped);

        let started = svc.start_instance(&inst.id).await.unwrap();
        assert_eq!(started.status, InstanceStatus::Running);

        svc.delete_instance(&inst.id).await.unwrap();
        let terminated = svc.instances.get_by_id(&inst.id).await.unwrap();
        assert_eq!(terminated.status, InstanceStatus::Terminated);
    }

    #[tokio::test]
    async fn starting_a_running_instance_is_rejected() {
        let svc = service().await;
        let inst = svc
            .run_instance("p1", "vm1", "us-central1-a", "e2-micro", RunInstanceRequest::default())
            .await
            .unwrap();
        let err = svc.start_instance(&inst.id).await;
        assert!(err.is_err());
    }
}
