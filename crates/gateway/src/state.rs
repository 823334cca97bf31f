//! Shared application state: the four domain services plus the shutdown
//! signal every background worker and the HTTP server itself watch.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::info;

use emulator_core::clock::{Clock, SystemClock};
use emulator_core::compute::ComputeService;
use emulator_core::content::ContentStore;
use emulator_core::driver::fake::FakeContainerDriver;
use emulator_core::driver::live::DockerDriver;
use emulator_core::driver::ContainerDriver;
use emulator_core::events::{EventSink, WebhookEventSink};
use emulator_core::iam::IamService;
use emulator_core::locks::KeyedLocks;
use emulator_core::objectstore::ObjectStoreService;
use emulator_core::repo::{
    AddressRepo, ApiKeyRepo, BucketRepo, FirewallRepo, IamPolicyRepo, InstanceRepo, NetworkRepo, NicRepo,
    ObjectEventRepo, ObjectRepo, PeeringRepo, ProjectRepo, ResumableSessionRepo, RouteRepo, RouterRepo,
    ServiceAccountKeyRepo, ServiceAccountRepo, SubnetRepo, VpnTunnelRepo,
};
use emulator_core::workers::{cancellation_pair, CancellationHandle, CancellationToken};

use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;

/// Shared application state (thread-safe, cheap to clone — everything
/// behind it is already `Arc`'d or a `sqlx` pool handle).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub projects: ProjectRepo,
    pub object_store: ObjectStoreService,
    pub compute: ComputeService,
    pub vpc: emulator_core::vpc::VpcService,
    pub iam: IamService,
    pub rate_limiter: RateLimiter,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    /// Wires every repository, service, and background-worker collaborator
    /// from a loaded configuration. Connects to SQLite and the container
    /// runtime, so this is async and fallible.
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let emulator = &config.emulator;

        let pool: SqlitePool = emulator_core::db::connect(&emulator.metadata_db_path()).await?;

        let content = ContentStore::new(emulator.storage_root.join("content"));
        content.ensure_dirs().await?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let locks = Arc::new(KeyedLocks::new());

        let driver: Arc<dyn ContainerDriver> = if emulator.docker_host == "fake" {
            Arc::new(FakeContainerDriver::new())
        } else {
            Arc::new(DockerDriver::connect(&emulator.docker_host)?)
        };

        let event_sink: Arc<dyn EventSink> = Arc::new(WebhookEventSink::new(emulator.webhook_timeout()));

        let vpc = emulator_core::vpc::VpcService::new(
            NetworkRepo::new(pool.clone()),
            SubnetRepo::new(pool.clone()),
            NicRepo::new(pool.clone()),
            AddressRepo::new(pool.clone()),
            FirewallRepo::new(pool.clone()),
            RouteRepo::new(pool.clone()),
            PeeringRepo::new(pool.clone()),
            RouterRepo::new(pool.clone()),
            VpnTunnelRepo::new(pool.clone()),
            locks.clone(),
            driver.clone(),
            clock.clone(),
        );

        let compute = ComputeService::new(
            InstanceRepo::new(pool.clone()),
            vpc.clone(),
            driver.clone(),
            locks.clone(),
            clock.clone(),
            Duration::from_secs(10),
        );

        let object_store = ObjectStoreService::new(
            BucketRepo::new(pool.clone()),
            ObjectRepo::new(pool.clone()),
            ResumableSessionRepo::new(pool.clone()),
            ObjectEventRepo::new(pool.clone()),
            content,
            locks.clone(),
            clock.clone(),
            event_sink,
            emulator.clone(),
        );

        let iam = IamService::new(
            ServiceAccountRepo::new(pool.clone()),
            ServiceAccountKeyRepo::new(pool.clone()),
            IamPolicyRepo::new(pool.clone()),
            ApiKeyRepo::new(pool.clone()),
            clock.clone(),
            emulator.signed_url_secret.clone(),
        );

        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        let rate_limiter = RateLimiter::new(crate::rate_limit::RateLimitPolicy {
            limit: config.server.rate_limit_requests,
            window: Duration::from_secs(config.server.rate_limit_window_secs),
        });

        Ok(Self {
            config: Arc::new(config),
            projects: ProjectRepo::new(pool),
            object_store,
            compute,
            vpc,
            iam,
            rate_limiter,
            shutdown_tx,
        })
    }

    /// A cancellation token/handle pair bound to this state's shutdown
    /// channel, for spawning a background worker that should stop when the
    /// server does.
    pub fn cancellation(&self) -> (CancellationHandle, CancellationToken) {
        cancellation_pair()
    }

    pub fn shutdown_signal(&self) -> tokio::sync::watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to all components.
    pub fn shutdown(&self) {
        info!("shutting down application state");
        let _ = self.shutdown_tx.send(true);
    }
}
