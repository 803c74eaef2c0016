// ABOUTME: Deployment orchestration: spawn, stop, restart, remove.
// ABOUTME: Drives state transitions, enforces capacity, and cleans up after failures.

mod error;
mod model;

pub use error::{OrchestratorError, OrchestratorErrorKind};
pub use model::resolve_model;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::health::HealthMonitor;
use crate::materializer::{AGENT_CONFIG_MOUNT, AGENT_DATA_MOUNT, ConfigMaterializer};
use crate::model::{
    AgentSecrets, Deployment, DeploymentPatch, DeploymentStatus, transition,
};
use crate::ports::{PortAllocator, ReserveOutcome};
use crate::runtime::{AgentRuntime, CreateSpec, LogOptions};
use crate::settings::Settings;
use crate::store::{DeploymentFilter, DeploymentStore};
use crate::types::{ContainerId, DeploymentId, ModelRef};

const STOP_GRACE: Duration = Duration::from_secs(30);

/// Per-spawn resource limits; defaults come from the settings-derived plan.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub cpu_nanos: u64,
    pub memory_bytes: u64,
}

/// The V8-style heap hint derived from the container memory limit.
///
/// `max(256, min(1536, ((mem_mb - 128) * 3/4 / 64) * 64))`, never more than
/// `mem_mb - 128`; an unlimited container gets the 1536 ceiling.
pub fn heap_hint_mb(memory_bytes: u64) -> u64 {
    const MIB: u64 = 1024 * 1024;
    if memory_bytes == 0 {
        return 1536;
    }
    let available = (memory_bytes / MIB).saturating_sub(128);
    let stepped = (available * 3 / 4 / 64) * 64;
    stepped.clamp(256, 1536).min(available)
}

type SharedPull = Shared<BoxFuture<'static, Result<(), String>>>;

/// Owns the spawn/stop/restart/remove flows for agent containers.
pub struct Orchestrator {
    settings: Settings,
    store: Arc<dyn DeploymentStore>,
    runtime: Arc<dyn AgentRuntime>,
    ports: Arc<PortAllocator>,
    health: Arc<HealthMonitor>,
    materializer: Arc<ConfigMaterializer>,
    // Per-image in-flight pulls; concurrent spawns of the same image join one pull.
    pulls: Mutex<HashMap<String, SharedPull>>,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        store: Arc<dyn DeploymentStore>,
        runtime: Arc<dyn AgentRuntime>,
        ports: Arc<PortAllocator>,
        health: Arc<HealthMonitor>,
        materializer: Arc<ConfigMaterializer>,
    ) -> Self {
        Self {
            settings,
            store,
            runtime,
            ports,
            health,
            materializer,
            pulls: Mutex::new(HashMap::new()),
        }
    }

    /// The plan's default limits when a spawn does not override them.
    pub fn default_limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_nanos: self.settings.agent_cpu_nano,
            memory_bytes: self.settings.agent_memory_limit,
        }
    }

    /// Spawn a fresh container for a deployment currently in Idle, Stopped,
    /// or Error. On success the deployment is left in `Starting` with a probe
    /// armed; the probe's first success moves it to `Healthy`.
    ///
    /// Any failure runs the shared cleanup: the container is removed if it
    /// was created, the port reservation is released, and the deployment is
    /// marked `Error` with the failure message.
    pub async fn spawn(
        &self,
        deployment: &Deployment,
        secrets: &AgentSecrets,
        requested_model: Option<&ModelRef>,
        limits: ResourceLimits,
    ) -> Result<Deployment, OrchestratorError> {
        let mut created: Option<ContainerId> = None;
        let mut reserved: Option<u16> = None;

        let result = self
            .spawn_inner(deployment, secrets, requested_model, limits, &mut created, &mut reserved)
            .await;

        if let Err(e) = &result {
            tracing::error!(deployment = %deployment.id, error = %e, "spawn failed");
            self.cleanup_failed_spawn(&deployment.id, created, reserved, &e.to_string())
                .await;
        }

        result
    }

    async fn spawn_inner(
        &self,
        deployment: &Deployment,
        secrets: &AgentSecrets,
        requested_model: Option<&ModelRef>,
        limits: ResourceLimits,
        created: &mut Option<ContainerId>,
        reserved: &mut Option<u16>,
    ) -> Result<Deployment, OrchestratorError> {
        secrets.validate()?;

        self.check_fleet_capacity().await?;

        let name = deployment.container_name(&self.settings.container_prefix);
        self.remove_zombie(&deployment.id, &name).await?;

        // Single guarded entry: Idle | Stopped | Error -> Configuring.
        transition(deployment.status, DeploymentStatus::Configuring)?;
        let current = self
            .store
            .update(
                &deployment.id,
                DeploymentPatch::status(DeploymentStatus::Configuring)
                    .with_step("Allocating resources..."),
                Some(deployment.status),
            )
            .await?
            .ok_or_else(|| OrchestratorError::gone(deployment.id.as_str()))?;

        let port = self.reserve_port(&deployment.id).await?;
        *reserved = Some(port);

        let model = resolve_model(requested_model.or(current.config.model.as_ref()), secrets)?;

        let paths = self
            .materializer
            .materialize(&deployment.id, secrets, &model)
            .await?;

        self.store
            .update(
                &deployment.id,
                DeploymentPatch::status(DeploymentStatus::Provisioning)
                    .with_step("Preparing agent image..."),
                Some(DeploymentStatus::Configuring),
            )
            .await?
            .ok_or_else(|| OrchestratorError::gone(deployment.id.as_str()))?;

        self.ensure_image().await?;

        let spec = CreateSpec {
            name,
            image: self.settings.agent_image.clone(),
            user: Some("1000:1000".to_string()),
            env: build_env(&deployment.id, secrets, limits.memory_bytes),
            binds: vec![
                format!("{}:{}:rw", paths.config_dir.display(), AGENT_CONFIG_MOUNT),
                format!("{}:{}:rw", paths.data_dir.display(), AGENT_DATA_MOUNT),
            ],
            container_port: self.settings.agent_internal_port,
            host_port: port,
            memory_bytes: limits.memory_bytes,
            nano_cpus: limits.cpu_nanos,
            max_restarts: self.settings.agent_max_restarts,
        };

        let container_id = self.runtime.create_container(&spec).await?;
        *created = Some(container_id.clone());
        self.runtime.start_container(&container_id).await?;

        let mut patch = DeploymentPatch::default();
        patch.container_id = Some(Some(container_id.clone()));
        patch.internal_port = Some(Some(port));
        self.store.update(&deployment.id, patch, None).await?;

        let updated = self
            .store
            .update(
                &deployment.id,
                DeploymentPatch::status(DeploymentStatus::Starting)
                    .with_step("Waiting for agent to come up..."),
                Some(DeploymentStatus::Provisioning),
            )
            .await?
            .ok_or_else(|| OrchestratorError::gone(deployment.id.as_str()))?;

        self.arm_health_probe(&deployment.id, port, DeploymentStatus::Starting);

        tracing::info!(
            deployment = %deployment.id,
            container = %container_id,
            port,
            model = %model,
            "agent spawned"
        );

        Ok(updated)
    }

    /// Stop a running agent. Allowed only from Healthy or Starting.
    pub async fn stop(&self, deployment: &Deployment) -> Result<Deployment, OrchestratorError> {
        if !matches!(
            deployment.status,
            DeploymentStatus::Healthy | DeploymentStatus::Starting
        ) {
            return Err(OrchestratorError::wrong_state("stop", deployment.status));
        }

        self.health.cancel(&deployment.id);

        if let Some(container_id) = &deployment.container_id
            && let Err(e) = self.runtime.stop_container(container_id, STOP_GRACE).await
            && !e.is_not_found()
        {
            return Err(e.into());
        }

        let updated = self
            .store
            .update(
                &deployment.id,
                DeploymentPatch::status_cleared(DeploymentStatus::Stopped),
                None,
            )
            .await?
            .ok_or_else(|| OrchestratorError::gone(deployment.id.as_str()))?;

        tracing::info!(deployment = %deployment.id, "agent stopped");
        Ok(updated)
    }

    /// Restart an agent. Without a container this is a full spawn of a fresh
    /// one (the path an explicit user "start" takes); with one, it is a
    /// runtime restart allowed only from Healthy.
    pub async fn restart(
        &self,
        deployment: &Deployment,
        secrets: &AgentSecrets,
        limits: ResourceLimits,
    ) -> Result<Deployment, OrchestratorError> {
        let Some(container_id) = deployment.container_id.clone() else {
            return self.spawn(deployment, secrets, None, limits).await;
        };

        if deployment.status != DeploymentStatus::Healthy {
            return Err(OrchestratorError::wrong_state("restart", deployment.status));
        }
        let Some(port) = deployment.internal_port else {
            return Err(OrchestratorError::wrong_state("restart", deployment.status));
        };

        self.store
            .update(
                &deployment.id,
                DeploymentPatch::status(DeploymentStatus::Restarting),
                Some(DeploymentStatus::Healthy),
            )
            .await?
            .ok_or_else(|| OrchestratorError::gone(deployment.id.as_str()))?;

        if let Err(e) = self.runtime.restart_container(&container_id, STOP_GRACE).await {
            self.store
                .update(&deployment.id, DeploymentPatch::errored(e.to_string()), None)
                .await?;
            return Err(e.into());
        }

        self.arm_health_probe(&deployment.id, port, DeploymentStatus::Restarting);

        tracing::info!(deployment = %deployment.id, "agent restarting");
        self.store
            .find_by_id(&deployment.id)
            .await?
            .ok_or_else(|| OrchestratorError::gone(deployment.id.as_str()))
    }

    /// Tear down everything the deployment owns on this host. The record
    /// itself is deleted by the calling handler.
    pub async fn remove(&self, deployment: &Deployment) -> Result<(), OrchestratorError> {
        self.health.cancel(&deployment.id);

        if let Some(container_id) = &deployment.container_id
            && let Err(e) = self.runtime.remove_container(container_id, true).await
            && !e.is_not_found()
        {
            return Err(e.into());
        }

        if let Some(port) = deployment.internal_port {
            self.ports.release(port);
        }

        let mut patch = DeploymentPatch::default();
        patch.container_id = Some(None);
        patch.internal_port = Some(None);
        // Best effort: the caller may already have deleted the record.
        let _ = self.store.update(&deployment.id, patch, None).await?;

        self.materializer.remove_tree(&deployment.id).await?;

        tracing::info!(deployment = %deployment.id, "agent removed");
        Ok(())
    }

    /// Diagnostic passthrough to the runtime's log stream.
    pub async fn logs(
        &self,
        deployment: &Deployment,
        tail: Option<u32>,
    ) -> Result<String, OrchestratorError> {
        let Some(container_id) = &deployment.container_id else {
            return Err(OrchestratorError::wrong_state("read logs of", deployment.status));
        };
        Ok(self
            .runtime
            .container_logs(
                container_id,
                LogOptions {
                    tail,
                    timestamps: true,
                },
            )
            .await?)
    }

    async fn check_fleet_capacity(&self) -> Result<(), OrchestratorError> {
        let running = self
            .store
            .count(DeploymentFilter {
                statuses: Some(
                    DeploymentStatus::ALL
                        .into_iter()
                        .filter(|s| s.counts_as_running())
                        .collect(),
                ),
                has_container: Some(true),
                ..DeploymentFilter::default()
            })
            .await?;

        if running >= self.settings.max_running_agents {
            return Err(OrchestratorError::capacity_full(
                running,
                self.settings.max_running_agents,
            ));
        }
        Ok(())
    }

    /// Force-remove any container still wearing this deployment's canonical
    /// name, then drop the record's stale references.
    async fn remove_zombie(
        &self,
        id: &DeploymentId,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        let containers = self.runtime.list_containers(true).await?;
        let Some(zombie) = containers.iter().find(|c| c.has_name(name)) else {
            return Ok(());
        };

        tracing::warn!(deployment = %id, container = %zombie.id, "removing zombie container");
        if let Err(e) = self.runtime.remove_container(&zombie.id, true).await
            && !e.is_not_found()
        {
            return Err(e.into());
        }

        let mut patch = DeploymentPatch::default();
        patch.container_id = Some(None);
        patch.internal_port = Some(None);
        self.store.update(id, patch, None).await?;
        Ok(())
    }

    /// Allocate and conditionally reserve a port, re-allocating on collision.
    /// A CAS miss for any reason other than a collision falls back to an
    /// unconditional write: the deployment may have briefly left
    /// `Configuring` and the reservation must still land.
    async fn reserve_port(&self, id: &DeploymentId) -> Result<u16, OrchestratorError> {
        loop {
            let port = self.ports.allocate().await?;
            match self.ports.atomic_reserve(id, port).await? {
                ReserveOutcome::Reserved => return Ok(port),
                ReserveOutcome::Collision => continue,
                ReserveOutcome::StatusChanged => {
                    let mut patch = DeploymentPatch::default();
                    patch.internal_port = Some(Some(port));
                    self.store
                        .update(id, patch, None)
                        .await?
                        .ok_or_else(|| OrchestratorError::gone(id.as_str()))?;
                    return Ok(port);
                }
            }
        }
    }

    /// Ensure the agent image is present, joining any in-flight pull of it.
    async fn ensure_image(&self) -> Result<(), OrchestratorError> {
        let image = self.settings.agent_image.clone();
        if self.runtime.image_exists(&image).await? {
            return Ok(());
        }

        let key = image.as_str().to_string();
        let pull = {
            let mut pulls = self.pulls.lock();
            match pulls.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let runtime = Arc::clone(&self.runtime);
                    let image = image.clone();
                    let fut: SharedPull = async move {
                        runtime
                            .pull_image(&image)
                            .await
                            .map_err(|e| e.to_string())
                    }
                    .boxed()
                    .shared();
                    pulls.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let result = pull.await;
        // Cleared on every path so a failed pull can be retried.
        self.pulls.lock().remove(&key);
        result.map_err(|message| {
            OrchestratorError::from(crate::runtime::RuntimeError::PullFailed(message))
        })
    }

    /// Arm the health probe; its first success performs the Healthy
    /// transition with its atomic side effects, guarded on the state the
    /// probe was armed from.
    fn arm_health_probe(&self, id: &DeploymentId, port: u16, from: DeploymentStatus) {
        let store = Arc::clone(&self.store);
        let id_clone = id.clone();
        self.health.watch(id, port, async move {
            match store
                .update(&id_clone, DeploymentPatch::healthy(Utc::now()), Some(from))
                .await
            {
                Ok(Some(_)) => {
                    tracing::info!(deployment = %id_clone, "agent healthy");
                }
                Ok(None) => {
                    tracing::warn!(deployment = %id_clone, "deployment left {from} before becoming healthy");
                }
                Err(e) => {
                    tracing::error!(deployment = %id_clone, error = %e, "failed to record healthy state");
                }
            }
        });
    }

    async fn cleanup_failed_spawn(
        &self,
        id: &DeploymentId,
        created: Option<ContainerId>,
        reserved: Option<u16>,
        message: &str,
    ) {
        if let Some(container_id) = created
            && let Err(e) = self.runtime.remove_container(&container_id, true).await
            && !e.is_not_found()
        {
            tracing::warn!(deployment = %id, error = %e, "cleanup could not remove container");
        }

        if let Some(port) = reserved {
            self.ports.release(port);
        }

        if let Err(e) = self
            .store
            .update(id, DeploymentPatch::errored(message), None)
            .await
        {
            tracing::error!(deployment = %id, error = %e, "cleanup could not mark deployment errored");
        }
    }
}

/// Container environment: config location, identity, the gateway token, the
/// heap hint, and whichever vendor keys are present.
fn build_env(id: &DeploymentId, secrets: &AgentSecrets, memory_bytes: u64) -> Vec<String> {
    let mut env = vec![
        format!("AGENT_CONFIG_PATH={AGENT_CONFIG_MOUNT}/openclaw.json"),
        format!("DEPLOYMENT_ID={id}"),
        "NODE_ENV=production".to_string(),
        format!("GATEWAY_TOKEN={}", secrets.web_ui_token),
        format!("NODE_OPTIONS=--max-old-space-size={}", heap_hint_mb(memory_bytes)),
    ];

    if let Some(k) = &secrets.openai_api_key {
        env.push(format!("OPENAI_API_KEY={k}"));
    }
    if let Some(k) = &secrets.anthropic_api_key {
        env.push(format!("ANTHROPIC_API_KEY={k}"));
    }
    if let Some(k) = &secrets.google_api_key {
        env.push(format!("GOOGLE_API_KEY={k}"));
    }
    if let Some(t) = &secrets.telegram_bot_token {
        env.push(format!("TELEGRAM_BOT_TOKEN={t}"));
    }

    env
}
