// ABOUTME: The composition root: every service built and wired explicitly.
// ABOUTME: No global singletons; handlers share the App through an Arc.

use std::sync::Arc;
use std::time::Duration;

use crate::crypto::SecretBox;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::mailer::Mailer;
use crate::materializer::ConfigMaterializer;
use crate::orchestrator::Orchestrator;
use crate::ports::PortAllocator;
use crate::proxy::{Proxy, RouteCache, TouchThrottle, WakeCoordinator};
use crate::reaper::Reaper;
use crate::runtime::AgentRuntime;
use crate::settings::Settings;
use crate::store::{DeploymentStore, UserStore};

/// Owns the constructed services and their wiring.
pub struct App {
    pub settings: Settings,
    pub secret_box: Arc<SecretBox>,
    pub deployments: Arc<dyn DeploymentStore>,
    pub users: Arc<dyn UserStore>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub ports: Arc<PortAllocator>,
    pub health: Arc<HealthMonitor>,
    pub materializer: Arc<ConfigMaterializer>,
    pub orchestrator: Arc<Orchestrator>,
    pub cache: Arc<RouteCache>,
    pub wake: Arc<WakeCoordinator>,
    pub proxy: Arc<Proxy>,
    pub reaper: Arc<Reaper>,
}

impl App {
    pub fn new(
        settings: Settings,
        deployments: Arc<dyn DeploymentStore>,
        users: Arc<dyn UserStore>,
        runtime: Arc<dyn AgentRuntime>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self> {
        let secret_box = Arc::new(SecretBox::from_hex_key(&settings.encryption_key)?);

        let ports = Arc::new(PortAllocator::new(
            settings.min_agent_port,
            settings.max_agent_port,
            Arc::clone(&deployments),
            Arc::clone(&runtime),
        ));

        let health = Arc::new(HealthMonitor::new(
            settings.health_check_interval,
            settings.health_check_timeout,
        ));

        let materializer = Arc::new(ConfigMaterializer::new(
            settings.data_path.clone(),
            settings.agent_internal_port,
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            settings.clone(),
            Arc::clone(&deployments),
            Arc::clone(&runtime),
            Arc::clone(&ports),
            Arc::clone(&health),
            Arc::clone(&materializer),
        ));

        let cache = Arc::new(RouteCache::new(
            Duration::from_secs(5),
            Duration::from_secs(1),
        ));

        let wake = Arc::new(WakeCoordinator::new(
            Arc::clone(&deployments),
            Arc::clone(&orchestrator),
            Arc::clone(&secret_box),
            Arc::clone(&cache),
            settings.allow_plaintext_secrets,
        ));

        let proxy = Arc::new(Proxy::new(
            Arc::clone(&deployments),
            Arc::clone(&cache),
            TouchThrottle::new(settings.touch_throttle),
            Arc::clone(&wake),
        ));

        let reaper = Arc::new(Reaper::new(
            settings.reaper_interval,
            settings.idle_timeout,
            settings.reminder_days,
            settings.container_prefix.clone(),
            Arc::clone(&deployments),
            Arc::clone(&users),
            Arc::clone(&runtime),
            mailer,
        ));

        Ok(Self {
            settings,
            secret_box,
            deployments,
            users,
            runtime,
            ports,
            health,
            materializer,
            orchestrator,
            cache,
            wake,
            proxy,
            reaper,
        })
    }
}
