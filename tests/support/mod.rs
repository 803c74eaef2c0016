// ABOUTME: Test support utilities.
// ABOUTME: Mock runtime, recording mailer, and fixture builders for suites.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use apiary::crypto::SecretBox;
use apiary::mailer::{MailError, Mailer};
use apiary::model::{
    AgentConfig, AgentSecrets, AuthProvider, Deployment, SecretBundle, SubscriptionStatus, User,
};
use apiary::runtime::{
    ContainerDetails, ContainerOps, ContainerSummary, CreateSpec, ImageOps, LogOptions,
    PublishedPort, RuntimeError,
};
use apiary::settings::Settings;
use apiary::types::{ContainerId, DeploymentId, ImageRef, Subdomain, UserId};

pub const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

pub fn secret_box() -> SecretBox {
    SecretBox::from_hex_key(TEST_KEY).unwrap()
}

/// Settings tuned for fast test cycles; no environment reads.
pub fn test_settings(data_path: std::path::PathBuf) -> Settings {
    Settings {
        min_agent_port: 20000,
        max_agent_port: 30000,
        agent_internal_port: 18789,
        agent_memory_limit: 768 * 1024 * 1024,
        agent_cpu_nano: 750_000_000,
        agent_max_restarts: 3,
        health_check_timeout: Duration::from_secs(10),
        health_check_interval: Duration::from_millis(25),
        max_running_agents: 6,
        max_deployments: 50,
        idle_timeout: Duration::from_secs(600),
        container_prefix: "apiary-agent-".to_string(),
        data_path,
        agent_image: ImageRef::parse("openclaw/agent:latest").unwrap(),
        domain: "localhost".to_string(),
        encryption_key: TEST_KEY.to_string(),
        reminder_days: 3,
        subscription_days: 30,
        allow_plaintext_secrets: false,
        touch_throttle: Duration::from_millis(60_000),
        reaper_interval: Duration::from_secs(120),
        proxy_listen: "127.0.0.1:0".parse().unwrap(),
        docker_socket: None,
    }
}

pub fn google_secrets() -> AgentSecrets {
    AgentSecrets {
        google_api_key: Some(format!("AIza{}", "g".repeat(35))),
        web_ui_token: "gateway-token".to_string(),
        ..AgentSecrets::default()
    }
}

pub fn encrypted_bundle(secret_box: &SecretBox) -> SecretBundle {
    google_secrets().encrypt(secret_box)
}

pub fn deployment(id: &str, user: &str, subdomain: &str, secret_box: &SecretBox) -> Deployment {
    Deployment::new(
        DeploymentId::new(id),
        UserId::new(user),
        Subdomain::new(subdomain).unwrap(),
        encrypted_bundle(secret_box),
        AgentConfig::default(),
    )
}

pub fn active_user(id: &str, email: &str, expires_in_secs: i64) -> User {
    let mut user = User::new(UserId::new(id), email, AuthProvider::Email);
    user.subscription_status = SubscriptionStatus::Active;
    user.subscription_expires_at = Some(chrono::Utc::now() + chrono::Duration::seconds(expires_in_secs));
    user.max_agents = 1;
    user
}

/// In-memory stand-in for the container runtime. Records every call and can
/// be told to fail starts or report specific containers.
#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<Vec<ContainerSummary>>,
    pub image_present: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_list: AtomicBool,
    pub created: Mutex<Vec<CreateSpec>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub restarted: Mutex<Vec<String>>,
    pub pulls: AtomicUsize,
    pub pull_delay: Mutex<Duration>,
    next_id: AtomicUsize,
}

impl MockRuntime {
    pub fn with_image() -> Arc<Self> {
        let runtime = Self::default();
        runtime.image_present.store(true, Ordering::SeqCst);
        Arc::new(runtime)
    }

    /// Register a container the runtime reports as live.
    pub fn add_container(&self, id: &str, name: &str, public_port: Option<u16>) {
        let ports = public_port
            .map(|p| {
                vec![PublishedPort {
                    private_port: 18789,
                    public_port: Some(p),
                    protocol: "tcp".to_string(),
                }]
            })
            .unwrap_or_default();
        self.containers.lock().push(ContainerSummary {
            id: ContainerId::new(id),
            names: vec![format!("/{name}")],
            state: "running".to_string(),
            ports,
        });
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.removed.lock().clone()
    }

    pub fn stopped_ids(&self) -> Vec<String> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl ImageOps for MockRuntime {
    async fn image_exists(&self, _reference: &ImageRef) -> Result<bool, RuntimeError> {
        Ok(self.image_present.load(Ordering::SeqCst))
    }

    async fn pull_image(&self, _reference: &ImageRef) -> Result<(), RuntimeError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.pull_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.image_present.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ContainerOps for MockRuntime {
    async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(RuntimeError::Other("listing unavailable".to_string()));
        }
        Ok(self.containers.lock().clone())
    }

    async fn create_container(&self, spec: &CreateSpec) -> Result<ContainerId, RuntimeError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-{n}");
        self.created.lock().push(spec.clone());
        self.containers.lock().push(ContainerSummary {
            id: ContainerId::new(&id),
            names: vec![format!("/{}", spec.name)],
            state: "created".to_string(),
            ports: vec![PublishedPort {
                private_port: spec.container_port,
                public_port: Some(spec.host_port),
                protocol: "tcp".to_string(),
            }],
        });
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Other("start refused".to_string()));
        }
        self.started.lock().push(id.as_str().to_string());
        Ok(())
    }

    async fn stop_container(&self, id: &ContainerId, _grace: Duration) -> Result<(), RuntimeError> {
        self.stopped.lock().push(id.as_str().to_string());
        Ok(())
    }

    async fn restart_container(
        &self,
        id: &ContainerId,
        _grace: Duration,
    ) -> Result<(), RuntimeError> {
        self.restarted.lock().push(id.as_str().to_string());
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, _force: bool) -> Result<(), RuntimeError> {
        self.removed.lock().push(id.as_str().to_string());
        self.containers.lock().retain(|c| &c.id != id);
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetails, RuntimeError> {
        let containers = self.containers.lock();
        let found = containers
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| RuntimeError::NotFound(id.as_str().to_string()))?;
        Ok(ContainerDetails {
            id: found.id.clone(),
            name: found
                .names
                .first()
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            running: found.state == "running",
            exit_code: None,
        })
    }

    async fn container_logs(
        &self,
        _id: &ContainerId,
        _options: LogOptions,
    ) -> Result<String, RuntimeError> {
        Ok(String::new())
    }
}

/// Mailer that records deliveries instead of sending them.
#[derive(Default)]
pub struct RecordingMailer {
    pub expired: Mutex<Vec<String>>,
    pub reminders: Mutex<Vec<(String, i64)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_subscription_expired(&self, user: &User) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError("smtp refused".to_string()));
        }
        self.expired.lock().push(user.email.clone());
        Ok(())
    }

    async fn send_expiry_reminder(&self, user: &User, days_left: i64) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError("smtp refused".to_string()));
        }
        self.reminders.lock().push((user.email.clone(), days_left));
        Ok(())
    }
}
