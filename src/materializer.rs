// ABOUTME: Writes per-deployment config files and workspace directories.
// ABOUTME: The container consumes these through bind mounts; writes are idempotent.

use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::model::AgentSecrets;
use crate::types::{DeploymentId, ModelRef};

/// Where the data directory lands inside the container.
pub const AGENT_DATA_MOUNT: &str = "/home/node/.openclaw";

/// Where the config directory lands inside the container.
pub const AGENT_CONFIG_MOUNT: &str = "/config";

/// Host-side paths produced for one deployment.
#[derive(Debug, Clone)]
pub struct MaterializedPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub struct ConfigMaterializer {
    data_path: PathBuf,
    gateway_port: u16,
}

impl ConfigMaterializer {
    pub fn new(data_path: PathBuf, gateway_port: u16) -> Self {
        Self {
            data_path,
            gateway_port,
        }
    }

    pub fn config_dir(&self, id: &DeploymentId) -> PathBuf {
        self.data_path.join(id.as_str()).join("config")
    }

    pub fn data_dir(&self, id: &DeploymentId) -> PathBuf {
        self.data_path.join(id.as_str()).join("data")
    }

    /// Create the directory tree and write every config artifact.
    pub async fn materialize(
        &self,
        id: &DeploymentId,
        secrets: &AgentSecrets,
        model: &ModelRef,
    ) -> std::io::Result<MaterializedPaths> {
        let config_dir = self.config_dir(id);
        let data_dir = self.data_dir(id);
        let workspace = data_dir.join("workspace");
        let memory_dir = workspace.join("memory");
        let agent_dir = data_dir.join("agents").join("main").join("agent");
        let legacy_agent_dir = data_dir.join("agent");

        for dir in [
            &config_dir,
            &data_dir,
            &memory_dir,
            &agent_dir,
            &legacy_agent_dir,
        ] {
            fs::create_dir_all(dir).await?;
        }

        self.write_agent_config(&config_dir, secrets, model).await?;

        let profiles = auth_profiles(secrets);
        for dir in [&agent_dir, &legacy_agent_dir] {
            write_private(&dir.join("auth-profiles.json"), &profiles).await?;
        }

        self.seed_memory(&memory_dir).await?;

        chown_tree(&self.data_path.join(id.as_str())).await;

        Ok(MaterializedPaths {
            config_dir,
            data_dir,
        })
    }

    /// Recursively delete the deployment's on-host tree.
    pub async fn remove_tree(&self, id: &DeploymentId) -> std::io::Result<()> {
        let root = self.data_path.join(id.as_str());
        match fs::remove_dir_all(&root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn write_agent_config(
        &self,
        config_dir: &Path,
        secrets: &AgentSecrets,
        model: &ModelRef,
    ) -> std::io::Result<()> {
        let telegram_enabled = secrets.telegram_bot_token.is_some();

        let mut telegram = json!({
            "enabled": telegram_enabled,
            "dmPolicy": "open",
            "groupPolicy": "open",
            "allowFrom": ["*"],
        });
        if let Some(token) = &secrets.telegram_bot_token {
            telegram["botToken"] = json!(token);
        }

        let document = json!({
            "agents": {
                "defaults": {
                    "model": { "primary": model.as_str() },
                    "workspace": format!("{AGENT_DATA_MOUNT}/workspace"),
                }
            },
            "gateway": {
                "port": self.gateway_port,
                "auth": {
                    "mode": "token",
                    "token": secrets.web_ui_token,
                }
            },
            "channels": {
                "telegram": telegram,
            },
            "plugins": {
                "entries": {
                    "telegram": { "enabled": telegram_enabled }
                }
            }
        });

        write_private(&config_dir.join("openclaw.json"), &document).await
    }

    async fn seed_memory(&self, memory_dir: &Path) -> std::io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d");
        let path = memory_dir.join(format!("{today}.md"));
        fs::write(&path, format!("# Memory log {today}\n")).await?;
        set_mode(&path, 0o644).await;
        Ok(())
    }
}

/// Auth profile entries for every present vendor key.
fn auth_profiles(secrets: &AgentSecrets) -> serde_json::Value {
    let mut profiles = serde_json::Map::new();
    let entries = [
        ("google:default", "google", &secrets.google_api_key),
        ("anthropic:default", "anthropic", &secrets.anthropic_api_key),
        ("openai:default", "openai", &secrets.openai_api_key),
    ];
    for (name, provider, key) in entries {
        if let Some(key) = key {
            profiles.insert(
                name.to_string(),
                json!({ "provider": provider, "apiKey": key }),
            );
        }
    }
    json!({ "profiles": profiles })
}

async fn write_private(path: &Path, document: &serde_json::Value) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(document)?;
    fs::write(path, body).await?;
    set_mode(path, 0o600).await;
    Ok(())
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to set file mode");
    }
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) {}

/// Best-effort ownership handoff to the in-container agent user.
#[cfg(unix)]
async fn chown_tree(root: &Path) {
    let root = root.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            if let Err(e) = std::os::unix::fs::chown(&dir, Some(1000), Some(1000)) {
                tracing::warn!(path = %dir.display(), error = %e, "chown failed");
            }
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                        pending.push(entry.path());
                    }
                }
            }
        }
    })
    .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "chown walk panicked");
    }
}

#[cfg(not(unix))]
async fn chown_tree(_root: &Path) {}
