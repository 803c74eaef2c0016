// ABOUTME: Periodic reconciliation: zombies, idle hibernation, expiry, reminders.
// ABOUTME: Four isolated passes every cycle; no pass's failure stops the others.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::mailer::Mailer;
use crate::model::{DeploymentPatch, DeploymentStatus, UserPatch};
use crate::runtime::AgentRuntime;
use crate::store::{DeploymentFilter, DeploymentStore, UserStore};

const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const HIBERNATE_PACING: Duration = Duration::from_millis(200);
const STOP_GRACE: Duration = Duration::from_secs(30);

/// The control loop reconciling store state against the runtime and the
/// subscription clock. Mutates records directly, not through the
/// orchestrator.
pub struct Reaper {
    interval: Duration,
    idle_timeout: Duration,
    reminder_days: i64,
    container_prefix: String,
    deployments: Arc<dyn DeploymentStore>,
    users: Arc<dyn UserStore>,
    runtime: Arc<dyn AgentRuntime>,
    mailer: Arc<dyn Mailer>,
    in_flight: AtomicBool,
}

impl Reaper {
    pub fn new(
        interval: Duration,
        idle_timeout: Duration,
        reminder_days: i64,
        container_prefix: String,
        deployments: Arc<dyn DeploymentStore>,
        users: Arc<dyn UserStore>,
        runtime: Arc<dyn AgentRuntime>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            interval,
            idle_timeout,
            reminder_days,
            container_prefix,
            deployments,
            users,
            runtime,
            mailer,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Start the periodic loop on its own task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One reconciliation cycle. Skipped entirely if the previous cycle is
    /// still in flight.
    pub async fn run_once(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::warn!("reaper cycle still in flight, skipping tick");
            return;
        }

        if let Err(e) = self.reconcile_zombies().await {
            tracing::error!(error = %e, "zombie reconciliation failed");
        }
        if let Err(e) = self.hibernate_idle().await {
            tracing::error!(error = %e, "idle hibernation failed");
        }
        if let Err(e) = self.expire_subscriptions().await {
            tracing::error!(error = %e, "subscription expiry failed");
        }
        if let Err(e) = self.send_reminders().await {
            tracing::error!(error = %e, "expiry reminders failed");
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Mark records whose container vanished from the runtime.
    async fn reconcile_zombies(&self) -> Result<(), String> {
        let containers = timeout(LIST_TIMEOUT, self.runtime.list_containers(true))
            .await
            .map_err(|_| "runtime listing timed out".to_string())?
            .map_err(|e| e.to_string())?;

        let live: HashSet<String> = containers
            .iter()
            .filter(|c| {
                c.names
                    .iter()
                    .any(|n| n.trim_start_matches('/').starts_with(&self.container_prefix))
            })
            .map(|c| c.id.as_str().to_string())
            .collect();

        let claimed = self
            .deployments
            .list(DeploymentFilter::with_statuses(vec![
                DeploymentStatus::Healthy,
                DeploymentStatus::Starting,
            ]))
            .await
            .map_err(|e| e.to_string())?;

        for d in claimed {
            let Some(container_id) = &d.container_id else {
                continue;
            };
            if live.contains(container_id.as_str()) {
                continue;
            }

            tracing::warn!(deployment = %d.id, container = %container_id, "container died unexpectedly");
            if let Err(e) = self
                .deployments
                .update(
                    &d.id,
                    DeploymentPatch::errored("Container died unexpectedly"),
                    None,
                )
                .await
            {
                tracing::error!(deployment = %d.id, error = %e, "failed to mark zombie");
            }
        }

        Ok(())
    }

    /// Stop and remove containers of healthy deployments idle past the
    /// timeout, leaving the record as `Stopped`.
    async fn hibernate_idle(&self) -> Result<(), String> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.idle_timeout).unwrap_or(ChronoDuration::zero());

        let idle = self
            .deployments
            .list(DeploymentFilter {
                statuses: Some(vec![DeploymentStatus::Healthy]),
                last_request_before: Some(cutoff),
                ..DeploymentFilter::default()
            })
            .await
            .map_err(|e| e.to_string())?;

        for d in idle {
            tracing::info!(deployment = %d.id, subdomain = %d.subdomain, "hibernating idle agent");

            if let Some(container_id) = &d.container_id {
                if let Err(e) = self.runtime.stop_container(container_id, STOP_GRACE).await
                    && !e.is_not_found()
                {
                    tracing::warn!(deployment = %d.id, error = %e, "hibernate stop failed");
                }
                if let Err(e) = self.runtime.remove_container(container_id, true).await
                    && !e.is_not_found()
                {
                    tracing::warn!(deployment = %d.id, error = %e, "hibernate remove failed");
                }
            }

            if let Err(e) = self
                .deployments
                .update(&d.id, DeploymentPatch::status_cleared(DeploymentStatus::Stopped), None)
                .await
            {
                tracing::error!(deployment = %d.id, error = %e, "failed to mark hibernated");
            }

            // Pace runtime calls across the fleet.
            tokio::time::sleep(HIBERNATE_PACING).await;
        }

        Ok(())
    }

    /// Expire lapsed subscriptions and cascade-stop the owner's agents.
    async fn expire_subscriptions(&self) -> Result<(), String> {
        let now = Utc::now();
        let users = self.users.list_users().await.map_err(|e| e.to_string())?;

        for user in users.iter().filter(|u| u.subscription_lapsed(now)) {
            tracing::info!(user = %user.id, "subscription expired");

            if let Err(e) = self.users.update_user(&user.id, UserPatch::expired()).await {
                tracing::error!(user = %user.id, error = %e, "failed to mark user expired");
                continue;
            }

            if let Err(e) = self.mailer.send_subscription_expired(user).await {
                tracing::warn!(user = %user.id, error = %e, "expired notice not delivered");
            }

            let running = self
                .deployments
                .list(DeploymentFilter {
                    user_id: Some(user.id.clone()),
                    statuses: Some(vec![
                        DeploymentStatus::Healthy,
                        DeploymentStatus::Starting,
                        DeploymentStatus::Provisioning,
                    ]),
                    ..DeploymentFilter::default()
                })
                .await
                .map_err(|e| e.to_string())?;

            for d in running {
                if let Some(container_id) = &d.container_id {
                    if let Err(e) = self.runtime.stop_container(container_id, STOP_GRACE).await
                        && !e.is_not_found()
                    {
                        tracing::warn!(deployment = %d.id, error = %e, "expiry stop failed");
                    }
                    if let Err(e) = self.runtime.remove_container(container_id, true).await
                        && !e.is_not_found()
                    {
                        tracing::warn!(deployment = %d.id, error = %e, "expiry remove failed");
                    }
                }

                let mut patch = DeploymentPatch::status_cleared(DeploymentStatus::Stopped);
                patch.error_message = Some(Some("Subscription expired".to_string()));
                if let Err(e) = self.deployments.update(&d.id, patch, None).await {
                    tracing::error!(deployment = %d.id, error = %e, "failed to mark expired deployment");
                }
            }
        }

        Ok(())
    }

    /// Remind users whose subscription lapses inside the reminder window.
    /// The sent flag only advances after a successful delivery.
    async fn send_reminders(&self) -> Result<(), String> {
        let now = Utc::now();
        let window_end = now + ChronoDuration::days(self.reminder_days);
        let users = self.users.list_users().await.map_err(|e| e.to_string())?;

        for user in users {
            if user.subscription_status != crate::model::SubscriptionStatus::Active
                || user.expiry_reminder_sent
            {
                continue;
            }
            let Some(expires_at) = user.subscription_expires_at else {
                continue;
            };
            if expires_at <= now || expires_at > window_end {
                continue;
            }

            let seconds_left = (expires_at - now).num_seconds();
            let days_left = (seconds_left + 86_399) / 86_400;

            match self.mailer.send_expiry_reminder(&user, days_left).await {
                Ok(()) => {
                    let patch = UserPatch {
                        expiry_reminder_sent: Some(true),
                        ..UserPatch::default()
                    };
                    if let Err(e) = self.users.update_user(&user.id, patch).await {
                        tracing::error!(user = %user.id, error = %e, "failed to mark reminder sent");
                    }
                }
                Err(e) => {
                    tracing::warn!(user = %user.id, error = %e, "reminder not delivered");
                }
            }
        }

        Ok(())
    }
}
