// ABOUTME: Collision-free host port allocation for agent containers.
// ABOUTME: Union of DB, in-flight, and runtime evidence, with OS bind as the last check.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::model::{DeploymentPatch, DeploymentStatus};
use crate::runtime::AgentRuntime;
use crate::store::{DeploymentFilter, DeploymentStore, StoreError};
use crate::types::DeploymentId;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no free port in {min}..={max}")]
    Exhausted { min: u16, max: u16 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of the final conditional reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// `internal_port` written; in-flight entry cleared.
    Reserved,
    /// The record left `Configuring` (or is gone); the caller may fall back
    /// to an unconditional write.
    StatusChanged,
    /// The port lost a race (bind re-check or unique index); re-allocate.
    Collision,
}

/// Allocates host ports in a configured range.
///
/// A port is free only when it is absent from every evidence source: active
/// deployments in the store, this process's in-flight reservations, ports the
/// runtime reports as published, and finally an OS-level bind probe on both
/// loopback and the any-address.
pub struct PortAllocator {
    min: u16,
    max: u16,
    store: Arc<dyn DeploymentStore>,
    runtime: Arc<dyn AgentRuntime>,
    in_flight: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(
        min: u16,
        max: u16,
        store: Arc<dyn DeploymentStore>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Self {
        Self {
            min,
            max,
            store,
            runtime,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Allocate a bindable port, leaving its in-flight reservation intact.
    ///
    /// The reservation is cleared by [`atomic_reserve`](Self::atomic_reserve)
    /// on success or by [`release`](Self::release) on any abandonment path.
    pub async fn allocate(&self) -> Result<u16, PortError> {
        let used = self.used_ports().await?;

        for port in self.min..=self.max {
            if used.contains(&port) {
                continue;
            }

            // Reserve before probing so concurrent allocators skip this port.
            if !self.in_flight.lock().insert(port) {
                continue;
            }

            if Self::probe_bind(port).await {
                tracing::debug!(port, "allocated host port");
                return Ok(port);
            }

            self.in_flight.lock().remove(&port);
        }

        Err(PortError::Exhausted {
            min: self.min,
            max: self.max,
        })
    }

    /// Drop an in-flight reservation.
    pub fn release(&self, port: u16) {
        self.in_flight.lock().remove(&port);
    }

    /// Final reservation: re-check the OS bind, then conditionally write
    /// `internal_port` while the record is still `Configuring`. The partial
    /// unique index on `internal_port` is the authoritative guard against the
    /// window between the re-check and the write.
    ///
    /// The in-flight entry is cleared on every path.
    pub async fn atomic_reserve(
        &self,
        deployment_id: &DeploymentId,
        port: u16,
    ) -> Result<ReserveOutcome, PortError> {
        if !Self::probe_bind(port).await {
            self.release(port);
            return Ok(ReserveOutcome::Collision);
        }

        let mut patch = DeploymentPatch::default();
        patch.internal_port = Some(Some(port));

        let result = self
            .store
            .update(deployment_id, patch, Some(DeploymentStatus::Configuring))
            .await;

        self.release(port);

        match result {
            Ok(Some(_)) => Ok(ReserveOutcome::Reserved),
            Ok(None) => Ok(ReserveOutcome::StatusChanged),
            Err(e) if e.is_duplicate() => Ok(ReserveOutcome::Collision),
            Err(e) => Err(e.into()),
        }
    }

    /// Ports known used: store evidence, in-flight reservations, and ports
    /// published by any container the runtime knows about. A runtime listing
    /// failure degrades to the remaining sources; the bind probe still backs
    /// them up.
    async fn used_ports(&self) -> Result<HashSet<u16>, PortError> {
        let mut used: HashSet<u16> = HashSet::new();

        let active = self
            .store
            .list(DeploymentFilter::with_statuses(
                DeploymentStatus::ALL
                    .into_iter()
                    .filter(|s| !s.clears_container())
                    .collect::<Vec<_>>(),
            ))
            .await?;
        used.extend(active.iter().filter_map(|d| d.internal_port));

        used.extend(self.in_flight.lock().iter().copied());

        match self.runtime.list_containers(true).await {
            Ok(containers) => {
                for c in &containers {
                    used.extend(c.ports.iter().filter_map(|p| p.public_port));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "runtime port listing unavailable; relying on bind probe");
            }
        }

        Ok(used)
    }

    /// A port is only usable if it binds on loopback and the any-address.
    /// The binds are sequential; a held loopback socket would shadow the
    /// wildcard bind on some platforms.
    async fn probe_bind(port: u16) -> bool {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(l) => drop(l),
            Err(_) => return false,
        }
        TcpListener::bind(("0.0.0.0", port)).await.is_ok()
    }
}
