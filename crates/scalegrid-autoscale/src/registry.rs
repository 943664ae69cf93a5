//! Tenant registry: the single owner of per-tenant controllers.
//!
//! Creation happens under the map lock, so concurrent first access for
//! the same tenant yields one controller, never two.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::{error, info};

use scalegrid_core::{
    ControllerStatus, MetricsSnapshot, ResourceManager, ScalingConfig, ScalingConfigPatch,
    ScalingDecision, TenantId, WorkerId, WorkerWorkload,
};
use scalegrid_metrics::TenantReport;

use crate::controller::Controller;
use crate::error::{ScaleError, ScaleResult};
use crate::events::ControllerEvent;

pub struct ControllerRegistry {
    resources: Arc<dyn ResourceManager>,
    default_config: ScalingConfig,
    controllers: Mutex<HashMap<TenantId, Controller>>,
}

impl ControllerRegistry {
    pub fn new(resources: Arc<dyn ResourceManager>) -> Self {
        Self {
            resources,
            default_config: ScalingConfig::default(),
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// Use `default_config` for tenants resolved without an explicit config.
    pub fn with_default_config(
        resources: Arc<dyn ResourceManager>,
        default_config: ScalingConfig,
    ) -> ScaleResult<Self> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            ..Self::new(resources)
        })
    }

    /// Return the tenant's controller, creating it on first access.
    ///
    /// `config` only applies on creation; an existing controller keeps
    /// its current config.
    pub async fn get_for_tenant(
        &self,
        tenant_id: &str,
        config: Option<ScalingConfig>,
    ) -> ScaleResult<Controller> {
        let mut controllers = self.controllers.lock().await;
        match controllers.entry(tenant_id.to_string()) {
            Entry::Occupied(entry) => {
                // Removal takes the entry out before retiring it.
                if entry.get().is_retired() {
                    error!(tenant = %tenant_id, "registry still maps a removed controller");
                    return Err(ScaleError::DuplicateController(tenant_id.to_string()));
                }
                Ok(entry.get().clone())
            }
            Entry::Vacant(slot) => {
                let config = config.unwrap_or_else(|| self.default_config.clone());
                let controller = Controller::new(tenant_id, config, Arc::clone(&self.resources))?;
                info!(tenant = %tenant_id, "controller created");
                Ok(slot.insert(controller).clone())
            }
        }
    }

    /// Existing controller, without creating one.
    pub async fn get(&self, tenant_id: &str) -> Option<Controller> {
        self.controllers.lock().await.get(tenant_id).cloned()
    }

    /// Stop and discard the tenant's controller. Returns whether one existed.
    ///
    /// Handles to the removed controller that callers still hold can no
    /// longer start it.
    pub async fn remove_for_tenant(&self, tenant_id: &str) -> bool {
        let removed = self.controllers.lock().await.remove(tenant_id);
        match removed {
            Some(controller) => {
                controller.retire().await;
                info!(tenant = %tenant_id, "controller removed");
                true
            }
            None => false,
        }
    }

    /// Registered tenant ids, sorted.
    pub async fn tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.controllers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every loop. Controllers stay registered.
    pub async fn shutdown_all(&self) {
        let controllers: Vec<Controller> =
            self.controllers.lock().await.values().cloned().collect();
        for controller in &controllers {
            controller.stop().await;
        }
        info!(count = controllers.len(), "all controllers stopped");
    }

    /// Status and latest snapshot for every tenant, sorted by tenant id.
    pub async fn reports(&self) -> Vec<TenantReport> {
        let mut controllers: Vec<Controller> =
            self.controllers.lock().await.values().cloned().collect();
        controllers.sort_by(|a, b| a.tenant_id().cmp(b.tenant_id()));

        let mut reports = Vec::with_capacity(controllers.len());
        for controller in &controllers {
            reports.push(controller.report().await);
        }
        reports
    }

    // ── Tenant-keyed operations ───────────────────────────────────

    pub async fn start(&self, tenant_id: &str) -> ScaleResult<()> {
        self.get_for_tenant(tenant_id, None).await?.start().await;
        Ok(())
    }

    /// Stop the tenant's loop if it has a controller.
    pub async fn stop(&self, tenant_id: &str) {
        if let Some(controller) = self.get(tenant_id).await {
            controller.stop().await;
        }
    }

    pub async fn update_config(
        &self,
        tenant_id: &str,
        patch: &ScalingConfigPatch,
    ) -> ScaleResult<ScalingConfig> {
        self.get_for_tenant(tenant_id, None)
            .await?
            .update_config(patch)
    }

    pub async fn status(&self, tenant_id: &str) -> ScaleResult<ControllerStatus> {
        Ok(self.get_for_tenant(tenant_id, None).await?.status().await)
    }

    pub async fn current_metrics(&self, tenant_id: &str) -> ScaleResult<Option<MetricsSnapshot>> {
        Ok(self
            .get_for_tenant(tenant_id, None)
            .await?
            .current_metrics()
            .await)
    }

    pub async fn metrics_history(&self, tenant_id: &str) -> ScaleResult<Vec<MetricsSnapshot>> {
        Ok(self
            .get_for_tenant(tenant_id, None)
            .await?
            .metrics_history()
            .await)
    }

    pub async fn workloads(
        &self,
        tenant_id: &str,
    ) -> ScaleResult<HashMap<WorkerId, WorkerWorkload>> {
        Ok(self.get_for_tenant(tenant_id, None).await?.workloads().await)
    }

    pub async fn force_evaluation(&self, tenant_id: &str) -> ScaleResult<Option<ScalingDecision>> {
        self.get_for_tenant(tenant_id, None)
            .await?
            .force_evaluation()
            .await
    }

    pub async fn subscribe(
        &self,
        tenant_id: &str,
    ) -> ScaleResult<broadcast::Receiver<ControllerEvent>> {
        Ok(self.get_for_tenant(tenant_id, None).await?.subscribe())
    }
}
