//! End-to-end scaling behavior through the registry.
//!
//! Drives controllers against `InMemoryResourceManager` with tokio's paused
//! clock, so cooldown and tick timing are exact.

use std::sync::Arc;
use std::time::Duration;

use scalegrid_autoscale::{ControllerEvent, ControllerRegistry};
use scalegrid_core::{
    InMemoryResourceManager, MetricsSnapshot, Priority, ScaleAction, ScalingConfig,
    ScalingConfigPatch,
};

// ── Helpers ───────────────────────────────────────────────────────

fn snapshot(utilization: f64) -> MetricsSnapshot {
    MetricsSnapshot {
        utilization,
        ..MetricsSnapshot::idle(0)
    }
}

/// min 2, max 4, target 0.75, up 0.85, down 0.50, cooldown 10s. The
/// interval is long so only forced cycles run.
fn scenario_config() -> ScalingConfig {
    ScalingConfig {
        min_units: 2,
        max_units: 4,
        target_utilization: 0.75,
        scale_up_threshold: 0.85,
        scale_down_threshold: 0.50,
        cooldown_period: Duration::from_secs(10),
        evaluation_interval: Duration::from_secs(3600),
        ..ScalingConfig::default()
    }
}

fn setup(tenant: &str, workers: u32) -> (InMemoryResourceManager, ControllerRegistry) {
    let rm = InMemoryResourceManager::new();
    rm.provision(tenant, workers, Priority::Medium);
    let registry = ControllerRegistry::new(Arc::new(rm.clone()));
    (rm, registry)
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cooldown_and_bound_scenario() {
    let (rm, reg) = setup("acme", 2);
    reg.get_for_tenant("acme", Some(scenario_config()))
        .await
        .unwrap();
    reg.start("acme").await.unwrap();
    assert_eq!(reg.status("acme").await.unwrap().current_unit_count, 2);

    // Tick 1
    rm.push_snapshot("acme", snapshot(0.92));
    let d = reg.force_evaluation("acme").await.unwrap().unwrap();
    assert_eq!(d.action, ScaleAction::ScaleUp);
    assert_eq!(d.target_unit_count, 3);

    // Tick 2, 2s later
    tokio::time::advance(Duration::from_secs(2)).await;
    rm.push_snapshot("acme", snapshot(0.93));
    let d = reg.force_evaluation("acme").await.unwrap().unwrap();
    assert_eq!(d.action, ScaleAction::Hold);
    assert_eq!(d.reason, "cooldown active");
    assert_eq!(reg.status("acme").await.unwrap().current_unit_count, 3);

    // Tick 3, 12s after tick 1
    tokio::time::advance(Duration::from_secs(10)).await;
    rm.push_snapshot("acme", snapshot(0.90));
    let d = reg.force_evaluation("acme").await.unwrap().unwrap();
    assert_eq!(d.action, ScaleAction::ScaleUp);
    assert_eq!(d.target_unit_count, 4);

    // Tick 4, past the cooldown
    tokio::time::advance(Duration::from_secs(11)).await;
    rm.push_snapshot("acme", snapshot(0.91));
    let d = reg.force_evaluation("acme").await.unwrap().unwrap();
    assert_eq!(d.action, ScaleAction::Hold);
    assert_eq!(d.reason, "at bound");

    assert_eq!(reg.status("acme").await.unwrap().current_unit_count, 4);
    assert_eq!(rm.worker_count("acme"), 4);
    assert_eq!(rm.allocation_count("acme"), 2);
    assert_eq!(reg.metrics_history("acme").await.unwrap().len(), 4);

    reg.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn timer_drives_scale_up_to_max() {
    let (rm, reg) = setup("acme", 2);
    rm.set_load("acme", snapshot(0.95));
    let config = ScalingConfig {
        cooldown_period: Duration::ZERO,
        evaluation_interval: Duration::from_secs(5),
        ..scenario_config()
    };
    reg.get_for_tenant("acme", Some(config)).await.unwrap();
    let mut events = reg.subscribe("acme").await.unwrap();
    reg.start("acme").await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    reg.stop("acme").await;

    assert_eq!(reg.status("acme").await.unwrap().current_unit_count, 4);
    assert_eq!(rm.worker_count("acme"), 4);

    let mut scaled = 0;
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::Scaled { new_unit_count, .. } = event {
            scaled += 1;
            assert!(new_unit_count <= 4);
        }
    }
    assert_eq!(scaled, 2);
}

#[tokio::test(start_paused = true)]
async fn scale_down_spares_critical_workers() {
    let rm = InMemoryResourceManager::new();
    let critical = rm.provision("acme", 2, Priority::Critical);
    let low = rm.provision("acme", 1, Priority::Low);
    let reg = ControllerRegistry::new(Arc::new(rm.clone()));
    reg.get_for_tenant("acme", Some(scenario_config()))
        .await
        .unwrap();
    reg.start("acme").await.unwrap();

    rm.push_snapshot("acme", snapshot(0.10));
    let d = reg.force_evaluation("acme").await.unwrap().unwrap();
    assert_eq!(d.action, ScaleAction::ScaleDown);

    let remaining = rm.worker_ids("acme");
    assert!(!remaining.contains(&low[0]));
    assert!(critical.iter().all(|id| remaining.contains(id)));
    reg.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn unit_count_stays_in_bounds_under_noisy_load() {
    let (rm, reg) = setup("acme", 2);
    let config = ScalingConfig {
        cooldown_period: Duration::ZERO,
        ..scenario_config()
    };
    reg.get_for_tenant("acme", Some(config)).await.unwrap();

    let loads = [0.99, 0.97, 0.1, 0.95, 0.99, 0.99, 0.0, 0.0, 0.0, 0.0, 0.92, 0.6];
    let mut previous = reg.status("acme").await.unwrap().current_unit_count;
    for u in loads {
        rm.push_snapshot("acme", snapshot(u));
        reg.force_evaluation("acme").await.unwrap();

        let current = reg.status("acme").await.unwrap().current_unit_count;
        assert!((2..=4).contains(&current), "count {current} out of bounds");
        assert!(current.abs_diff(previous) <= 1, "moved more than one step");
        assert_eq!(current as usize, rm.worker_count("acme"));
        previous = current;
    }
}

#[tokio::test(start_paused = true)]
async fn tenants_are_isolated() {
    let rm = InMemoryResourceManager::new();
    rm.provision("hot", 2, Priority::Medium);
    rm.provision("cold", 3, Priority::Medium);
    rm.set_load("hot", snapshot(0.95));
    rm.set_load("cold", snapshot(0.65));
    let reg = ControllerRegistry::with_default_config(Arc::new(rm.clone()), scenario_config())
        .unwrap();

    reg.start("hot").await.unwrap();
    reg.start("cold").await.unwrap();
    reg.force_evaluation("hot").await.unwrap();
    reg.force_evaluation("cold").await.unwrap();

    assert_eq!(reg.status("hot").await.unwrap().current_unit_count, 3);
    assert_eq!(reg.status("cold").await.unwrap().current_unit_count, 3);
    assert_eq!(rm.allocation_count("cold"), 0);

    assert!(reg.remove_for_tenant("hot").await);
    assert!(reg.status("cold").await.unwrap().is_running);
    reg.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn config_updates_stay_per_tenant() {
    let rm = InMemoryResourceManager::new();
    for tenant in ["acme", "globex"] {
        rm.provision(tenant, 2, Priority::Medium);
        rm.set_load(tenant, snapshot(0.82));
    }
    let reg = ControllerRegistry::with_default_config(Arc::new(rm.clone()), scenario_config())
        .unwrap();

    let patch = ScalingConfigPatch {
        scale_up_threshold: Some(0.8),
        max_units: Some(6),
        ..Default::default()
    };
    reg.update_config("acme", &patch).await.unwrap();

    assert_eq!(reg.status("acme").await.unwrap().config.max_units, 6);
    assert_eq!(reg.status("globex").await.unwrap().config, scenario_config());

    let acme = reg.force_evaluation("acme").await.unwrap().unwrap();
    let globex = reg.force_evaluation("globex").await.unwrap().unwrap();
    assert_eq!(acme.action, ScaleAction::ScaleUp);
    assert_eq!(globex.action, ScaleAction::Hold);
    assert_eq!(rm.worker_count("globex"), 2);
}

#[tokio::test(start_paused = true)]
async fn metrics_outage_does_not_stop_the_loop() {
    let (rm, reg) = setup("acme", 2);
    rm.set_load("acme", snapshot(0.6));
    let config = ScalingConfig {
        evaluation_interval: Duration::from_secs(5),
        ..scenario_config()
    };
    reg.get_for_tenant("acme", Some(config)).await.unwrap();
    rm.push_snapshot_failure("acme", "collector offline");
    reg.start("acme").await.unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(reg.status("acme").await.unwrap().is_running);
    assert_eq!(reg.metrics_history("acme").await.unwrap().len(), 1);
    reg.shutdown_all().await;
}
