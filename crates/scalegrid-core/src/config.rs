//! Scaling configuration and the `scalegrid.toml` daemon config.
//!
//! `ScalingConfig` is the validated, effective configuration a controller
//! reads every cycle. `ScalingConfigPatch` is the partial form accepted by
//! `update_config` and by the config file; applying a patch either yields a
//! new valid config or an error, never a half-applied one.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::TenantId;

/// Ceiling for every configured duration. The control loop schedules
/// deadlines off these, so they must stay well inside `Instant` range.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Effective autoscaling parameters for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingConfig {
    pub min_units: u32,
    pub max_units: u32,
    pub target_utilization: f64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    /// Minimum gap between two accepted scaling actions.
    #[serde(with = "duration_str")]
    pub cooldown_period: Duration,
    #[serde(with = "duration_str")]
    pub evaluation_interval: Duration,
    pub latency_threshold_ms: f64,
    pub queue_threshold: u64,
    pub power_budget_watts: f64,
    /// Capacity of the metrics and decision histories.
    pub history_capacity: usize,
    /// Upper bound on any single resource manager call.
    #[serde(with = "duration_str")]
    pub call_timeout: Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_units: 1,
            max_units: 10,
            target_utilization: 0.75,
            scale_up_threshold: 0.85,
            scale_down_threshold: 0.50,
            cooldown_period: Duration::from_secs(60),
            evaluation_interval: Duration::from_secs(30),
            latency_threshold_ms: 500.0,
            queue_threshold: 100,
            power_budget_watts: 10_000.0,
            history_capacity: 100,
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl ScalingConfig {
    /// Check bounds, threshold ordering, and durations.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_units == 0 || self.max_units == 0 || self.min_units > self.max_units {
            return Err(ConfigError::InvalidBounds {
                min: self.min_units,
                max: self.max_units,
            });
        }

        let (down, target, up) = (
            self.scale_down_threshold,
            self.target_utilization,
            self.scale_up_threshold,
        );
        let ordered = down.is_finite()
            && target.is_finite()
            && up.is_finite()
            && down >= 0.0
            && down < target
            && target < up
            && up <= 1.0;
        if !ordered {
            return Err(ConfigError::InvalidThreshold { down, target, up });
        }

        for (field, value, zero_ok) in [
            ("evaluation_interval", self.evaluation_interval, false),
            ("call_timeout", self.call_timeout, false),
            ("cooldown_period", self.cooldown_period, true),
        ] {
            if (value.is_zero() && !zero_ok) || value > MAX_DURATION {
                return Err(ConfigError::InvalidDuration {
                    field,
                    value: format_duration(value),
                });
            }
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.latency_threshold_ms.is_finite() && self.latency_threshold_ms > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "latency_threshold_ms",
                reason: format!("must be a positive number, got {}", self.latency_threshold_ms),
            });
        }
        if self.queue_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue_threshold",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.power_budget_watts.is_finite() && self.power_budget_watts >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "power_budget_watts",
                reason: format!("must be non-negative, got {}", self.power_budget_watts),
            });
        }
        Ok(())
    }

    /// Merge a patch over this config and validate the result.
    ///
    /// `self` is left untouched either way.
    pub fn apply_patch(&self, patch: &ScalingConfigPatch) -> ConfigResult<ScalingConfig> {
        let mut next = self.clone();

        if let Some(v) = patch.min_units {
            next.min_units = v;
        }
        if let Some(v) = patch.max_units {
            next.max_units = v;
        }
        if let Some(v) = patch.target_utilization {
            next.target_utilization = v;
        }
        if let Some(v) = patch.scale_up_threshold {
            next.scale_up_threshold = v;
        }
        if let Some(v) = patch.scale_down_threshold {
            next.scale_down_threshold = v;
        }
        if let Some(s) = &patch.cooldown_period {
            next.cooldown_period = parse_field("cooldown_period", s)?;
        }
        if let Some(s) = &patch.evaluation_interval {
            next.evaluation_interval = parse_field("evaluation_interval", s)?;
        }
        if let Some(v) = patch.latency_threshold_ms {
            next.latency_threshold_ms = v;
        }
        if let Some(v) = patch.queue_threshold {
            next.queue_threshold = v;
        }
        if let Some(v) = patch.power_budget_watts {
            next.power_budget_watts = v;
        }
        if let Some(v) = patch.history_capacity {
            next.history_capacity = v;
        }
        if let Some(s) = &patch.call_timeout {
            next.call_timeout = parse_field("call_timeout", s)?;
        }

        next.validate()?;
        Ok(next)
    }
}

/// Partial scaling configuration. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScalingConfigPatch {
    pub min_units: Option<u32>,
    pub max_units: Option<u32>,
    pub target_utilization: Option<f64>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    /// Duration string, e.g. "30s" or "5m".
    pub cooldown_period: Option<String>,
    pub evaluation_interval: Option<String>,
    pub latency_threshold_ms: Option<f64>,
    pub queue_threshold: Option<u64>,
    pub power_budget_watts: Option<f64>,
    pub history_capacity: Option<usize>,
    pub call_timeout: Option<String>,
}

// ── Daemon config file ────────────────────────────────────────────

/// Top-level `scalegrid.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Applied over the built-in defaults for every tenant.
    #[serde(default)]
    pub defaults: ScalingConfigPatch,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

/// One tenant entry in the daemon config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: TenantId,
    /// Units provisioned before the controller starts.
    #[serde(default = "default_initial_workers")]
    pub initial_workers: u32,
    /// Tenant-specific overrides applied after `defaults`.
    #[serde(default)]
    pub scaling: ScalingConfigPatch,
    #[serde(default)]
    pub load: LoadProfile,
}

/// Synthetic demand curve used by the daemon's simulated pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadProfile {
    /// Mean demand in requests per minute.
    pub base: f64,
    /// Peak deviation from `base` in requests per minute.
    pub amplitude: f64,
    /// Length of one demand cycle, e.g. "10m".
    pub period: String,
    /// Requests per minute one unit can serve at full utilization.
    pub unit_capacity: f64,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            base: 600.0,
            amplitude: 400.0,
            period: "10m".to_string(),
            unit_capacity: 200.0,
        }
    }
}

fn default_initial_workers() -> u32 {
    1
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: DaemonConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check tenant ids, load profiles, and every effective scaling config.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "tenants.id",
                    reason: "tenant id must not be empty".to_string(),
                });
            }
            if !seen.insert(tenant.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "tenants.id",
                    reason: format!("duplicate tenant id {:?}", tenant.id),
                });
            }
            parse_field("load.period", &tenant.load.period)?;
            if !(tenant.load.unit_capacity.is_finite() && tenant.load.unit_capacity > 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: "load.unit_capacity",
                    reason: format!("must be positive for tenant {:?}", tenant.id),
                });
            }
            self.tenant_scaling(tenant)?;
        }
        Ok(())
    }

    /// Built-in defaults with `[defaults]` applied.
    pub fn base_scaling(&self) -> ConfigResult<ScalingConfig> {
        ScalingConfig::default().apply_patch(&self.defaults)
    }

    /// Effective scaling config for one tenant.
    pub fn tenant_scaling(&self, tenant: &TenantConfig) -> ConfigResult<ScalingConfig> {
        self.base_scaling()?.apply_patch(&tenant.scaling)
    }

    /// A small two-tenant config for first-time setup.
    pub fn scaffold() -> Self {
        DaemonConfig {
            defaults: ScalingConfigPatch {
                cooldown_period: Some("30s".to_string()),
                evaluation_interval: Some("10s".to_string()),
                ..Default::default()
            },
            tenants: vec![
                TenantConfig {
                    id: "acme".to_string(),
                    initial_workers: 2,
                    scaling: ScalingConfigPatch {
                        min_units: Some(2),
                        max_units: Some(8),
                        ..Default::default()
                    },
                    load: LoadProfile::default(),
                },
                TenantConfig {
                    id: "globex".to_string(),
                    initial_workers: 1,
                    scaling: ScalingConfigPatch::default(),
                    load: LoadProfile {
                        base: 150.0,
                        amplitude: 100.0,
                        period: "5m".to_string(),
                        unit_capacity: 200.0,
                    },
                },
            ],
        }
    }
}

// ── Durations ─────────────────────────────────────────────────────

/// Parse a duration string like "500ms", "30s", "5m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Render a duration in the shortest exact unit `parse_duration` accepts.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms != 0 && ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

fn parse_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        super::parse_duration(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid duration: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ScalingConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_min_above_max() {
        let cfg = ScalingConfig {
            min_units: 5,
            max_units: 2,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidBounds { min: 5, max: 2 })
        );
    }

    #[test]
    fn rejects_zero_bounds() {
        let cfg = ScalingConfig {
            min_units: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBounds { .. })));
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let cfg = ScalingConfig {
            scale_down_threshold: 0.8,
            target_utilization: 0.75,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let cfg = ScalingConfig {
            scale_up_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn rejects_zero_interval() {
        let cfg = ScalingConfig {
            evaluation_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidDuration {
                field: "evaluation_interval",
                ..
            })
        ));
    }

    #[test]
    fn rejects_durations_past_a_day() {
        let cfg = ScalingConfig {
            evaluation_interval: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidDuration {
                field: "evaluation_interval",
                ..
            })
        ));

        let cfg = ScalingConfig {
            cooldown_period: MAX_DURATION + Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidDuration {
                field: "cooldown_period",
                ..
            })
        ));

        let cfg = ScalingConfig {
            call_timeout: MAX_DURATION,
            evaluation_interval: MAX_DURATION,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_cooldown_is_allowed() {
        let cfg = ScalingConfig {
            cooldown_period: Duration::ZERO,
            ..Default::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn patch_merges_and_validates() {
        let base = ScalingConfig::default();
        let patch = ScalingConfigPatch {
            max_units: Some(4),
            cooldown_period: Some("10s".to_string()),
            ..Default::default()
        };
        let next = base.apply_patch(&patch).unwrap();
        assert_eq!(next.max_units, 4);
        assert_eq!(next.cooldown_period, Duration::from_secs(10));
        assert_eq!(next.min_units, base.min_units);
    }

    #[test]
    fn invalid_patch_leaves_original_untouched() {
        let base = ScalingConfig::default();
        let patch = ScalingConfigPatch {
            scale_up_threshold: Some(0.6),
            ..Default::default()
        };
        assert!(base.apply_patch(&patch).is_err());
        assert_eq!(base, ScalingConfig::default());
    }

    #[test]
    fn patch_with_bad_duration_is_rejected() {
        let patch = ScalingConfigPatch {
            cooldown_period: Some("soon".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ScalingConfig::default().apply_patch(&patch),
            Err(ConfigError::InvalidDuration {
                field: "cooldown_period",
                value: "soon".to_string(),
            })
        );
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn parse_duration_rejects_overflowing_minutes() {
        assert_eq!(parse_duration("307445734561825862m"), None);

        let patch = ScalingConfigPatch {
            evaluation_interval: Some("307445734561825862m".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ScalingConfig::default().apply_patch(&patch),
            Err(ConfigError::InvalidDuration {
                field: "evaluation_interval",
                value: "307445734561825862m".to_string(),
            })
        );
    }

    #[test]
    fn format_duration_round_trips() {
        for d in [
            Duration::ZERO,
            Duration::from_millis(250),
            Duration::from_secs(45),
            Duration::from_secs(120),
        ] {
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }

    #[test]
    fn scaling_config_serializes_durations_as_strings() {
        let json = serde_json::to_value(ScalingConfig::default()).unwrap();
        assert_eq!(json["cooldown_period"], "1m");
        assert_eq!(json["call_timeout"], "5s");
    }

    #[test]
    fn parse_daemon_config() {
        let toml_str = r#"
[defaults]
cooldown_period = "10s"

[[tenants]]
id = "acme"
initial_workers = 2

[tenants.scaling]
min_units = 2
max_units = 4

[[tenants]]
id = "globex"
"#;
        let config = DaemonConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.tenants.len(), 2);

        let acme = config.tenant_scaling(&config.tenants[0]).unwrap();
        assert_eq!(acme.min_units, 2);
        assert_eq!(acme.max_units, 4);
        assert_eq!(acme.cooldown_period, Duration::from_secs(10));

        let globex = config.tenant_scaling(&config.tenants[1]).unwrap();
        assert_eq!(globex.max_units, 10);
        assert_eq!(config.tenants[1].initial_workers, 1);
    }

    #[test]
    fn daemon_config_rejects_duplicate_tenants() {
        let toml_str = r#"
[[tenants]]
id = "acme"

[[tenants]]
id = "acme"
"#;
        assert!(matches!(
            DaemonConfig::from_toml_str(toml_str),
            Err(ConfigError::InvalidValue { field: "tenants.id", .. })
        ));
    }

    #[test]
    fn daemon_config_rejects_invalid_tenant_scaling() {
        let toml_str = r#"
[[tenants]]
id = "acme"

[tenants.scaling]
min_units = 9
max_units = 3
"#;
        assert!(matches!(
            DaemonConfig::from_toml_str(toml_str),
            Err(ConfigError::InvalidBounds { min: 9, max: 3 })
        ));
    }

    #[test]
    fn scaffold_is_valid_and_serializes() {
        let config = DaemonConfig::scaffold();
        config.validate().unwrap();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("acme"));
        assert!(toml_str.contains("globex"));
    }
}
