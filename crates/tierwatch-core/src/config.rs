use crate::error::{Result, TierwatchError};
use crate::paths;
use crate::policy::{EscalationPolicy, PolicyConfig};
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Scheduler trigger period for `tierwatch daemon`.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Tickets escalated within this window are not evaluated again.
    #[serde(default = "default_window")]
    pub window_seconds: u64,
    /// Timebox for one ticket's re-read + conditional write.
    #[serde(default = "default_ticket_timeout")]
    pub ticket_timeout_seconds: u64,
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Decisions past this cap are deferred to the next run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_escalations_per_run: Option<usize>,
    /// Run reports kept in the run log; older ones are pruned after each run.
    #[serde(default = "default_keep_reports")]
    pub keep_reports: usize,
}

fn default_interval() -> u64 {
    900
}

fn default_window() -> u64 {
    900
}

fn default_ticket_timeout() -> u64 {
    30
}

fn default_lease_ttl() -> u64 {
    600
}

fn default_max_concurrency() -> usize {
    8
}

fn default_keep_reports() -> usize {
    500
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            window_seconds: default_window(),
            ticket_timeout_seconds: default_ticket_timeout(),
            lease_ttl_seconds: default_lease_ttl(),
            max_concurrency: default_max_concurrency(),
            max_escalations_per_run: None,
            keep_reports: default_keep_reports(),
        }
    }
}

impl RunConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono_secs(self.window_seconds)
    }

    pub fn ticket_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ticket_timeout_seconds)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono_secs(self.lease_ttl_seconds)
    }
}

/// Upper bound on run durations read from config: ten years.
pub const MAX_RUN_SECONDS: u64 = 10 * 366 * 24 * 60 * 60;

fn chrono_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

// ---------------------------------------------------------------------------
// OwnerDirectory
// ---------------------------------------------------------------------------

/// Who owns each tier. Lookup order: category override, global default,
/// then the support fallback address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerDirectory {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<Tier, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<String, BTreeMap<Tier, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl OwnerDirectory {
    pub fn owner_for(&self, category: &str, tier: Tier) -> Option<String> {
        self.categories
            .get(category)
            .and_then(|tiers| tiers.get(&tier))
            .or_else(|| self.defaults.get(&tier))
            .or(self.fallback.as_ref())
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// NotificationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// When set, notifications are POSTed here as JSON; otherwise logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_attempts: default_max_attempts(),
            timeout_seconds: default_webhook_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub owners: OwnerDirectory,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            policy: PolicyConfig::default(),
            run: RunConfig::default(),
            owners: OwnerDirectory::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(TierwatchError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Write the default config unless one exists. Returns true if written.
    pub fn init(root: &Path) -> Result<bool> {
        let data = format!(
            "# tierwatch escalation config\n{}",
            serde_yaml::to_string(&Config::default())?
        );
        crate::io::write_if_missing(&paths::config_path(root), data.as_bytes())
    }

    /// Build the validated policy table for one run.
    pub fn policy(&self) -> Result<EscalationPolicy> {
        EscalationPolicy::from_config(&self.policy)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // 1. The ladder itself: structural errors, then gaps
        match self.policy() {
            Ok(policy) => {
                for (priority, tier) in policy.gaps() {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "no rule for {priority} tickets at {tier}: they will be reported as policy gaps and never escalated"
                        ),
                    });
                }
            }
            Err(e) => warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: e.to_string(),
            }),
        }

        // 2. Run parameters that would stall or disable a run
        if self.run.max_concurrency == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "run.max_concurrency must be at least 1".to_string(),
            });
        }
        if self.run.ticket_timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "run.ticket_timeout_seconds must be at least 1".to_string(),
            });
        }
        for (key, secs) in [
            ("run.window_seconds", self.run.window_seconds),
            ("run.lease_ttl_seconds", self.run.lease_ttl_seconds),
            ("run.ticket_timeout_seconds", self.run.ticket_timeout_seconds),
            ("run.interval_seconds", self.run.interval_seconds),
        ] {
            if secs > MAX_RUN_SECONDS {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("{key} is {secs} (max {MAX_RUN_SECONDS})"),
                });
            }
        }
        if self.run.max_escalations_per_run == Some(0) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "run.max_escalations_per_run is 0: every decision will be deferred"
                    .to_string(),
            });
        }
        if self.run.keep_reports == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "run.keep_reports is 0: no run history is kept".to_string(),
            });
        }
        if self.run.window_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "run.window_seconds is 0: overlapping runs are guarded only by version checks"
                    .to_string(),
            });
        }
        if self.run.lease_ttl_seconds < self.run.ticket_timeout_seconds {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "run.lease_ttl_seconds ({}) is shorter than one ticket timeout ({}s)",
                    self.run.lease_ttl_seconds, self.run.ticket_timeout_seconds
                ),
            });
        }

        // 3. Owners: tiers an escalation can reach should resolve for any category
        for &tier in Tier::all()
            .iter()
            .filter(|t| **t > Tier::L1 && **t <= self.policy.max_tier)
        {
            if !self.owners.defaults.contains_key(&tier) && self.owners.fallback.is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "no default owner for {tier} ({}): incoming-owner notifications are skipped for categories without an override",
                        tier.role()
                    ),
                });
            }
        }
        for category in self.owners.categories.keys() {
            if paths::validate_category(category).is_err() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("owners.categories key '{category}' is not a valid category"),
                });
            }
        }

        // 4. Notifications
        if let Some(url) = &self.notifications.webhook_url {
            if url.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "notifications.webhook_url is empty".to_string(),
                });
            }
        }
        if self.notifications.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "notifications.max_attempts must be at least 1".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn owned() -> Config {
        let mut cfg = Config::default();
        cfg.owners.fallback = Some("support@example.com".into());
        cfg
    }

    #[test]
    fn minimal_yaml_gets_defaults() {
        let cfg: Config = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(cfg.run.interval_seconds, 900);
        assert_eq!(cfg.run.max_concurrency, 8);
        assert_eq!(cfg.policy.max_tier, Tier::L4);
        assert_eq!(cfg.policy.rules.len(), 12);
        assert_eq!(cfg.notifications.max_attempts, 3);
        assert!(cfg.run.max_escalations_per_run.is_none());
        assert_eq!(cfg.run.keep_reports, 500);
    }

    #[test]
    fn yaml_policy_and_owners_parse() {
        let yaml = r#"
version: 1
policy:
  max_tier: L3
  rules:
    - priority: high
      tier: L1
      threshold_minutes: 120
      next: L2
    - priority: high
      tier: L2
      threshold_minutes: 240
      next: L3
owners:
  defaults:
    L3: director@example.com
  categories:
    billing:
      L2: billing-lead@example.com
  fallback: support@example.com
run:
  max_escalations_per_run: 25
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let policy = cfg.policy().unwrap();
        assert_eq!(policy.max_tier(), Tier::L3);
        assert!(policy.rule_for(Priority::High, Tier::L2).is_some());
        assert_eq!(cfg.run.max_escalations_per_run, Some(25));
        assert_eq!(
            cfg.owners.owner_for("billing", Tier::L2).as_deref(),
            Some("billing-lead@example.com")
        );
    }

    #[test]
    fn owner_lookup_falls_back_in_order() {
        let mut owners = OwnerDirectory::default();
        owners.defaults.insert(Tier::L4, "director@example.com".into());
        owners
            .categories
            .entry("billing".into())
            .or_default()
            .insert(Tier::L2, "billing-lead@example.com".into());

        assert_eq!(
            owners.owner_for("billing", Tier::L2).as_deref(),
            Some("billing-lead@example.com")
        );
        assert_eq!(
            owners.owner_for("billing", Tier::L4).as_deref(),
            Some("director@example.com")
        );
        assert_eq!(owners.owner_for("billing", Tier::L3), None);

        owners.fallback = Some("support@example.com".into());
        assert_eq!(
            owners.owner_for("shipping", Tier::L3).as_deref(),
            Some("support@example.com")
        );
    }

    #[test]
    fn init_writes_loadable_defaults_once() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::init(dir.path()).unwrap());
        assert!(!Config::init(dir.path()).unwrap());

        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.policy.rules.len(), 12);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = owned();
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.owners.fallback.as_deref(), Some("support@example.com"));
        assert_eq!(loaded.policy.rules, cfg.policy.rules);
    }

    #[test]
    fn load_without_config_is_not_initialized() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(TierwatchError::NotInitialized)
        ));
    }

    #[test]
    fn validate_default_with_fallback_is_clean() {
        assert!(owned().validate().is_empty());
    }

    #[test]
    fn validate_reports_policy_gaps_as_warnings() {
        let mut cfg = owned();
        cfg.policy.rules.retain(|r| r.priority != Priority::Low);
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
        assert!(warnings[0].message.contains("low tickets at L1"));
    }

    #[test]
    fn validate_reports_broken_ladder_as_error() {
        let mut cfg = owned();
        cfg.policy.rules.push(cfg.policy.rules[0].clone());
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("duplicate")));
    }

    #[test]
    fn validate_flags_unowned_tiers() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.message.contains("no default owner"))
                .count(),
            3
        );
    }

    #[test]
    fn validate_flags_oversized_run_durations() {
        let mut cfg = owned();
        cfg.run.window_seconds = u64::MAX;
        cfg.run.lease_ttl_seconds = MAX_RUN_SECONDS + 1;
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("run.window_seconds"));
        assert!(errors[1].message.contains("run.lease_ttl_seconds"));

        assert_eq!(cfg.run.window(), chrono::Duration::MAX);
        assert!(cfg.run.lease_ttl() > chrono::Duration::zero());
    }

    #[test]
    fn validate_flags_zero_concurrency() {
        let mut cfg = owned();
        cfg.run.max_concurrency = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("max_concurrency")));
    }
}
