//! Escalation policy: the (priority, tier) → (threshold, next tier) ladder.
//!
//! `PolicyConfig` is the serialized form stored in `config.yaml`.
//! `EscalationPolicy` is the validated lookup table built from it once per run.
//! A missing (priority, tier) entry is a policy gap: it is reported, never
//! defaulted to "escalate now" or "never escalate".

use crate::error::{Result, TierwatchError};
use crate::types::{Priority, Tier};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// EscalationRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub priority: Priority,
    pub tier: Tier,
    /// Maximum dwell time at `tier` before escalation is due.
    pub threshold_minutes: u64,
    /// Tier reached when the threshold is breached.
    pub next: Tier,
}

impl EscalationRule {
    pub fn new(priority: Priority, tier: Tier, threshold_minutes: u64, next: Tier) -> Self {
        Self {
            priority,
            tier,
            threshold_minutes,
            next,
        }
    }

    /// Dwell threshold as a duration. Saturates instead of wrapping for
    /// values `from_config` would reject.
    pub fn threshold(&self) -> Duration {
        i64::try_from(self.threshold_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or(Duration::MAX)
    }
}

/// Upper bound on `threshold_minutes`: ten years.
pub const MAX_THRESHOLD_MINUTES: u64 = 10 * 366 * 24 * 60;

// ---------------------------------------------------------------------------
// PolicyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Terminal tier for automatic escalation.
    #[serde(default = "default_max_tier")]
    pub max_tier: Tier,
    #[serde(default = "default_rules")]
    pub rules: Vec<EscalationRule>,
}

fn default_max_tier() -> Tier {
    Tier::L4
}

/// Dwell thresholds per priority, in minutes, for L1, L2 and L3.
const DEFAULT_LADDER: &[(Priority, [u64; 3])] = &[
    (Priority::Urgent, [30, 120, 480]),
    (Priority::High, [120, 1_440, 2_880]),
    (Priority::Medium, [480, 2_880, 5_760]),
    (Priority::Low, [1_440, 4_320, 10_080]),
];

fn default_rules() -> Vec<EscalationRule> {
    let mut rules = Vec::new();
    for (priority, minutes) in DEFAULT_LADDER {
        for (tier, threshold) in [Tier::L1, Tier::L2, Tier::L3].into_iter().zip(minutes) {
            if let Some(next) = tier.next() {
                rules.push(EscalationRule::new(*priority, tier, *threshold, next));
            }
        }
    }
    rules
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_tier: default_max_tier(),
            rules: default_rules(),
        }
    }
}

// ---------------------------------------------------------------------------
// EscalationPolicy
// ---------------------------------------------------------------------------

/// Validated, immutable lookup table for one run.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    max_tier: Tier,
    rules: BTreeMap<(Priority, Tier), EscalationRule>,
}

impl EscalationPolicy {
    /// Build the lookup table, rejecting rules that would break the ladder.
    ///
    /// Errors on: duplicate (priority, tier) pairs, rules whose `next` does
    /// not advance, rules targeting a tier beyond `max_tier`, rules defined
    /// at or above `max_tier` (which is terminal), and thresholds above
    /// [`MAX_THRESHOLD_MINUTES`].
    pub fn from_config(cfg: &PolicyConfig) -> Result<Self> {
        let mut rules = BTreeMap::new();
        for rule in &cfg.rules {
            if rule.threshold_minutes > MAX_THRESHOLD_MINUTES {
                return Err(TierwatchError::InvalidPolicy(format!(
                    "rule for {} at {} has threshold_minutes {} (max {})",
                    rule.priority, rule.tier, rule.threshold_minutes, MAX_THRESHOLD_MINUTES
                )));
            }
            if rule.tier >= cfg.max_tier {
                return Err(TierwatchError::InvalidPolicy(format!(
                    "rule for {} at {} is at or past max tier {}",
                    rule.priority, rule.tier, cfg.max_tier
                )));
            }
            if rule.next <= rule.tier {
                return Err(TierwatchError::InvalidPolicy(format!(
                    "rule for {} at {} must advance, but next is {}",
                    rule.priority, rule.tier, rule.next
                )));
            }
            if rule.next > cfg.max_tier {
                return Err(TierwatchError::InvalidPolicy(format!(
                    "rule for {} at {} targets {} beyond max tier {}",
                    rule.priority, rule.tier, rule.next, cfg.max_tier
                )));
            }
            if rules
                .insert((rule.priority, rule.tier), rule.clone())
                .is_some()
            {
                return Err(TierwatchError::InvalidPolicy(format!(
                    "duplicate rule for {} at {}",
                    rule.priority, rule.tier
                )));
            }
        }
        Ok(Self {
            max_tier: cfg.max_tier,
            rules,
        })
    }

    pub fn max_tier(&self) -> Tier {
        self.max_tier
    }

    pub fn rule_for(&self, priority: Priority, tier: Tier) -> Option<&EscalationRule> {
        self.rules.get(&(priority, tier))
    }

    /// Rules ordered by priority then tier.
    pub fn rules(&self) -> impl Iterator<Item = &EscalationRule> {
        self.rules.values()
    }

    /// Every non-terminal (priority, tier) pair that has no rule.
    pub fn gaps(&self) -> Vec<(Priority, Tier)> {
        let mut gaps = Vec::new();
        for &priority in Priority::all() {
            for &tier in Tier::all().iter().filter(|t| **t < self.max_tier) {
                if !self.rules.contains_key(&(priority, tier)) {
                    gaps.push((priority, tier));
                }
            }
        }
        gaps
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_a_total_ladder() {
        let policy = EscalationPolicy::from_config(&PolicyConfig::default()).unwrap();
        assert_eq!(policy.max_tier(), Tier::L4);
        assert!(policy.gaps().is_empty());
        assert_eq!(policy.rules().count(), 12);

        let high_l1 = policy.rule_for(Priority::High, Tier::L1).unwrap();
        assert_eq!(high_l1.threshold(), Duration::hours(2));
        assert_eq!(high_l1.next, Tier::L2);
        assert!(policy.rule_for(Priority::High, Tier::L4).is_none());
    }

    #[test]
    fn duplicate_rule_is_rejected() {
        let cfg = PolicyConfig {
            max_tier: Tier::L4,
            rules: vec![
                EscalationRule::new(Priority::Low, Tier::L1, 60, Tier::L2),
                EscalationRule::new(Priority::Low, Tier::L1, 90, Tier::L2),
            ],
        };
        let err = EscalationPolicy::from_config(&cfg).unwrap_err();
        assert!(matches!(err, TierwatchError::InvalidPolicy(m) if m.contains("duplicate")));
    }

    #[test]
    fn non_advancing_rule_is_rejected() {
        let cfg = PolicyConfig {
            max_tier: Tier::L4,
            rules: vec![EscalationRule::new(Priority::Low, Tier::L2, 60, Tier::L2)],
        };
        assert!(EscalationPolicy::from_config(&cfg).is_err());
    }

    #[test]
    fn rules_past_max_tier_are_rejected() {
        let beyond = PolicyConfig {
            max_tier: Tier::L3,
            rules: vec![EscalationRule::new(Priority::Low, Tier::L2, 60, Tier::L4)],
        };
        assert!(EscalationPolicy::from_config(&beyond).is_err());

        let at_terminal = PolicyConfig {
            max_tier: Tier::L3,
            rules: vec![EscalationRule::new(Priority::Low, Tier::L3, 60, Tier::L4)],
        };
        assert!(EscalationPolicy::from_config(&at_terminal).is_err());
    }

    #[test]
    fn gaps_respect_configured_max_tier() {
        let cfg = PolicyConfig {
            max_tier: Tier::L2,
            rules: vec![EscalationRule::new(Priority::High, Tier::L1, 60, Tier::L2)],
        };
        let policy = EscalationPolicy::from_config(&cfg).unwrap();
        let gaps = policy.gaps();
        assert_eq!(gaps.len(), 3);
        assert!(gaps.contains(&(Priority::Low, Tier::L1)));
        assert!(!gaps.iter().any(|(_, t)| *t >= Tier::L2));
    }

    #[test]
    fn oversized_threshold_is_rejected() {
        for minutes in [u64::MAX, 1_000_000_000_000, MAX_THRESHOLD_MINUTES + 1] {
            let cfg = PolicyConfig {
                max_tier: Tier::L4,
                rules: vec![EscalationRule::new(Priority::High, Tier::L1, minutes, Tier::L2)],
            };
            let err = EscalationPolicy::from_config(&cfg).unwrap_err();
            assert!(
                matches!(&err, TierwatchError::InvalidPolicy(m) if m.contains("threshold_minutes")),
                "{minutes}: {err}"
            );
        }

        let cfg = PolicyConfig {
            max_tier: Tier::L4,
            rules: vec![EscalationRule::new(
                Priority::High,
                Tier::L1,
                MAX_THRESHOLD_MINUTES,
                Tier::L2,
            )],
        };
        assert!(EscalationPolicy::from_config(&cfg).is_ok());
    }

    #[test]
    fn threshold_saturates_instead_of_wrapping() {
        let rule = EscalationRule::new(Priority::High, Tier::L1, u64::MAX, Tier::L2);
        assert_eq!(rule.threshold(), Duration::MAX);
        assert!(rule.threshold() > Duration::zero());
    }

    #[test]
    fn skipping_rule_is_allowed() {
        let cfg = PolicyConfig {
            max_tier: Tier::L4,
            rules: vec![EscalationRule::new(Priority::Urgent, Tier::L1, 15, Tier::L3)],
        };
        let policy = EscalationPolicy::from_config(&cfg).unwrap();
        assert_eq!(
            policy.rule_for(Priority::Urgent, Tier::L1).unwrap().next,
            Tier::L3
        );
    }
}
