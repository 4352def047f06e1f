//! Switching Profiles
//!
//! One profile per tenant, created lazily from the default template. The
//! source tenant's profile carries switch statistics; the target tenant's
//! preferences decide preloading and cache warming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tenancy_common::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    DataPreload,
    CacheWarming,
    PredictiveCaching,
    ResourcePersistence,
    BackgroundSync,
}

impl Optimization {
    /// Enabled in this order by the optimizer
    pub const LADDER: [Optimization; 3] = [
        Optimization::PredictiveCaching,
        Optimization::ResourcePersistence,
        Optimization::BackgroundSync,
    ];

    /// Estimated switch-time saving in milliseconds
    pub fn estimated_improvement_ms(&self) -> u64 {
        match self {
            Self::PredictiveCaching => 150,
            Self::ResourcePersistence => 100,
            Self::BackgroundSync => 50,
            Self::DataPreload | Self::CacheWarming => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchPreferences {
    pub preload_data: bool,
    pub warm_cache: bool,
    pub predictive_caching: bool,
    pub resource_persistence: bool,
    pub background_sync: bool,
}

impl Default for SwitchPreferences {
    fn default() -> Self {
        Self {
            preload_data: false,
            warm_cache: true,
            predictive_caching: false,
            resource_persistence: false,
            background_sync: false,
        }
    }
}

impl SwitchPreferences {
    fn enabled(&self, optimization: Optimization) -> bool {
        match optimization {
            Optimization::DataPreload => self.preload_data,
            Optimization::CacheWarming => self.warm_cache,
            Optimization::PredictiveCaching => self.predictive_caching,
            Optimization::ResourcePersistence => self.resource_persistence,
            Optimization::BackgroundSync => self.background_sync,
        }
    }

    fn enable(&mut self, optimization: Optimization) {
        match optimization {
            Optimization::DataPreload => self.preload_data = true,
            Optimization::CacheWarming => self.warm_cache = true,
            Optimization::PredictiveCaching => self.predictive_caching = true,
            Optimization::ResourcePersistence => self.resource_persistence = true,
            Optimization::BackgroundSync => self.background_sync = true,
        }
    }

    /// Ladder optimizations currently on
    pub fn active_ladder(&self) -> Vec<Optimization> {
        Optimization::LADDER.into_iter().filter(|o| self.enabled(*o)).collect()
    }
}

/// Rolling switch statistics. Counters only grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchStatistics {
    pub total_switches: u64,
    pub successful_switches: u64,
    pub failed_switches: u64,
    pub total_switch_ms: u64,
    /// `total_switch_ms / successful_switches`
    pub average_switch_ms: f64,
    /// Switch count per target tenant
    pub patterns: HashMap<TenantId, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchingProfile {
    pub tenant_id: TenantId,
    pub preferences: SwitchPreferences,
    pub target_switch_ms: u64,
    pub statistics: SwitchStatistics,
    pub updated_at: DateTime<Utc>,
}

impl SwitchingProfile {
    pub fn new(tenant_id: TenantId, target_switch_ms: u64) -> Self {
        Self {
            tenant_id,
            preferences: SwitchPreferences::default(),
            target_switch_ms,
            statistics: SwitchStatistics::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn record_success(&mut self, target: &TenantId, switch_ms: u64) {
        let stats = &mut self.statistics;
        stats.total_switches += 1;
        stats.successful_switches += 1;
        stats.total_switch_ms += switch_ms;
        stats.average_switch_ms = stats.total_switch_ms as f64 / stats.successful_switches as f64;
        *stats.patterns.entry(target.clone()).or_insert(0) += 1;
        self.updated_at = Utc::now();
    }

    pub fn record_failure(&mut self, target: &TenantId) {
        let stats = &mut self.statistics;
        stats.total_switches += 1;
        stats.failed_switches += 1;
        *stats.patterns.entry(target.clone()).or_insert(0) += 1;
        self.updated_at = Utc::now();
    }

    /// Enable ladder optimizations while the projected average stays above
    /// target, then lower the target by the estimated saving (never below
    /// `floor_ms`).
    pub fn optimize(&mut self, floor_ms: u64) -> OptimizationReport {
        let average = self.statistics.average_switch_ms;
        let previous_target_ms = self.target_switch_ms;
        let mut projected = average;
        let mut applied = Vec::new();

        if average > previous_target_ms as f64 {
            for optimization in Optimization::LADDER {
                if projected <= previous_target_ms as f64 {
                    break;
                }
                if self.preferences.enabled(optimization) {
                    continue;
                }
                self.preferences.enable(optimization);
                projected -= optimization.estimated_improvement_ms() as f64;
                applied.push(optimization);
            }
        }

        let estimated_improvement_ms: u64 = applied.iter().map(|o| o.estimated_improvement_ms()).sum();
        if !applied.is_empty() {
            self.target_switch_ms = previous_target_ms.saturating_sub(estimated_improvement_ms).max(floor_ms);
            self.updated_at = Utc::now();
        }

        OptimizationReport {
            tenant_id: self.tenant_id.clone(),
            average_switch_ms: average,
            applied,
            estimated_improvement_ms,
            previous_target_ms,
            new_target_ms: self.target_switch_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub tenant_id: TenantId,
    pub average_switch_ms: f64,
    pub applied: Vec<Optimization>,
    pub estimated_improvement_ms: u64,
    pub previous_target_ms: u64,
    pub new_target_ms: u64,
}
