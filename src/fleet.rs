//! Fleet seed files.
//!
//! A TOML file listing assets with their plans, used to bootstrap a store:
//!
//! ```toml
//! [[asset]]
//! name = "Excavator 320"
//! tag = "EX-01"
//! usage_baseline = 1200.0
//!
//! [[asset.plan]]
//! name = "250h service"
//! interval_value = 250.0
//! priority = "high"
//!
//! [[asset.plan.material]]
//! material_id = 7
//! quantity = 12.5
//! unit = "l"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::*;
use crate::schedule::Scheduler;

#[derive(Debug, Clone, Deserialize)]
pub struct Fleet {
    #[serde(default)]
    pub asset: Vec<FleetAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetAsset {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub usage_baseline: f64,
    #[serde(default)]
    pub cumulative_usage: Option<f64>,
    #[serde(default)]
    pub plan: Vec<FleetPlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetPlan {
    pub name: String,
    pub interval_value: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub material: Vec<PlanMaterial>,
    #[serde(default)]
    pub labor: Vec<PlanLabor>,
}

fn default_active() -> bool {
    true
}

/// What a seed run registered.
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
    pub assets: Vec<Asset>,
    pub plans: usize,
}

impl FleetAsset {
    fn to_new_asset(&self) -> NewAsset {
        NewAsset {
            name: self.name.clone(),
            tag: self.tag.clone(),
            usage_baseline: self.usage_baseline,
            cumulative_usage: self.cumulative_usage,
        }
    }
}

impl FleetPlan {
    fn to_new_plan(&self) -> NewPlan {
        NewPlan {
            name: self.name.clone(),
            interval_value: self.interval_value,
            active: self.active,
            priority: self.priority,
            estimated_hours: self.estimated_hours,
            materials: self.material.clone(),
            labor: self.labor.clone(),
        }
    }
}

impl Fleet {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad fleet file: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read fleet file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Check every entry before anything is written.
    pub fn validate(&self) -> Result<()> {
        for asset in &self.asset {
            asset
                .to_new_asset()
                .validate()
                .map_err(|e| Error::Validation(format!("asset '{}': {e}", asset.name)))?;
            for plan in &asset.plan {
                plan.to_new_plan().validate().map_err(|e| {
                    Error::Validation(format!("asset '{}', plan '{}': {e}", asset.name, plan.name))
                })?;
            }
        }
        Ok(())
    }

    /// Register every asset and plan through the scheduler.
    pub async fn apply(&self, scheduler: &Scheduler) -> Result<SeedReport> {
        self.validate()?;
        let mut report = SeedReport::default();
        for entry in &self.asset {
            let asset = scheduler.register_asset(entry.to_new_asset()).await?;
            for plan in &entry.plan {
                scheduler.register_plan(asset.id, plan.to_new_plan()).await?;
                report.plans += 1;
            }
            report.assets.push(asset);
        }
        Ok(report)
    }
}
