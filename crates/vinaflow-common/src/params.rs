//! Docking search parameters.
//!
//! Every parameter has a documented default. Caller overrides are applied
//! field by field: an unset override keeps the default rather than zeroing it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VinaflowError};

/// Fully resolved parameter set for one Vina invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockingParams {
    /// Search box center, Angstrom (default: -7.0, 78.0, 38.6)
    #[serde(default = "default_center_x")]
    pub center_x: f64,
    #[serde(default = "default_center_y")]
    pub center_y: f64,
    #[serde(default = "default_center_z")]
    pub center_z: f64,

    /// Search box edge lengths, Angstrom (default: 34 x 30 x 22)
    #[serde(default = "default_size_x")]
    pub size_x: f64,
    #[serde(default = "default_size_y")]
    pub size_y: f64,
    #[serde(default = "default_size_z")]
    pub size_z: f64,

    /// Random seed (default: 0)
    #[serde(default)]
    pub seed: i64,

    /// Search exhaustiveness (default: 2)
    #[serde(default = "default_exhaustiveness")]
    pub exhaustiveness: u32,

    /// Maximum number of binding modes written (default: 10)
    #[serde(default = "default_num_modes")]
    pub num_modes: u32,

    /// Maximum energy difference from the best mode, kcal/mol (default: 10)
    #[serde(default = "default_energy_range")]
    pub energy_range: f64,
}

fn default_center_x()       -> f64 { -7.0 }
fn default_center_y()       -> f64 { 78.0 }
fn default_center_z()       -> f64 { 38.6 }
fn default_size_x()         -> f64 { 34.0 }
fn default_size_y()         -> f64 { 30.0 }
fn default_size_z()         -> f64 { 22.0 }
fn default_exhaustiveness() -> u32 { 2 }
fn default_num_modes()      -> u32 { 10 }
fn default_energy_range()   -> f64 { 10.0 }

impl Default for DockingParams {
    fn default() -> Self {
        Self {
            center_x: default_center_x(),
            center_y: default_center_y(),
            center_z: default_center_z(),
            size_x: default_size_x(),
            size_y: default_size_y(),
            size_z: default_size_z(),
            seed: 0,
            exhaustiveness: default_exhaustiveness(),
            num_modes: default_num_modes(),
            energy_range: default_energy_range(),
        }
    }
}

/// Per-request overrides. Only `Some` fields replace the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
    pub center_x: Option<f64>,
    pub center_y: Option<f64>,
    pub center_z: Option<f64>,
    pub size_x: Option<f64>,
    pub size_y: Option<f64>,
    pub size_z: Option<f64>,
    pub seed: Option<i64>,
    pub exhaustiveness: Option<u32>,
    pub num_modes: Option<u32>,
    pub energy_range: Option<f64>,
}

impl DockingParams {
    /// Apply `overrides` on top of `self`, then validate the result.
    pub fn resolve(&self, overrides: &ParamOverrides) -> Result<DockingParams> {
        let resolved = DockingParams {
            center_x: overrides.center_x.unwrap_or(self.center_x),
            center_y: overrides.center_y.unwrap_or(self.center_y),
            center_z: overrides.center_z.unwrap_or(self.center_z),
            size_x: overrides.size_x.unwrap_or(self.size_x),
            size_y: overrides.size_y.unwrap_or(self.size_y),
            size_z: overrides.size_z.unwrap_or(self.size_z),
            seed: overrides.seed.unwrap_or(self.seed),
            exhaustiveness: overrides.exhaustiveness.unwrap_or(self.exhaustiveness),
            num_modes: overrides.num_modes.unwrap_or(self.num_modes),
            energy_range: overrides.energy_range.unwrap_or(self.energy_range),
        };
        resolved.validate()?;
        Ok(resolved)
    }

    pub fn validate(&self) -> Result<()> {
        let center = [self.center_x, self.center_y, self.center_z];
        if center.iter().any(|c| !c.is_finite()) {
            return Err(VinaflowError::Config("search box center must be finite".into()));
        }
        let size = [self.size_x, self.size_y, self.size_z];
        if size.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(VinaflowError::Config(format!(
                "search box size must be positive, got {size:?}"
            )));
        }
        if self.exhaustiveness == 0 {
            return Err(VinaflowError::Config("exhaustiveness must be at least 1".into()));
        }
        if self.num_modes == 0 {
            return Err(VinaflowError::Config("num_modes must be at least 1".into()));
        }
        if !self.energy_range.is_finite() || self.energy_range <= 0.0 {
            return Err(VinaflowError::Config("energy_range must be positive".into()));
        }
        Ok(())
    }
}
