//! Emulator configuration
//!
//! ```text
//! SIMT_RECONVERGENCE=tf-sorted-stack   # ipdom | barrier | tf-gen6 | tf-sorted-stack
//! SIMT_CTA_SIZE=32
//! SIMT_MAX_STEPS=1000000
//! ```

use crate::error::{ReconvergenceError, Result};
use crate::mechanism::MechanismType;
use std::env;

pub const DEFAULT_CTA_SIZE: usize = 32;
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Settings for emulating CTAs
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Reconvergence mechanism each CTA uses
    pub mechanism: MechanismType,

    /// Lanes per CTA
    pub cta_size: usize,

    /// Dynamic instruction budget per CTA
    pub max_steps: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            mechanism: MechanismType::Ipdom,
            cta_size: DEFAULT_CTA_SIZE,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl EmulatorConfig {
    pub fn new(mechanism: MechanismType, cta_size: usize) -> Self {
        Self {
            mechanism,
            cta_size,
            ..Self::default()
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Defaults overridden by `SIMT_RECONVERGENCE`, `SIMT_CTA_SIZE` and `SIMT_MAX_STEPS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(label) = env::var("SIMT_RECONVERGENCE") {
            config.mechanism = label.parse()?;
        }
        if let Ok(size) = env::var("SIMT_CTA_SIZE") {
            config.cta_size = size
                .trim()
                .parse()
                .map_err(|_| ReconvergenceError::InvalidConfig(format!("SIMT_CTA_SIZE={size} is not a lane count")))?;
        }
        if let Ok(steps) = env::var("SIMT_MAX_STEPS") {
            config.max_steps = steps
                .trim()
                .parse()
                .map_err(|_| ReconvergenceError::InvalidConfig(format!("SIMT_MAX_STEPS={steps} is not a count")))?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mechanism == MechanismType::Unknown {
            return Err(ReconvergenceError::UnknownMechanismType(self.mechanism.to_string()));
        }
        if self.cta_size == 0 {
            return Err(ReconvergenceError::InvalidConfig("cta_size must be at least 1".to_string()));
        }
        if self.max_steps == 0 {
            return Err(ReconvergenceError::InvalidConfig("max_steps must be at least 1".to_string()));
        }
        Ok(())
    }
}
