//! Model hyperparameters.
//!
//! ```rust,ignore
//! use lattix_mmkge::ModelConfig;
//!
//! let config = ModelConfig::default()
//!     .with_dim(250)
//!     .with_margin(12.0);
//!
//! // Or from a JSON file written by the experiment runner
//! let config = ModelConfig::from_json_file("configs/fb15k.json")?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyperparameters of the multimodal RotatE model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Complex dimension (default: 100). Entities are `2 * dim` wide, relations `dim`.
    pub dim: usize,
    /// Score margin (default: 6.0).
    pub margin: f32,
    /// Slack added to the margin when sizing the init range (default: 2.0).
    pub epsilon: f32,
    /// Seed for the structural and relation tables (default: 42).
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dim: 100,
            margin: 6.0,
            epsilon: 2.0,
            seed: 42,
        }
    }
}

impl ModelConfig {
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Entity embedding width (real and imaginary halves).
    pub fn entity_dim(&self) -> usize {
        self.dim * 2
    }

    /// Relation embedding width (one phase per complex component).
    pub fn relation_dim(&self) -> usize {
        self.dim
    }

    /// Uniform init bound for the structural entity table.
    pub fn entity_embedding_range(&self) -> f32 {
        (self.margin + self.epsilon) / self.entity_dim() as f32
    }

    /// Uniform init bound for the relation table, also the phase scale.
    pub fn relation_embedding_range(&self) -> f32 {
        (self.margin + self.epsilon) / self.relation_dim() as f32
    }

    /// Check that the configuration can build a model.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidConfig("dim must be positive".into()));
        }
        if !self.margin.is_finite() || !self.epsilon.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "margin ({}) and epsilon ({}) must be finite",
                self.margin, self.epsilon
            )));
        }
        if self.margin + self.epsilon <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "margin + epsilon must be positive, got {}",
                self.margin + self.epsilon
            )));
        }
        Ok(())
    }
}
