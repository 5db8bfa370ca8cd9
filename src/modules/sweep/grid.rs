//! Expansion of encoder parameter ranges into the set of encode jobs for a source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::modules::jobs::model::EncodeParameters;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("invalid {axis} range: min {min} is greater than max {max}")]
    InvalidRange { axis: &'static str, min: i32, max: i32 },
    #[error("invalid {axis} step {step}: must be positive")]
    InvalidStep { axis: &'static str, step: i32 },
    #[error("invalid range `{0}`: expected `min:max` or `min:max:step`")]
    InvalidFormat(String),
    #[error("grid has {size} combinations, more than the limit of {limit}")]
    TooLarge { size: u64, limit: usize },
}

/// Default cap on the number of jobs one sweep may create.
pub const DEFAULT_MAX_GRID_SIZE: usize = 10_000;

fn default_step() -> i32 {
    1
}

/// Inclusive range of one encoder parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ParameterRange {
    pub min: i32,
    pub max: i32,
    #[serde(default = "default_step")]
    pub step: i32,
}

impl ParameterRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max, step: 1 }
    }

    pub fn with_step(mut self, step: i32) -> Self {
        self.step = step;
        self
    }

    /// Number of values on this axis, validating the range first.
    fn cardinality(&self, axis: &'static str) -> Result<u64, GridError> {
        if self.min > self.max {
            return Err(GridError::InvalidRange {
                axis,
                min: self.min,
                max: self.max,
            });
        }
        if self.step <= 0 {
            return Err(GridError::InvalidStep {
                axis,
                step: self.step,
            });
        }

        let span = i64::from(self.max) - i64::from(self.min);
        Ok(span.unsigned_abs() / u64::from(self.step.unsigned_abs()) + 1)
    }

    fn values(&self) -> impl Iterator<Item = i32> + '_ {
        std::iter::successors(Some(self.min), |&v| v.checked_add(self.step))
            .take_while(|&v| v <= self.max)
    }
}

impl fmt::Display for ParameterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step == 1 {
            write!(f, "{}:{}", self.min, self.max)
        } else {
            write!(f, "{}:{}:{}", self.min, self.max, self.step)
        }
    }
}

impl FromStr for ParameterRange {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GridError::InvalidFormat(s.to_string());
        let parts = s
            .split(':')
            .map(|p| p.trim().parse::<i32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        match parts.as_slice() {
            [min, max] => Ok(Self::new(*min, *max)),
            [min, max, step] => Ok(Self::new(*min, *max).with_step(*step)),
            _ => Err(invalid()),
        }
    }
}

/// Per-parameter ranges of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GridSpec {
    pub quantization: ParameterRange,
    pub rate_control: ParameterRange,
}

impl GridSpec {
    /// Number of combinations the grid expands to.
    pub fn size(&self) -> Result<u64, GridError> {
        let quantization = self.quantization.cardinality("quantization")?;
        let rate_control = self.rate_control.cardinality("rate_control")?;
        Ok(quantization.saturating_mul(rate_control))
    }
}

/// Expands `grid_spec` into every parameter combination, sorted by
/// `(quantization, rate_control_factor)` with duplicates removed.
///
/// Ranges and the size limit are checked before anything is allocated, so an
/// invalid or oversized grid never yields a partial result.
pub fn generate(grid_spec: &GridSpec, limit: usize) -> Result<Vec<EncodeParameters>, GridError> {
    let size = grid_spec.size()?;
    if size > limit as u64 {
        return Err(GridError::TooLarge { size, limit });
    }

    let rate_control: Vec<i32> = grid_spec.rate_control.values().collect();
    let mut grid: Vec<EncodeParameters> = grid_spec
        .quantization
        .values()
        .flat_map(|q| {
            rate_control
                .iter()
                .map(move |&rc| EncodeParameters::new(q, rc))
        })
        .collect();

    grid.sort_unstable();
    grid.dedup();
    Ok(grid)
}
