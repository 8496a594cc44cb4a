//! Relative timesteps
//!
//! Dependencies reference their source data at a timestep relative to the one
//! being simulated. `Previous`-offset dependencies are exempt from cycle
//! checks: they read what the source wrote in the prior timestep.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Offset of a dependency relative to the current timestep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeTimestep {
    /// The timestep currently being simulated
    #[default]
    Current,
    /// The timestep before the current one
    Previous,
    /// The first timestep of the model run
    Base,
}

impl RelativeTimestep {
    /// Resolve against a model run's timestep sequence.
    ///
    /// `Previous` at the first timestep has no in-run resolution; callers
    /// fall back to initial conditions in that case.
    pub fn resolve_relative_to(&self, timestep: i32, timesteps: &[i32]) -> Result<i32> {
        if timesteps.is_empty() {
            return Err(Error::EmptyTimesteps);
        }
        let index = timesteps
            .iter()
            .position(|&t| t == timestep)
            .ok_or(Error::TimestepNotInRun { timestep })?;
        match self {
            RelativeTimestep::Current => Ok(timestep),
            RelativeTimestep::Base => Ok(timesteps[0]),
            RelativeTimestep::Previous => {
                if index == 0 {
                    Err(Error::NoPreviousTimestep { timestep })
                } else {
                    Ok(timesteps[index - 1])
                }
            }
        }
    }
}
