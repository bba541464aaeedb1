//! Fleet capacity and CPU core assignment.
//!
//! Everything here is pure: the same host core count and density always
//! produce the same plan.

use crate::error::{Result, SupervisorError};

/// Servers sharing one core. Only these four densities are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    Half,
    One,
    Two,
    Three,
}

impl Density {
    pub fn as_f64(&self) -> f64 {
        match self {
            Density::Half => 0.5,
            Density::One => 1.0,
            Density::Two => 2.0,
            Density::Three => 3.0,
        }
    }
}

impl TryFrom<f64> for Density {
    type Error = SupervisorError;

    fn try_from(value: f64) -> Result<Self> {
        if value == 0.5 {
            Ok(Density::Half)
        } else if value == 1.0 {
            Ok(Density::One)
        } else if value == 2.0 {
            Ok(Density::Two)
        } else if value == 3.0 {
            Ok(Density::Three)
        } else {
            Err(SupervisorError::ConfigValidation(format!(
                "server density must be 0.5, 1, 2 or 3, got {}",
                value
            )))
        }
    }
}

/// Cores kept free for the OS and the manager itself.
pub fn reserved_cores(cpu_count: usize) -> usize {
    match cpu_count {
        0..=4 => 1,
        5..=12 => 2,
        _ => 4,
    }
}

pub fn total_allowed_servers(cpu_count: usize, density: f64) -> Result<usize> {
    let density = Density::try_from(density)?;
    let raw = (density.as_f64() * cpu_count as f64).floor() as usize;
    Ok(raw.saturating_sub(reserved_cores(cpu_count)))
}

/// Cores assigned to the 1-based `server_id`.
///
/// Instance 1 gets the highest numbered core. For densities 2 and 3 the
/// spread is only roughly even; it does not guarantee a perfect partition.
pub fn core_set(server_id: usize, density: f64, cpu_count: usize) -> Result<Vec<usize>> {
    let density = Density::try_from(density)?;
    if server_id == 0 || cpu_count == 0 {
        return Err(SupervisorError::ConfigValidation(format!(
            "cannot place server #{} on {} cores",
            server_id, cpu_count
        )));
    }

    match density {
        Density::Half => {
            let cpus = cpu_count as i64;
            let start = (cpus - server_id as i64 * 2).rem_euclid(cpus) as usize;
            Ok(vec![start, (start + 1) % cpu_count])
        }
        Density::One => reverse_index(cpu_count, server_id).map(|core| vec![core]),
        Density::Two | Density::Three => {
            let per_core = density.as_f64() as usize;
            let shared = (0..server_id).filter(|n| n % per_core == 0).count();
            reverse_index(cpu_count, shared).map(|core| vec![core])
        }
    }
}

fn reverse_index(cpu_count: usize, offset: usize) -> Result<usize> {
    cpu_count.checked_sub(offset).ok_or_else(|| {
        SupervisorError::ConfigValidation(format!(
            "core offset {} exceeds {} available cores",
            offset, cpu_count
        ))
    })
}

/// The three planner answers bound to one host.
#[derive(Debug, Clone, Copy)]
pub struct AffinityPlan {
    cpu_count: usize,
    density: Density,
}

impl AffinityPlan {
    pub fn new(cpu_count: usize, density: f64) -> Result<Self> {
        Ok(Self {
            cpu_count,
            density: Density::try_from(density)?,
        })
    }

    pub fn reserved_cores(&self) -> usize {
        reserved_cores(self.cpu_count)
    }

    pub fn total_allowed_servers(&self) -> usize {
        // density was validated in `new`
        total_allowed_servers(self.cpu_count, self.density.as_f64()).unwrap_or(0)
    }

    pub fn core_set(&self, server_id: usize) -> Result<Vec<usize>> {
        core_set(server_id, self.density.as_f64(), self.cpu_count)
    }
}
