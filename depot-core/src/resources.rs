use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::errors::ValidationError;

/// One dimension of cluster capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Ram,
    Gpu,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Cpu, ResourceKind::Ram, ResourceKind::Gpu];
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::Ram => write!(f, "ram"),
            ResourceKind::Gpu => write!(f, "gpu"),
        }
    }
}

/// An amount of cpu, ram and gpu, used both for requests and for capacity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub ram: f64,
    pub gpu: f64,
}

impl Resources {
    pub fn new(cpu: f64, ram: f64, gpu: f64) -> Self {
        Resources { cpu, ram, gpu }
    }

    pub fn get(&self, kind: ResourceKind) -> f64 {
        match kind {
            ResourceKind::Cpu => self.cpu,
            ResourceKind::Ram => self.ram,
            ResourceKind::Gpu => self.gpu,
        }
    }

    /// Every dimension must be a finite, non-negative number.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for resource in ResourceKind::ALL {
            let value = self.get(resource);
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteResource { resource });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeResource { resource, value });
            }
        }
        Ok(())
    }

    pub fn plus(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu + other.cpu,
            ram: self.ram + other.ram,
            gpu: self.gpu + other.gpu,
        }
    }

    pub fn minus(&self, other: &Resources) -> Resources {
        Resources {
            cpu: self.cpu - other.cpu,
            ram: self.ram - other.ram,
            gpu: self.gpu - other.gpu,
        }
    }
}

impl Display for Resources {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={} ram={} gpu={}", self.cpu, self.ram, self.gpu)
    }
}
