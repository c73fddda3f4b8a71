//! Staleness thresholds shared by the memory and disk layers

use std::time::Duration;
use thiserror::Error;

/// Default memory TTL: five minutes
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(5 * 60);

/// Default disk TTL: seven days
pub const DEFAULT_DISK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors raised when building a staleness policy
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The memory layer would claim freshness the disk layer does not honor
    #[error("memory TTL ({memory:?}) must not exceed disk TTL ({disk:?})")]
    MemoryExceedsDisk { memory: Duration, disk: Duration },

    #[error("TTLs must be greater than zero")]
    ZeroTtl,
}

/// Memory and disk validity windows
///
/// Invariant: `memory_ttl <= disk_ttl`, checked on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    memory_ttl: Duration,
    disk_ttl: Duration,
}

impl StalenessPolicy {
    pub fn new(memory_ttl: Duration, disk_ttl: Duration) -> Result<Self, PolicyError> {
        if memory_ttl.is_zero() || disk_ttl.is_zero() {
            return Err(PolicyError::ZeroTtl);
        }
        if memory_ttl > disk_ttl {
            return Err(PolicyError::MemoryExceedsDisk {
                memory: memory_ttl,
                disk: disk_ttl,
            });
        }
        Ok(Self {
            memory_ttl,
            disk_ttl,
        })
    }

    pub fn memory_ttl(&self) -> Duration {
        self.memory_ttl
    }

    pub fn disk_ttl(&self) -> Duration {
        self.disk_ttl
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            memory_ttl: DEFAULT_MEMORY_TTL,
            disk_ttl: DEFAULT_DISK_TTL,
        }
    }
}
