//! Host memory probes.

use parking_lot::Mutex;
use sysinfo::System;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Reports memory currently available for new work, in MB.
#[cfg_attr(test, mockall::automock)]
pub trait MemoryProbe: Send + Sync {
    /// Available memory in MB.
    fn available_mb(&self) -> u64;
}

/// Reads available memory from the host.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    /// Creates a probe for the current host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMemoryProbe").finish_non_exhaustive()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn available_mb(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.available_memory() / BYTES_PER_MB
    }
}

/// A fixed memory budget.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub u64);

impl MemoryProbe for FixedMemoryProbe {
    fn available_mb(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_probe() {
        assert_eq!(FixedMemoryProbe(2048).available_mb(), 2048);
    }

    #[test]
    fn test_system_probe_reports_something() {
        let probe = SystemMemoryProbe::new();
        assert!(probe.available_mb() > 0);
    }
}
