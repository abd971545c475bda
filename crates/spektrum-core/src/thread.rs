//! # Scan Thread Spawning
//!
//! Spawns the background scan thread with a name and, on Linux, optional
//! SCHED_FIFO priority and CPU pinning.
//!
//! Elevated scheduling needs CAP_SYS_NICE or root. Without it the thread
//! still runs at normal priority and a warning is logged.
//!
//! ```rust,no_run
//! use spektrum_core::thread::{spawn_scan_thread, ScanPriority, ScanThreadConfig};
//!
//! let config = ScanThreadConfig::builder()
//!     .name("sweep")
//!     .priority(ScanPriority::High)
//!     .cpu_affinity(&[2])
//!     .build();
//!
//! let handle = spawn_scan_thread(&config, || 42).unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//! ```

use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Scheduling priority of the scan thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPriority {
    /// Default OS scheduling
    #[default]
    Normal,
    /// SCHED_FIFO 20
    Low,
    /// SCHED_FIFO 50
    Medium,
    /// SCHED_FIFO 80
    High,
    /// Explicit SCHED_FIFO value, clamped to 1-99
    Custom(i32),
}

impl ScanPriority {
    /// Convert to a Linux SCHED_FIFO priority (0 means no real-time policy).
    pub fn to_linux_priority(self) -> i32 {
        match self {
            ScanPriority::Normal => 0,
            ScanPriority::Low => 20,
            ScanPriority::Medium => 50,
            ScanPriority::High => 80,
            ScanPriority::Custom(p) => p.clamp(1, 99),
        }
    }

    pub fn is_realtime(&self) -> bool {
        !matches!(self, ScanPriority::Normal)
    }
}

/// Settings for the scan thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanThreadConfig {
    /// Thread name shown in debuggers and `top -H`
    pub name: String,
    pub priority: ScanPriority,
    /// CPU cores to pin to (empty = no pinning)
    pub cpu_affinity: Vec<usize>,
    /// Stack size in bytes (0 = platform default)
    pub stack_size: usize,
}

impl Default for ScanThreadConfig {
    fn default() -> Self {
        Self {
            name: "spektrum-scan".to_string(),
            priority: ScanPriority::Normal,
            cpu_affinity: Vec::new(),
            stack_size: 0,
        }
    }
}

impl ScanThreadConfig {
    pub fn builder() -> ScanThreadConfigBuilder {
        ScanThreadConfigBuilder::default()
    }
}

/// Builder for [`ScanThreadConfig`].
#[derive(Debug, Default)]
pub struct ScanThreadConfigBuilder {
    config: ScanThreadConfig,
}

impl ScanThreadConfigBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn priority(mut self, priority: ScanPriority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn cpu_affinity(mut self, cpus: &[usize]) -> Self {
        self.config.cpu_affinity = cpus.to_vec();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    pub fn build(self) -> ScanThreadConfig {
        self.config
    }
}

/// Spawn the scan thread.
///
/// Priority and affinity are applied from inside the new thread; failures
/// there are logged and the thread keeps running.
///
/// # Errors
///
/// Returns [`ScanError::ThreadSpawn`] if the OS refuses to create the thread.
pub fn spawn_scan_thread<F, T>(config: &ScanThreadConfig, f: F) -> ScanResult<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let mut builder = thread::Builder::new().name(config.name.clone());
    if config.stack_size > 0 {
        builder = builder.stack_size(config.stack_size);
    }

    let priority = config.priority;
    let affinity = config.cpu_affinity.clone();

    builder
        .spawn(move || {
            apply_scheduling(priority, &affinity);
            f()
        })
        .map_err(|e| ScanError::ThreadSpawn(e.to_string()))
}

fn apply_scheduling(priority: ScanPriority, affinity: &[usize]) {
    if priority.is_realtime() {
        if let Err(e) = set_thread_priority(priority) {
            tracing::warn!("Failed to set scan thread priority: {}", e);
        }
    }
    if !affinity.is_empty() {
        if let Err(e) = set_cpu_affinity(affinity) {
            tracing::warn!("Failed to set scan thread CPU affinity: {}", e);
        }
    }
}

#[cfg(target_os = "linux")]
fn set_thread_priority(priority: ScanPriority) -> std::io::Result<()> {
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority.to_linux_priority();
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_thread_priority(_priority: ScanPriority) -> std::io::Result<()> {
    tracing::debug!("Real-time priority not supported on this platform");
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_cpu_affinity(cpus: &[usize]) -> std::io::Result<()> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &cpu in cpus {
            if cpu < libc::CPU_SETSIZE as usize {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_cpu_affinity(_cpus: &[usize]) -> std::io::Result<()> {
    tracing::debug!("CPU affinity not supported on this platform");
    Ok(())
}
