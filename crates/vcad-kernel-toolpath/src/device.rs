//! Compute device handle and capability reporting.
//!
//! A [`Device`] hands out [`DeviceLease`]s, one per live compute context.
//! Accelerators that can only host a few contexts at once are modelled with
//! [`Device::with_context_limit`]; acquiring past the limit fails with
//! [`ToolpathError::ResourceUnavailable`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ToolpathError};

/// Default buffer ceiling reported by the CPU backend (1 GiB).
pub const CPU_MAX_BUFFER_SIZE: u64 = 1 << 30;

/// Memory and dispatch limits of a compute backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    /// Backend name.
    pub name: String,
    /// Largest buffer in 4-byte elements.
    pub max_buffer_elements: u64,
    /// Largest buffer in bytes.
    pub max_buffer_size: u64,
    /// Largest dispatch along one dimension.
    pub max_workgroups_per_dimension: u32,
    /// Hardware threads available.
    pub logical_cores: usize,
}

impl DeviceCapabilities {
    /// Capabilities of the host CPU backend.
    pub fn cpu() -> Self {
        Self::with_buffer_size("cpu", CPU_MAX_BUFFER_SIZE)
    }

    /// Capabilities with a given buffer ceiling in bytes.
    pub fn with_buffer_size(name: &str, max_buffer_size: u64) -> Self {
        Self {
            name: name.to_string(),
            max_buffer_elements: max_buffer_size / 4,
            max_buffer_size,
            max_workgroups_per_dimension: 65_535,
            logical_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Shared handle to a compute backend.
#[derive(Debug, Clone)]
pub struct Device {
    caps: Arc<DeviceCapabilities>,
    live: Arc<AtomicUsize>,
    context_limit: Option<usize>,
}

impl Device {
    /// The host CPU backend.
    pub fn cpu() -> Self {
        Self::with_capabilities(DeviceCapabilities::cpu())
    }

    /// A backend reporting `caps`.
    pub fn with_capabilities(caps: DeviceCapabilities) -> Self {
        Self {
            caps: Arc::new(caps),
            live: Arc::new(AtomicUsize::new(0)),
            context_limit: None,
        }
    }

    /// Allow at most `limit` contexts to be live at once.
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    /// Capabilities queried at creation.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    /// Number of contexts currently holding a lease.
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Reserve a context slot on the device.
    pub fn acquire(&self) -> Result<DeviceLease> {
        let mut current = self.live.load(Ordering::Acquire);
        loop {
            if let Some(limit) = self.context_limit {
                if current >= limit {
                    return Err(ToolpathError::ResourceUnavailable(format!(
                        "{} already has {current} of {limit} contexts in use",
                        self.caps.name
                    )));
                }
            }
            match self.live.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        debug!(device = %self.caps.name, live = current + 1, "context acquired");
        Ok(DeviceLease {
            live: Arc::clone(&self.live),
        })
    }
}

/// A reserved context slot; released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    live: Arc<AtomicUsize>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
