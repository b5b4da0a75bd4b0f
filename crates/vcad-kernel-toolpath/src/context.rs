//! Per-worker compute contexts.

use std::collections::HashMap;

use vcad_kernel_raster::{
    rasterize_cells, FilterMode, GridSpec, HeightMap, RasterOptions, Triangle,
};

use crate::config::EngineConfig;
use crate::device::{Device, DeviceCapabilities, DeviceLease};
use crate::error::Result;

/// Kernels that keep a scratch buffer between dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Per-node ray casting.
    Rasterize,
    /// Collision search output.
    Toolpath,
}

/// One execution context on a [`Device`].
///
/// Scratch buffers are cached per [`KernelKind`] for the lifetime of the
/// context and released together with the device lease.
#[derive(Debug)]
pub struct ComputeContext {
    id: usize,
    _lease: DeviceLease,
    caps: DeviceCapabilities,
    options: RasterOptions,
    buffers: HashMap<KernelKind, Vec<f64>>,
}

impl ComputeContext {
    /// Acquire a context on `device`.
    ///
    /// `parallel` allows rows to be spread over the rayon pool; pool workers
    /// run with it off.
    pub fn new(device: &Device, id: usize, config: &EngineConfig, parallel: bool) -> Result<Self> {
        let lease = device.acquire()?;
        Ok(Self {
            id,
            _lease: lease,
            caps: device.capabilities().clone(),
            options: config.raster_options(parallel),
            buffers: HashMap::new(),
        })
    }

    /// Context identifier (0 is the coordinator).
    pub fn id(&self) -> usize {
        self.id
    }

    /// Capabilities of the owning device.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    /// Rasterization options for this context.
    pub fn options(&self) -> &RasterOptions {
        &self.options
    }

    /// Whether row parallelism is enabled.
    pub fn parallel(&self) -> bool {
        self.options.parallel
    }

    /// Borrow the cached buffer for `kind`, emptied.
    pub fn scratch(&mut self, kind: KernelKind) -> Vec<f64> {
        let mut buf = self.buffers.remove(&kind).unwrap_or_default();
        buf.clear();
        buf
    }

    /// Hand a buffer back to the cache.
    pub fn recycle(&mut self, kind: KernelKind, buf: Vec<f64>) {
        self.buffers.insert(kind, buf);
    }

    /// Capacity currently held for `kind`.
    pub fn cached_capacity(&self, kind: KernelKind) -> usize {
        self.buffers.get(&kind).map_or(0, Vec::capacity)
    }

    /// Rasterize pre-filtered triangles onto `grid` using the cached buffer.
    ///
    /// Return the map's cells with [`recycle`](Self::recycle) once done.
    pub fn raster_map(
        &mut self,
        filtered: &[Triangle],
        grid: GridSpec,
        filter: FilterMode,
    ) -> Result<HeightMap> {
        let mut cells = self.scratch(KernelKind::Rasterize);
        rasterize_cells(filtered, &grid, filter, &self.options, &mut cells);
        Ok(HeightMap::from_cells(grid, cells)?)
    }
}
