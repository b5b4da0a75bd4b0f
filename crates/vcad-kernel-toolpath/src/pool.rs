//! Fixed pool of worker threads, each owning its own compute context.
//!
//! Work is partitioned up front by the coordinator and sent to a specific
//! worker over its channel; results come back on a per-task channel wrapped
//! in a [`TaskHandle`].

use std::ops::Range;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::ComputeContext;
use crate::device::Device;
use crate::error::{Result, ToolpathError};
use crate::radial::RadialJob;

enum Task {
    Radial {
        job: Arc<RadialJob>,
        angles: Range<usize>,
        progress: Sender<usize>,
        reply: Sender<Result<Vec<f64>>>,
    },
}

impl Task {
    fn run(self, ctx: &mut ComputeContext) {
        match self {
            Task::Radial {
                job,
                angles,
                progress,
                reply,
            } => {
                let result = job.run(angles, ctx, &mut || {
                    let _ = progress.send(1);
                });
                let _ = reply.send(result);
            }
        }
    }
}

/// Pending result of a task submitted to a worker.
#[derive(Debug)]
pub struct TaskHandle<T> {
    worker: usize,
    rx: Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the worker replies.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| ToolpathError::WorkerLost(self.worker))?
    }

    /// Worker the task was sent to.
    pub fn worker(&self) -> usize {
        self.worker
    }
}

struct Worker {
    id: usize,
    sender: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start a worker and wait until its context is ready.
    fn spawn(id: usize, device: &Device, config: &EngineConfig) -> Result<Self> {
        let (sender, tasks) = mpsc::channel::<Task>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let device = device.clone();
        let config = config.clone();

        let handle = thread::Builder::new()
            .name(format!("toolpath-worker-{id}"))
            .spawn(move || {
                let mut ctx = match ComputeContext::new(&device, id, &config, false) {
                    Ok(ctx) => {
                        let _ = ready_tx.send(Ok(()));
                        ctx
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while let Ok(task) = tasks.recv() {
                    task.run(&mut ctx);
                }
                debug!(worker = id, "worker stopped");
            })
            .map_err(|e| ToolpathError::ResourceUnavailable(format!("spawn worker {id}: {e}")))?;

        let mut worker = Self {
            id,
            sender: Some(sender),
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.shutdown();
                Err(e)
            }
            Err(_) => {
                worker.shutdown();
                Err(ToolpathError::ResourceUnavailable(format!(
                    "worker {id} exited during start-up"
                )))
            }
        }
    }

    fn send(&self, task: Task) -> Result<()> {
        self.sender
            .as_ref()
            .ok_or(ToolpathError::WorkerLost(self.id))?
            .send(task)
            .map_err(|_| ToolpathError::WorkerLost(self.id))
    }

    fn shutdown(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(worker = self.id, "worker thread panicked");
            }
        }
    }
}

/// Worker threads for radial sweeps.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Start `size` workers on `device`.
    ///
    /// If any worker cannot acquire a context, the ones already started are
    /// shut down (releasing their contexts) and the error is returned.
    pub fn new(device: &Device, config: &EngineConfig, size: usize) -> Result<Self> {
        let mut pool = Self {
            workers: Vec::with_capacity(size),
        };
        for id in 1..=size {
            // Dropping `pool` on error joins the workers started so far.
            pool.workers.push(Worker::spawn(id, device, config)?);
        }
        info!(workers = size, "worker pool ready");
        Ok(pool)
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Send `angles` of `job` to the worker in `slot` (modulo pool size).
    ///
    /// The worker sends `1` on `progress` after each finished angle.
    pub fn submit_radial(
        &self,
        slot: usize,
        job: Arc<RadialJob>,
        angles: Range<usize>,
        progress: Sender<usize>,
    ) -> Result<TaskHandle<Vec<f64>>> {
        let worker = self
            .workers
            .get(slot % self.workers.len().max(1))
            .ok_or_else(|| ToolpathError::ResourceUnavailable("worker pool is empty".into()))?;
        let (reply, rx) = mpsc::channel();
        worker.send(Task::Radial {
            job,
            angles,
            progress,
            reply,
        })?;
        Ok(TaskHandle {
            worker: worker.id,
            rx,
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Close every channel before joining so workers exit together.
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for worker in &mut self.workers {
            worker.shutdown();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radial::RadialParams;
    use vcad_kernel_raster::{
        rasterize, shapes, triangles_from_flat, Aggregation, FilterMode, HeightMap,
        RasterOptions, SparseTool,
    };

    #[test]
    fn test_pool_acquires_one_context_per_worker() {
        let device = Device::cpu();
        let pool = WorkerPool::new(&device, &EngineConfig::default(), 3).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(device.live_contexts(), 3);
        drop(pool);
        assert_eq!(device.live_contexts(), 0);
    }

    #[test]
    fn test_partial_pool_is_torn_down() {
        let device = Device::cpu().with_context_limit(2);
        let err = WorkerPool::new(&device, &EngineConfig::default(), 4).unwrap_err();
        assert!(matches!(err, ToolpathError::ResourceUnavailable(_)));
        assert_eq!(device.live_contexts(), 0);
    }

    #[test]
    fn test_lost_worker_is_reported() {
        let (tx, rx) = mpsc::channel::<Result<Vec<f64>>>();
        drop(tx);
        let handle = TaskHandle { worker: 2, rx };
        assert_eq!(handle.wait(), Err(ToolpathError::WorkerLost(2)));
    }

    #[test]
    fn test_radial_slice_on_worker() {
        let device = Device::cpu();
        let config = EngineConfig::default();
        let pool = WorkerPool::new(&device, &config, 2).unwrap();

        let tool_tris = triangles_from_flat(&shapes::ball_end_mill(2.0, 12)).unwrap();
        let raster = rasterize(&tool_tris, 0.5, FilterMode::Tool, None, &RasterOptions::default()).unwrap();
        let tool_map = HeightMap::from_points(&raster.points, 0.5, Aggregation::Min).unwrap();
        let tool = SparseTool::from_height_map(&tool_map).unwrap();
        let terrain = triangles_from_flat(&shapes::cylinder_x(6.0, 2.0, 24)).unwrap();
        let job = Arc::new(
            RadialJob::new(terrain, tool, &RadialParams::new(90.0, 0.5, -10.0), 1e-7).unwrap(),
        );

        let (progress, ticks) = mpsc::channel();
        let a = pool.submit_radial(0, Arc::clone(&job), 0..2, progress.clone()).unwrap();
        let b = pool.submit_radial(1, Arc::clone(&job), 2..4, progress).unwrap();
        assert_ne!(a.worker(), b.worker());
        assert_eq!(ticks.iter().sum::<usize>(), 4);

        let ppl = job.points_per_line();
        assert_eq!(a.wait().unwrap().len(), 2 * ppl);
        assert_eq!(b.wait().unwrap().len(), 2 * ppl);
    }
}
