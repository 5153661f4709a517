//! Resource and block planning
//!
//! Given the problem dimensions and the memory budgets in [`Options`], the
//! planner decides where block computations run, how many rows of a kernel
//! matrix a single tile may hold, the Cholesky and LAUUM block sizes and
//! whether the preconditioner is factored in-core or out-of-core.
//!
//! Planning is a pure function of its inputs. No returned block size is
//! ever zero, and no plan authorizes working memory beyond the budget of
//! the chosen device.

use crate::backend::Device;
use crate::core::{KrrError, Options, Result};
use log::debug;
use serde::{Deserialize, Serialize};

const F64_BYTES: usize = std::mem::size_of::<f64>();

/// Tiles shorter than this are not worth materializing
pub const MIN_TILE_ROWS: usize = 32;

/// How the preconditioner's Cholesky factorization is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreconditionerMode {
    /// Whole M×M working matrix held at once
    InCore,
    /// Column panels streamed through two panel buffers
    OutOfCore,
}

/// Problem dimensions the plan is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRequest {
    /// Rows streamed through the kernel evaluator (N at fit, n at predict)
    pub rows: usize,
    /// Number of centers
    pub centers: usize,
    /// Feature dimension
    pub dim: usize,
    /// Number of target columns
    pub targets: usize,
    /// Workers available on the parallel device
    pub device_workers: usize,
}

impl PlanRequest {
    pub fn new(rows: usize, centers: usize, dim: usize, targets: usize) -> Self {
        Self {
            rows,
            centers,
            dim,
            targets,
            device_workers: rayon::current_num_threads(),
        }
    }

    pub fn with_device_workers(mut self, workers: usize) -> Self {
        self.device_workers = workers;
        self
    }
}

/// Block sizes and placement decided by [`plan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlan {
    /// Device the blocks run on
    pub device: Device,
    /// Working memory budget of that device, in bytes
    pub budget: usize,
    /// Blocks in flight at once
    pub workers: usize,
    /// Rows per kernel tile
    pub kernel_rows: usize,
    /// Cholesky block (panel width)
    pub chol_block: usize,
    /// LAUUM row block
    pub lauum_block: usize,
    /// In-core or out-of-core factorization
    pub mode: PreconditionerMode,
    /// Kernel products computed row by row instead of through tiles
    pub fused: bool,
}

/// Bytes needed to stream at least one kernel row per worker
fn kernel_footprint(request: &PlanRequest, workers: usize, rows: usize) -> usize {
    let m = request.centers;
    let fixed = (workers * m * request.targets + m * request.dim) * F64_BYTES;
    fixed + workers * rows * row_bytes(request)
}

/// One kernel row, its input row and its output row
fn row_bytes(request: &PlanRequest) -> usize {
    (request.centers + request.dim + request.targets) * F64_BYTES
}

/// Two panel buffers of width `block`
fn panel_footprint(m: usize, block: usize) -> usize {
    2 * m * block * F64_BYTES
}

fn min_footprint(request: &PlanRequest, workers: usize) -> usize {
    kernel_footprint(request, workers, 1).max(panel_footprint(request.centers, 1))
}

/// Decide device, block sizes and preconditioner mode
pub fn plan(request: &PlanRequest, options: &Options) -> Result<BlockPlan> {
    if request.centers == 0 || request.dim == 0 || request.targets == 0 {
        return Err(KrrError::InvalidParameter(format!(
            "Cannot plan for {} centers, {} features and {} targets",
            request.centers, request.dim, request.targets
        )));
    }

    let device_workers = request.device_workers.max(1);
    let (device, budget, workers) = if !options.cpu_only
        && options.max_device_mem >= min_footprint(request, device_workers)
    {
        (Device::Parallel, options.max_device_mem, device_workers)
    } else if options.max_cpu_mem >= min_footprint(request, 1) {
        if !options.cpu_only {
            debug!(
                "Device budget of {} bytes too small, planning for CPU",
                options.max_device_mem
            );
        }
        (Device::Cpu, options.max_cpu_mem, 1)
    } else {
        let available = if options.cpu_only {
            options.max_cpu_mem
        } else {
            options.max_cpu_mem.max(options.max_device_mem)
        };
        return Err(KrrError::ResourceExhausted {
            required: min_footprint(request, 1),
            available,
        });
    };

    let m = request.centers;

    // Largest tile height that keeps every worker's tile inside the budget.
    let fixed = kernel_footprint(request, workers, 0);
    let kernel_rows = ((budget - fixed) / (workers * row_bytes(request)))
        .min(request.rows)
        .max(1);

    // T and A are both held in full
    let in_core_bytes = 2 * m * m * F64_BYTES;
    let mode = if options.chol_force_ooc {
        PreconditionerMode::OutOfCore
    } else if options.chol_force_in_core {
        if in_core_bytes > budget {
            return Err(KrrError::ResourceExhausted {
                required: in_core_bytes,
                available: budget,
            });
        }
        PreconditionerMode::InCore
    } else if in_core_bytes <= budget {
        PreconditionerMode::InCore
    } else {
        PreconditionerMode::OutOfCore
    };

    let max_panel = (budget / panel_footprint(m, 1)).max(1);
    let chol_block = block_size(m, options.chol_block_multiplier, workers, max_panel);
    let lauum_block = block_size(m, options.lauum_block_multiplier, workers, max_panel);

    let plan = BlockPlan {
        device,
        budget,
        workers,
        kernel_rows,
        chol_block,
        lauum_block,
        mode,
        fused: !options.no_fused && kernel_rows < MIN_TILE_ROWS.min(request.rows),
    };
    debug!("Block plan: {plan:?}");
    Ok(plan)
}

/// `ceil(m / (multiplier · workers))`, capped to what fits, clamped to [1, m]
fn block_size(m: usize, multiplier: usize, workers: usize, max_fit: usize) -> usize {
    let parts = multiplier.max(1) * workers.max(1);
    m.div_ceil(parts).min(max_fit).clamp(1, m.max(1))
}
