//! Compute backends
//!
//! A backend decides how independent blocks of work are scheduled. The
//! sequential backend runs every block on the calling thread; the parallel
//! backend owns a rayon pool with its own memory budget and distributes
//! blocks over it. Both expose the same block operations, so numerical
//! results agree up to summation order.
//!
//! The backend is chosen once per call from the planner's [`Device`]
//! decision and handed around as `Arc<dyn Backend>`.

use crate::core::{Options, Precision};
use crate::kernel::Kernel;
use log::{debug, warn};
use ndarray::linalg::general_mat_mul;
use ndarray::parallel::prelude::*;
use ndarray::{s, Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where block computations run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// Calling thread only
    Cpu,
    /// Dedicated rayon pool
    Parallel,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Parallel => write!(f, "parallel"),
        }
    }
}

/// Row-chunk closure producing a partial sum
pub type ChunkReducer<'a> = dyn Fn(usize, usize) -> Array2<f64> + Sync + 'a;

/// Row-chunk closure writing into its slice of an output matrix
pub type ChunkWriter<'a> = dyn Fn(usize, ArrayViewMut2<f64>) + Sync + 'a;

/// Capability interface shared by the sequential and parallel backends
///
/// Implementors provide the two scheduling primitives; the kernel and
/// factorization building blocks are written once on top of them.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Device this backend runs on
    fn device(&self) -> Device;

    /// Number of blocks that may be in flight at once
    fn workers(&self) -> usize;

    /// Split the rows of `out` into chunks of `chunk` rows and hand each
    /// chunk, with its starting row, to `f`
    fn for_each_row_chunk(&self, out: ArrayViewMut2<f64>, chunk: usize, f: &ChunkWriter<'_>);

    /// Sum `f(start, end)` over consecutive row ranges of `0..n` of length
    /// `chunk`; every partial result has shape `shape`
    fn sum_row_chunks(
        &self,
        n: usize,
        chunk: usize,
        shape: (usize, usize),
        f: &ChunkReducer<'_>,
    ) -> Array2<f64>;

    /// Dense kernel tile K(a, b), computed in row tiles of `rows`
    fn evaluate_block(
        &self,
        kernel: &dyn Kernel,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        rows: usize,
        precision: Precision,
    ) -> Array2<f64> {
        let mut out = Array2::zeros((a.nrows(), b.nrows()));
        self.for_each_row_chunk(out.view_mut(), rows, &|start, mut chunk| {
            let end = start + chunk.nrows();
            chunk.assign(&tile(kernel, a.slice(s![start..end, ..]), b, precision));
        });
        out
    }

    /// K(a, b)·v, one kernel row at a time; no taller tile is materialized
    fn fused_product(
        &self,
        kernel: &dyn Kernel,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        v: ArrayView2<f64>,
        rows: usize,
        precision: Precision,
    ) -> Array2<f64> {
        let mut out = Array2::zeros((a.nrows(), v.ncols()));
        self.for_each_row_chunk(out.view_mut(), rows, &|start, mut chunk| {
            for (offset, mut out_row) in chunk.outer_iter_mut().enumerate() {
                let i = start + offset;
                let k_row = tile(kernel, a.slice(s![i..i + 1, ..]), b, precision);
                out_row.assign(&k_row.row(0).dot(&v));
            }
        });
        out
    }

    /// K(a, b)·v through materialized row tiles of `rows`
    fn block_product(
        &self,
        kernel: &dyn Kernel,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        v: ArrayView2<f64>,
        rows: usize,
        precision: Precision,
    ) -> Array2<f64> {
        let mut out = Array2::zeros((a.nrows(), v.ncols()));
        self.for_each_row_chunk(out.view_mut(), rows, &|start, mut chunk| {
            let end = start + chunk.nrows();
            let k = tile(kernel, a.slice(s![start..end, ..]), b, precision);
            chunk.assign(&k.dot(&v));
        });
        out
    }

    /// K(a, b)ᵗ·(K(a, b)·v + w) accumulated over row blocks of `a`
    ///
    /// With `fused` set, each worker holds a single kernel row; otherwise it
    /// holds one `rows`×`b.nrows()` tile.
    #[allow(clippy::too_many_arguments)]
    fn gram_product(
        &self,
        kernel: &dyn Kernel,
        a: ArrayView2<f64>,
        b: ArrayView2<f64>,
        v: Option<ArrayView2<f64>>,
        w: Option<ArrayView2<f64>>,
        rows: usize,
        fused: bool,
        precision: Precision,
    ) -> Array2<f64> {
        let t = v.map(|v| v.ncols()).or(w.map(|w| w.ncols())).unwrap_or(0);
        let m = b.nrows();
        self.sum_row_chunks(a.nrows(), rows, (m, t), &|start, end| {
            let mut acc = Array2::zeros((m, t));
            if fused {
                for i in start..end {
                    let k_row = tile(kernel, a.slice(s![i..i + 1, ..]), b, precision);
                    let mut u = match v {
                        Some(v) => k_row.dot(&v),
                        None => Array2::zeros((1, t)),
                    };
                    if let Some(w) = w {
                        u += &w.slice(s![i..i + 1, ..]);
                    }
                    general_mat_mul(1.0, &k_row.t(), &u, 1.0, &mut acc);
                }
            } else {
                let k = tile(kernel, a.slice(s![start..end, ..]), b, precision);
                let mut u = match v {
                    Some(v) => k.dot(&v),
                    None => Array2::zeros((end - start, t)),
                };
                if let Some(w) = w {
                    u += &w.slice(s![start..end, ..]);
                }
                general_mat_mul(1.0, &k.t(), &u, 1.0, &mut acc);
            }
            acc
        })
    }

    /// `target -= leftᵗ · right`, split over column blocks of `target`
    ///
    /// This is the update applied to a Cholesky panel (or the trailing
    /// submatrix) by an already factored panel.
    fn cholesky_panel_update(
        &self,
        target: ArrayViewMut2<f64>,
        left: ArrayView2<f64>,
        right: ArrayView2<f64>,
    ) {
        if left.nrows() == 0 || target.is_empty() {
            return;
        }
        let cols = target.ncols().div_ceil(self.workers()).max(1);
        // Column blocks of `target` are row blocks of its transpose.
        self.for_each_row_chunk(target.reversed_axes(), cols, &|start, mut chunk| {
            let end = start + chunk.nrows();
            general_mat_mul(
                -1.0,
                &right.slice(s![.., start..end]).t(),
                &left,
                1.0,
                &mut chunk,
            );
        });
    }
}

/// Kernel tile at the requested precision
pub(crate) fn tile(
    kernel: &dyn Kernel,
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    precision: Precision,
) -> Array2<f64> {
    match precision {
        Precision::Double => kernel.block(a, b),
        Precision::Single => {
            let mut k = kernel.block(a, b);
            k.mapv_inplace(|value| round(value, precision));
            k
        }
    }
}

#[inline]
pub(crate) fn round(value: f64, precision: Precision) -> f64 {
    match precision {
        Precision::Double => value,
        Precision::Single => value as f32 as f64,
    }
}

/// Runs every block on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl Backend for SequentialBackend {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn workers(&self) -> usize {
        1
    }

    fn for_each_row_chunk(&self, mut out: ArrayViewMut2<f64>, chunk: usize, f: &ChunkWriter<'_>) {
        let chunk = chunk.max(1);
        for (index, rows) in out.axis_chunks_iter_mut(Axis(0), chunk).enumerate() {
            f(index * chunk, rows);
        }
    }

    fn sum_row_chunks(
        &self,
        n: usize,
        chunk: usize,
        shape: (usize, usize),
        f: &ChunkReducer<'_>,
    ) -> Array2<f64> {
        let chunk = chunk.max(1);
        let mut total = Array2::zeros(shape);
        let mut start = 0;
        while start < n {
            let end = (start + chunk).min(n);
            total += &f(start, end);
            start = end;
        }
        total
    }
}

/// Distributes blocks over a dedicated rayon pool
pub struct ParallelBackend {
    pool: ThreadPool,
}

impl ParallelBackend {
    /// Build the pool; `threads = None` uses rayon's default thread count
    pub fn new(threads: Option<usize>) -> std::result::Result<Self, rayon::ThreadPoolBuildError> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("rkrr-worker-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        Ok(Self {
            pool: builder.build()?,
        })
    }
}

impl fmt::Debug for ParallelBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelBackend")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl Backend for ParallelBackend {
    fn device(&self) -> Device {
        Device::Parallel
    }

    fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn for_each_row_chunk(&self, mut out: ArrayViewMut2<f64>, chunk: usize, f: &ChunkWriter<'_>) {
        let chunk = chunk.max(1);
        self.pool.install(|| {
            out.axis_chunks_iter_mut(Axis(0), chunk)
                .into_par_iter()
                .enumerate()
                .for_each(|(index, rows)| f(index * chunk, rows));
        });
    }

    fn sum_row_chunks(
        &self,
        n: usize,
        chunk: usize,
        shape: (usize, usize),
        f: &ChunkReducer<'_>,
    ) -> Array2<f64> {
        let chunk = chunk.max(1);
        let n_chunks = n.div_ceil(chunk);
        self.pool.install(|| {
            (0..n_chunks)
                .into_par_iter()
                .map(|c| {
                    let start = c * chunk;
                    f(start, (start + chunk).min(n))
                })
                .reduce(|| Array2::zeros(shape), |a, b| a + b)
        })
    }
}

/// Instantiate the backend for `device`
///
/// A parallel pool that cannot be built degrades to the sequential backend;
/// the returned backend's [`Backend::device`] reports what is actually used.
pub fn create(device: Device, options: &Options) -> Arc<dyn Backend> {
    match device {
        Device::Cpu => Arc::new(SequentialBackend),
        Device::Parallel => match ParallelBackend::new(options.device_threads) {
            Ok(backend) => {
                debug!("Parallel backend with {} workers", backend.workers());
                Arc::new(backend)
            }
            Err(e) => {
                warn!("Parallel backend unavailable ({e}), falling back to CPU");
                Arc::new(SequentialBackend)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::GaussianKernel;
    use ndarray::array;

    fn points() -> (Array2<f64>, Array2<f64>) {
        let a = array![
            [0.0, 1.0],
            [1.0, 0.5],
            [-0.5, 0.2],
            [2.0, 2.0],
            [0.3, -1.0]
        ];
        let b = array![[0.0, 0.0], [1.0, 1.0], [-1.0, 0.5]];
        (a, b)
    }

    fn backends() -> Vec<Arc<dyn Backend>> {
        vec![
            Arc::new(SequentialBackend),
            Arc::new(ParallelBackend::new(Some(3)).unwrap()),
        ]
    }

    #[test]
    fn test_evaluate_block_independent_of_tiling() {
        let kernel = GaussianKernel::new(1.0);
        let (a, b) = points();
        let reference = kernel.block(a.view(), b.view());

        for backend in backends() {
            for rows in 1..=6 {
                let k = backend.evaluate_block(&kernel, a.view(), b.view(), rows, Precision::Double);
                for (x, y) in k.iter().zip(reference.iter()) {
                    assert!((x - y).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_fused_matches_block_product() {
        let kernel = GaussianKernel::new(0.7);
        let (a, b) = points();
        let v = array![[1.0, 0.5], [-2.0, 0.0], [0.5, 1.0]];

        for backend in backends() {
            let fused = backend.fused_product(&kernel, a.view(), b.view(), v.view(), 2, Precision::Double);
            let block = backend.block_product(&kernel, a.view(), b.view(), v.view(), 2, Precision::Double);
            for (x, y) in fused.iter().zip(block.iter()) {
                assert!((x - y).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_gram_product_matches_dense() {
        let kernel = GaussianKernel::new(1.3);
        let (a, b) = points();
        let v = array![[1.0], [-1.0], [0.25]];
        let w = array![[0.1], [0.2], [0.3], [0.4], [0.5]];

        let k = kernel.block(a.view(), b.view());
        let expected = k.t().dot(&(k.dot(&v) + &w));

        for backend in backends() {
            for fused in [true, false] {
                let got = backend.gram_product(
                    &kernel,
                    a.view(),
                    b.view(),
                    Some(v.view()),
                    Some(w.view()),
                    2,
                    fused,
                    Precision::Double,
                );
                for (x, y) in got.iter().zip(expected.iter()) {
                    assert!((x - y).abs() < 1e-12, "fused={fused}: {x} vs {y}");
                }
            }
        }
    }

    #[test]
    fn test_single_precision_rounds_tiles() {
        let kernel = GaussianKernel::new(1.0);
        let (a, b) = points();
        let k = SequentialBackend.evaluate_block(&kernel, a.view(), b.view(), 4, Precision::Single);
        for value in k.iter() {
            assert_eq!(*value, *value as f32 as f64);
        }
    }

    #[test]
    fn test_cholesky_panel_update() {
        let left = array![[1.0, 2.0], [0.0, 1.0]];
        let right = array![[1.0, 0.0, 2.0], [3.0, 1.0, 0.0]];
        let expected = -left.t().dot(&right);

        for backend in backends() {
            let mut target = Array2::zeros((2, 3));
            backend.cholesky_panel_update(target.view_mut(), left.view(), right.view());
            assert_eq!(target, expected);
        }
    }

    #[test]
    fn test_create_cpu_backend() {
        let backend = create(Device::Cpu, &Options::default());
        assert_eq!(backend.device(), Device::Cpu);
        assert_eq!(backend.workers(), 1);
    }
}
