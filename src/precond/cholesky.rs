//! Blocked Cholesky factorization `A = Uᵗ·U` with upper-triangular `U`
//!
//! Only the upper triangle of the input is read. On success the matrix
//! holds `U` and its strict lower triangle is zero. Diagonal blocks are
//! factored and panels solved by the faer kernels in
//! [`dense`](super::dense); this module only schedules them.
//!
//! Two schedules produce the same factor:
//! - in-core: right-looking; after each diagonal block the whole trailing
//!   submatrix is updated at once, in parallel over column blocks;
//! - out-of-core: left-looking over column panels; only the active panel
//!   and one previously factored panel are held in working buffers.

use crate::backend::Backend;
use crate::core::{KrrError, Result};
use crate::planner::PreconditionerMode;
use crate::precond::dense::{factor_diagonal_block, solve_upper_transpose_in_place};
use log::trace;
use ndarray::{s, Array2, ArrayViewMut2, Axis};

/// Factor `a` in place with the given schedule
///
/// A pivot at or below `floor` (or not finite) is reported as
/// [`KrrError::PreconditionerSingular`] with its global index.
pub fn cholesky_upper(
    a: &mut Array2<f64>,
    block: usize,
    mode: PreconditionerMode,
    floor: f64,
    backend: &dyn Backend,
) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(KrrError::DimensionMismatch {
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    match mode {
        PreconditionerMode::InCore => cholesky_in_core(a, block, floor, backend)?,
        PreconditionerMode::OutOfCore => cholesky_out_of_core(a, block, floor, backend)?,
    }
    zero_strict_lower(a.view_mut());
    Ok(())
}

/// Right-looking blocked factorization of the whole matrix
pub fn cholesky_in_core(
    a: &mut Array2<f64>,
    block: usize,
    floor: f64,
    backend: &dyn Backend,
) -> Result<()> {
    let n = a.nrows();
    let block = block.max(1);
    let mut k0 = 0;
    while k0 < n {
        let k1 = (k0 + block).min(n);
        let (mut diag, mut panel, trailing) =
            a.multi_slice_mut((s![k0..k1, k0..k1], s![k0..k1, k1..], s![k1.., k1..]));
        factor_diagonal_block(diag.view_mut(), k0, floor)?;
        if k1 < n {
            solve_upper_transpose_in_place(diag.view(), panel.view_mut());
            backend.cholesky_panel_update(trailing, panel.view(), panel.view());
        }
        trace!("In-core Cholesky block {k0}..{k1} done");
        k0 = k1;
    }
    Ok(())
}

/// Left-looking factorization over column panels of width `block`
pub fn cholesky_out_of_core(
    a: &mut Array2<f64>,
    block: usize,
    floor: f64,
    backend: &dyn Backend,
) -> Result<()> {
    let n = a.nrows();
    let block = block.max(1);
    let mut j0 = 0;
    while j0 < n {
        let j1 = (j0 + block).min(n);
        // Active panel: rows 0..j1 of columns j0..j1.
        let mut work = a.slice(s![..j1, j0..j1]).to_owned();

        let mut i0 = 0;
        while i0 < j0 {
            let i1 = (i0 + block).min(j0);
            // Previously factored panel: rows 0..i1 of columns i0..i1.
            let loaded = a.slice(s![..i1, i0..i1]).to_owned();
            let (solved, mut rest) = work.view_mut().split_at(Axis(0), i0);
            let mut rows = rest.slice_mut(s![..i1 - i0, ..]);
            backend.cholesky_panel_update(
                rows.view_mut(),
                loaded.slice(s![..i0, ..]),
                solved.view(),
            );
            solve_upper_transpose_in_place(loaded.slice(s![i0..i1, ..]), rows);
            i0 = i1;
        }

        let (solved, mut diag) = work.view_mut().split_at(Axis(0), j0);
        backend.cholesky_panel_update(diag.view_mut(), solved.view(), solved.view());
        factor_diagonal_block(diag, j0, floor)?;

        a.slice_mut(s![..j1, j0..j1]).assign(&work);
        trace!("Out-of-core Cholesky panel {j0}..{j1} done");
        j0 = j1;
    }
    Ok(())
}

fn zero_strict_lower(mut a: ArrayViewMut2<f64>) {
    for (i, mut row) in a.outer_iter_mut().enumerate() {
        let end = i.min(row.len());
        row.slice_mut(s![..end]).fill(0.0);
    }
}
