//! Dense kernels backed by faer
//!
//! The blocked schedules in [`cholesky`](super::cholesky) and the
//! preconditioner keep their matrices in ndarray; the unblocked factorization
//! of one diagonal block and every triangular solve are handed to faer.

use crate::core::{KrrError, Result};
use faer::linalg::solvers::{Llt, LltError};
use faer::linalg::triangular_solve::{
    solve_lower_triangular_in_place, solve_upper_triangular_in_place,
};
use faer::{Mat, MatRef, Par, Side};
use ndarray::{Array2, ArrayView2, ArrayViewMut2};

enum Storage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

/// faer view of an ndarray matrix; borrowed for row-major data, copied otherwise
pub struct FaerMatrix<'a> {
    storage: Storage<'a>,
}

impl<'a> FaerMatrix<'a> {
    pub fn new(a: ArrayView2<'a, f64>) -> Self {
        let (rows, cols) = a.dim();
        let storage = match a.to_slice() {
            Some(slice) => Storage::Borrowed(MatRef::from_row_major_slice(slice, rows, cols)),
            None => Storage::Owned(Mat::from_fn(rows, cols, |i, j| a[[i, j]])),
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        match &self.storage {
            Storage::Borrowed(view) => *view,
            Storage::Owned(mat) => mat.as_ref(),
        }
    }
}

fn to_mat(a: ArrayView2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn copy_back(mut target: ArrayViewMut2<f64>, source: MatRef<'_, f64>) {
    for ((i, j), value) in target.indexed_iter_mut() {
        *value = source[(i, j)];
    }
}

/// Factor a diagonal block in place; `offset` is its global index
///
/// Only the upper triangle of `d` is read. On success `d` holds the upper
/// factor `U` with `Uᵗ·U = D`. A non-finite entry, a pivot faer rejects, or
/// a pivot at or below `floor` is [`KrrError::PreconditionerSingular`]. The
/// reported pivot is clamped at zero when faer rejects it.
pub fn factor_diagonal_block(mut d: ArrayViewMut2<f64>, offset: usize, floor: f64) -> Result<()> {
    let n = d.nrows();
    for i in 0..n {
        if let Some(&bad) = d.row(i).iter().skip(i).find(|v| !v.is_finite()) {
            return Err(KrrError::PreconditionerSingular {
                index: offset + i,
                pivot: bad,
            });
        }
    }

    let block = Mat::from_fn(n, n, |i, j| if i <= j { d[[i, j]] } else { d[[j, i]] });
    let llt = Llt::new(block.as_ref(), Side::Lower).map_err(|e| {
        #[allow(unreachable_patterns)]
        let index = match e {
            LltError::NonPositivePivot { index } => index,
            _ => 0,
        };
        KrrError::PreconditionerSingular {
            index: offset + index,
            pivot: 0.0,
        }
    })?;
    let l = llt.L();
    for j in 0..n {
        let pivot = l[(j, j)] * l[(j, j)];
        if pivot <= floor {
            return Err(KrrError::PreconditionerSingular {
                index: offset + j,
                pivot,
            });
        }
    }
    for ((i, j), value) in d.indexed_iter_mut() {
        *value = if i <= j { l[(j, i)] } else { 0.0 };
    }
    Ok(())
}

/// Solve `Uᵗ·X = B` in place
pub fn solve_upper_transpose_in_place(u: ArrayView2<f64>, mut b: ArrayViewMut2<f64>) {
    debug_assert_eq!(b.nrows(), u.nrows());
    let u = FaerMatrix::new(u);
    let mut x = to_mat(b.view());
    solve_lower_triangular_in_place(u.as_ref().transpose(), x.as_mut(), Par::Seq);
    copy_back(b.view_mut(), x.as_ref());
}

/// Solve `U·X = B` in place
pub fn solve_upper_in_place(u: ArrayView2<f64>, mut b: ArrayViewMut2<f64>) {
    debug_assert_eq!(b.nrows(), u.nrows());
    let u = FaerMatrix::new(u);
    let mut x = to_mat(b.view());
    solve_upper_triangular_in_place(u.as_ref(), x.as_mut(), Par::Seq);
    copy_back(b.view_mut(), x.as_ref());
}

/// `U⁻ᵗ·B`
pub fn solve_upper_transpose(u: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let mut x = b.to_owned();
    solve_upper_transpose_in_place(u, x.view_mut());
    x
}

/// `U⁻¹·B`
pub fn solve_upper(u: ArrayView2<f64>, b: ArrayView2<f64>) -> Array2<f64> {
    let mut x = b.to_owned();
    solve_upper_in_place(u, x.view_mut());
    x
}

/// `U⁻¹·V⁻¹·V⁻ᵗ·U⁻ᵗ·r` for two upper factors, without leaving faer in between
pub fn solve_factor_pair(u: ArrayView2<f64>, v: ArrayView2<f64>, r: ArrayView2<f64>) -> Array2<f64> {
    let u = FaerMatrix::new(u);
    let v = FaerMatrix::new(v);
    let mut z = to_mat(r);
    solve_lower_triangular_in_place(u.as_ref().transpose(), z.as_mut(), Par::Seq);
    solve_lower_triangular_in_place(v.as_ref().transpose(), z.as_mut(), Par::Seq);
    solve_upper_triangular_in_place(v.as_ref(), z.as_mut(), Par::Seq);
    solve_upper_triangular_in_place(u.as_ref(), z.as_mut(), Par::Seq);
    Array2::from_shape_fn(r.dim(), |(i, j)| z[(i, j)])
}
