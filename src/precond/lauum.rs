//! LAUUM: the product `U·Uᵗ` of an upper-triangular factor with its transpose

use crate::backend::Backend;
use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array2, ArrayView2};

/// Full symmetric `U·Uᵗ`, computed in row blocks of `block`
///
/// Each row block `I` only computes the upper part `C[I, I..]`; since `U`
/// is upper triangular, the inner products start at the first column of
/// the block. The lower triangle is mirrored afterwards.
pub fn lauum_upper(u: ArrayView2<f64>, block: usize, backend: &dyn Backend) -> Array2<f64> {
    let n = u.nrows();
    let mut c = Array2::zeros((n, n));
    backend.for_each_row_chunk(c.view_mut(), block.max(1), &|start, mut rows| {
        let end = start + rows.nrows();
        let left = u.slice(s![start..end, start..]);
        let right = u.slice(s![start.., start..]);
        let mut target = rows.slice_mut(s![.., start..]);
        general_mat_mul(1.0, &left, &right.t(), 0.0, &mut target);
    });
    for i in 0..n {
        for j in 0..i {
            c[[i, j]] = c[[j, i]];
        }
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ParallelBackend, SequentialBackend};
    use ndarray::array;

    #[test]
    fn test_lauum_small() {
        let u = array![[2.0, 1.0], [0.0, 3.0]];
        let c = lauum_upper(u.view(), 1, &SequentialBackend);
        assert_eq!(c, array![[5.0, 3.0], [3.0, 9.0]]);
    }

    #[test]
    fn test_lauum_blocks_agree() {
        let n = 17;
        let mut u = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                u[[i, j]] = 1.0 + ((i * 7 + j * 3) % 5) as f64 * 0.25;
            }
        }
        let expected = u.dot(&u.t());
        let parallel = ParallelBackend::new(Some(4)).unwrap();

        for block in [1, 2, 5, 17, 40] {
            for c in [
                lauum_upper(u.view(), block, &SequentialBackend),
                lauum_upper(u.view(), block, &parallel),
            ] {
                for (x, y) in c.iter().zip(expected.iter()) {
                    assert!((x - y).abs() < 1e-10, "block {block}");
                }
            }
        }
    }
}
