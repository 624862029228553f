//! ELLPACK-R sparse matrix storage.
//!
//! Stores `max_nnz` slots per row, padded with zeros, in COLUMN MAJOR order:
//! slot `j` of row `i` lives at `j*n + i`, so walking one slot across all rows
//! touches contiguous memory (coalesced/vectorized access).
//!
//! ```text
//!     ( 11             )          data    |11|21|32|41| 0|22|33|43| 0| 0| 0|44|
//!     ( 21  22         )          indices | 0| 0| 1| 0| 0| 1| 2| 2| 0| 0| 0| 3|
//! A = (     32  33     )   =>     length  | 1| 2| 2| 3|
//!     ( 41      43  44 )          max_nnz = 3
//! ```

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct EllMatrix {
    pub n: usize,
    /// Stored nonzeros, counting symmetric mirrors, excluding padding.
    pub nnz: usize,
    pub max_nnz: usize,
    /// `n * max_nnz` values, column-major.
    pub data: Vec<f64>,
    /// Column index for each slot in `data`.
    pub indices: Vec<usize>,
    /// Genuine (non-padding) entries per row.
    pub length: Vec<usize>,
}

fn alloc<T: Clone + Default>(len: usize, what: &'static str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::Allocation {
        what,
        bytes: len * std::mem::size_of::<T>(),
    })?;
    v.resize(len, T::default());
    Ok(v)
}

impl EllMatrix {
    /// Build from 1-based coordinate triplets.
    ///
    /// With `symmetric` set, every off-diagonal triplet also yields its
    /// mirror; diagonal entries are stored once. The declared count is
    /// checked against the stream before anything is allocated.
    pub fn from_triplets(
        n: usize,
        nnz_declared: usize,
        triplets: &[(usize, usize, f64)],
        symmetric: bool,
    ) -> Result<Self> {
        if triplets.len() != nnz_declared {
            return Err(Error::format(format!(
                "matrix declares {} entries but {} were supplied",
                nnz_declared,
                triplets.len()
            )));
        }

        // First pass: shift to 0-based, mirror off-diagonal entries for
        // symmetric input, and count the population of every row.
        let mut length = alloc::<usize>(n, "row lengths")?;
        let cap = if symmetric {
            2 * triplets.len()
        } else {
            triplets.len()
        };
        let mut entries: Vec<(usize, usize, f64)> = Vec::new();
        entries.try_reserve_exact(cap).map_err(|_| Error::Allocation {
            what: "triplet staging",
            bytes: cap * std::mem::size_of::<(usize, usize, f64)>(),
        })?;

        for &(row, col, value) in triplets {
            if row < 1 || row > n || col < 1 || col > n {
                return Err(Error::format(format!(
                    "entry ({row}, {col}) outside {n}x{n} matrix"
                )));
            }
            let (i, j) = (row - 1, col - 1);
            entries.push((i, j, value));
            length[i] += 1;
            if symmetric && i != j {
                entries.push((j, i, value));
                length[j] += 1;
            }
        }

        let nnz = entries.len();
        let max_nnz = length.iter().copied().max().unwrap_or(0);

        // Second pass: scatter into the padded column-major buffers. Slots
        // past length[i] stay at the zero fill from allocation.
        let mut data = alloc::<f64>(n * max_nnz, "matrix values")?;
        let mut indices = alloc::<usize>(n * max_nnz, "column indices")?;
        let mut offset = alloc::<usize>(n, "row offsets")?;

        for (i, j, value) in entries {
            let k = offset[i] * n + i;
            data[k] = value;
            indices[k] = j;
            offset[i] += 1;
        }

        log::debug!("built {n}x{n} ELLPACK-R matrix, nnz={nnz}, max_nnz={max_nnz}");

        Ok(Self {
            n,
            nnz,
            max_nnz,
            data,
            indices,
            length,
        })
    }

    /// Reference serial matrix-vector product `y = A * x`.
    ///
    /// Padding slots multiply `x[0]` by zero, so no branch is needed.
    pub fn matvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.n);
        assert_eq!(y.len(), self.n);

        for i in 0..self.n {
            let mut sum = 0.0;
            for j in 0..self.length[i] {
                let k = j * self.n + i;
                sum += self.data[k] * x[self.indices[k]];
            }
            y[i] = sum;
        }
    }

    /// Right-hand side with `b[i] = sum of row i`, so that the exact
    /// solution of `A x = b` is the all-ones vector.
    pub fn row_sums(&self) -> Vec<f64> {
        let mut b = vec![0.0; self.n];
        for i in 0..self.n {
            for j in 0..self.length[i] {
                b[i] += self.data[j * self.n + i];
            }
        }
        b
    }

    /// `|| |b - A x| ||_2`, recomputed from scratch.
    ///
    /// Independent of the CG residual recurrence; used for the final
    /// correctness check and for the convergence baseline.
    pub fn residual_norm(&self, b: &[f64], x: &[f64]) -> f64 {
        assert_eq!(b.len(), self.n);
        assert_eq!(x.len(), self.n);

        let mut residual = 0.0;
        for i in 0..self.n {
            let mut yi = 0.0;
            for j in 0..self.length[i] {
                let k = j * self.n + i;
                yi += self.data[k] * x[self.indices[k]];
            }
            let d = (b[i] - yi).abs();
            residual += d * d;
        }
        residual.sqrt()
    }
}
