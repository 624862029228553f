//! Pluggable execution strategies for the matvec and vector kernels.
//!
//! The CG loop itself is backend-agnostic; it only talks to [`SolverOps`].
//! All parallelism lives inside a single kernel call: the matrix is shared
//! read-only, each vector is written by exactly one call at a time, and every
//! call returns only once its output is fully materialized.

use rayon::prelude::*;
use wide::f64x4;

use crate::error::{Error, Result};
use crate::solver::ellpack::EllMatrix;
use crate::solver::kernels;

// Rows/elements handed to one rayon task. Small enough that work stealing
// evens out rows with very unequal populations.
const PAR_CHUNK: usize = 2048;

pub trait SolverOps: Send + Sync {
    fn name(&self) -> &'static str;

    fn matvec(&self, a: &EllMatrix, x: &[f64], y: &mut [f64]);

    fn dot(&self, a: &[f64], b: &[f64]) -> f64;

    /// y += alpha * x
    fn axpy(&self, alpha: f64, x: &[f64], y: &mut [f64]);

    /// y = x + alpha * y
    fn xpay(&self, x: &[f64], alpha: f64, y: &mut [f64]);

    fn nrm2(&self, x: &[f64]) -> f64 {
        self.dot(x, x).sqrt()
    }
}

/// Plain sequential loops. Reference semantics for the other backends.
pub struct SerialOps;

impl SolverOps for SerialOps {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn matvec(&self, a: &EllMatrix, x: &[f64], y: &mut [f64]) {
        a.matvec(x, y);
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        kernels::dot(a, b)
    }

    fn axpy(&self, alpha: f64, x: &[f64], y: &mut [f64]) {
        kernels::axpy(alpha, x, y);
    }

    fn xpay(&self, x: &[f64], alpha: f64, y: &mut [f64]) {
        kernels::xpay(x, alpha, y);
    }
}

/// Single-threaded `f64x4` kernels.
///
/// The matvec walks slot-by-slot across all rows, which is exactly the
/// access pattern the column-major ELLPACK-R layout is padded for: `data`
/// and `y` are contiguous over the vector lanes, only the gather of `x`
/// stays scalar. Padding slots carry a zero value, so they are summed
/// unconditionally instead of branched around.
pub struct SimdOps;

impl SolverOps for SimdOps {
    fn name(&self) -> &'static str {
        "simd"
    }

    fn matvec(&self, a: &EllMatrix, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), a.n);
        assert_eq!(y.len(), a.n);
        let n = a.n;
        y.fill(0.0);

        for j in 0..a.max_nnz {
            let vals = &a.data[j * n..(j + 1) * n];
            let cols = &a.indices[j * n..(j + 1) * n];
            let mut i = 0;
            while i + 4 <= n {
                let vd = f64x4::from(&vals[i..i + 4]);
                let vx = f64x4::from([
                    x[cols[i]],
                    x[cols[i + 1]],
                    x[cols[i + 2]],
                    x[cols[i + 3]],
                ]);
                let vy = f64x4::from(&y[i..i + 4]);
                let res = vy + vd * vx;
                let res_arr: [f64; 4] = res.into();
                y[i..i + 4].copy_from_slice(&res_arr);
                i += 4;
            }
            while i < n {
                y[i] += vals[i] * x[cols[i]];
                i += 1;
            }
        }
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        kernels::dot_simd(a, b)
    }

    fn axpy(&self, alpha: f64, x: &[f64], y: &mut [f64]) {
        kernels::axpy_simd(alpha, x, y);
    }

    fn xpay(&self, x: &[f64], alpha: f64, y: &mut [f64]) {
        kernels::xpay_simd(x, alpha, y);
    }
}

/// Rayon data parallelism over row/element chunks, SIMD within each chunk.
pub struct ParallelOps;

impl SolverOps for ParallelOps {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn matvec(&self, a: &EllMatrix, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), a.n);
        assert_eq!(y.len(), a.n);
        let n = a.n;

        y.par_chunks_mut(PAR_CHUNK)
            .enumerate()
            .for_each(|(chunk, yc)| {
                let base = chunk * PAR_CHUNK;
                for (t, yi) in yc.iter_mut().enumerate() {
                    let i = base + t;
                    let mut sum = 0.0;
                    for j in 0..a.length[i] {
                        let k = j * n + i;
                        sum += a.data[k] * x[a.indices[k]];
                    }
                    *yi = sum;
                }
            });
    }

    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        a.par_chunks(PAR_CHUNK)
            .zip(b.par_chunks(PAR_CHUNK))
            .map(|(ca, cb)| kernels::dot_simd(ca, cb))
            .sum()
    }

    fn axpy(&self, alpha: f64, x: &[f64], y: &mut [f64]) {
        y.par_chunks_mut(PAR_CHUNK)
            .zip(x.par_chunks(PAR_CHUNK))
            .for_each(|(cy, cx)| kernels::axpy_simd(alpha, cx, cy));
    }

    fn xpay(&self, x: &[f64], alpha: f64, y: &mut [f64]) {
        y.par_chunks_mut(PAR_CHUNK)
            .zip(x.par_chunks(PAR_CHUNK))
            .for_each(|(cy, cx)| kernels::xpay_simd(cx, alpha, cy));
    }
}

/// Execution strategy selected at configuration time (`CG_BACKEND`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Serial,
    Simd,
    Parallel,
    #[cfg(feature = "gpu")]
    Gpu,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Simd
    }
}

impl BackendKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(BackendKind::Serial),
            "simd" => Ok(BackendKind::Simd),
            "parallel" => Ok(BackendKind::Parallel),
            #[cfg(feature = "gpu")]
            "gpu" => Ok(BackendKind::Gpu),
            _ => Err(Error::format(format!("unknown backend '{s}'"))),
        }
    }

    /// Host-side kernel set, if this backend has one. The GPU backend runs
    /// its own device-resident loop instead.
    pub fn cpu_ops(self) -> Option<&'static dyn SolverOps> {
        match self {
            BackendKind::Serial => Some(&SerialOps),
            BackendKind::Simd => Some(&SimdOps),
            BackendKind::Parallel => Some(&ParallelOps),
            #[cfg(feature = "gpu")]
            BackendKind::Gpu => None,
        }
    }
}
