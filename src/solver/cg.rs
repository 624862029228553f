//! Conjugate gradient iteration for symmetric positive-definite systems.

use std::time::{Duration, Instant};

use crate::solver::backend::SolverOps;
use crate::solver::ellpack::EllMatrix;

// Denominators below this are treated as exact breakdown (zero matrix or an
// already-exact solution), reported as convergence rather than dividing
// through to NaN.
pub(crate) const BREAKDOWN_TOL: f64 = 1e-20;

/// Immutable per-solve configuration.
#[derive(Clone, Copy, Debug)]
pub struct SolverOptions {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tolerance: 1e-7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Converged,
    /// Iteration budget exhausted. A normal terminal state, not an error;
    /// the best available `x` is kept.
    MaxIterReached,
}

/// Outcome of one solve, handed to reporting.
#[derive(Clone, Copy, Debug)]
pub struct SolverStats {
    pub iter: usize,
    /// 2-norm of the residual at termination (CG recurrence value).
    pub residual: f64,
    /// 2-norm of the initial residual; convergence baseline.
    pub bnrm2: f64,
    /// Cumulative wall time spent in the matvec kernel.
    pub time_matvec: Duration,
    pub termination: Termination,
}

/// Solve `A x = b` in place, starting from the given `x`.
///
/// Convergence is `sqrt(dot(r, r)) / bnrm2 <= tolerance`, with `bnrm2` taken
/// from the same residual definition once before the loop. Iterations are
/// strictly serial; all parallelism is inside the `ops` kernels.
pub fn cg(
    a: &EllMatrix,
    b: &[f64],
    x: &mut [f64],
    ops: &dyn SolverOps,
    opts: SolverOptions,
) -> SolverStats {
    let n = a.n;
    assert_eq!(b.len(), n);
    assert_eq!(x.len(), n);

    let mut time_matvec = Duration::ZERO;

    // r = b - A*x
    let mut r = vec![0.0; n];
    let t0 = Instant::now();
    ops.matvec(a, x, &mut r);
    time_matvec += t0.elapsed();
    ops.xpay(b, -1.0, &mut r);

    let mut rho = ops.dot(&r, &r);
    let bnrm2 = rho.sqrt();

    // Degenerate start: x already solves the system (or b = Ax = 0).
    if rho < BREAKDOWN_TOL {
        return SolverStats {
            iter: 0,
            residual: bnrm2,
            bnrm2,
            time_matvec,
            termination: Termination::Converged,
        };
    }

    let mut p = r.clone();
    let mut q = vec![0.0; n];

    for k in 0..opts.max_iter {
        // q = A*p
        let t0 = Instant::now();
        ops.matvec(a, &p, &mut q);
        time_matvec += t0.elapsed();

        let pq = ops.dot(&p, &q);
        if pq.abs() < BREAKDOWN_TOL {
            log::debug!("cg: breakdown dot(p, q) = {pq:e} at iteration {k}");
            return SolverStats {
                iter: k,
                residual: rho.sqrt(),
                bnrm2,
                time_matvec,
                termination: Termination::Converged,
            };
        }
        let alpha = rho / pq;

        ops.axpy(alpha, &p, x); // x += alpha * p
        ops.axpy(-alpha, &q, &mut r); // r -= alpha * q

        let rho_new = ops.dot(&r, &r);
        let res = rho_new.sqrt();
        if res / bnrm2 <= opts.tolerance {
            log::info!("cg: converged after {} iterations, residual {res:e}", k + 1);
            return SolverStats {
                iter: k + 1,
                residual: res,
                bnrm2,
                time_matvec,
                termination: Termination::Converged,
            };
        }

        // p = r + beta * p
        let beta = rho_new / rho;
        ops.xpay(&r, beta, &mut p);
        rho = rho_new;
    }

    let residual = rho.sqrt();
    log::info!(
        "cg: max iterations ({}) reached, residual {residual:e}",
        opts.max_iter
    );
    SolverStats {
        iter: opts.max_iter,
        residual,
        bnrm2,
        time_matvec,
        termination: Termination::MaxIterReached,
    }
}
