//! Run metrics and their terminal rendering.
//!
//! The solver fills a [`Metrics`] record; how it is shown is entirely this
//! module's concern. The rendering is an aligned table with bold names,
//! one `name: value` pair per line.

use std::fmt;
use std::time::Duration;

use crate::solver::SolverStats;

#[derive(Clone, Debug)]
pub struct Metrics {
    /// Path of the matrix the run solved, as given on the command line.
    pub matrix: String,
    pub n: usize,
    pub nnz: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub residual: f64,
    pub iter: usize,
    pub time_matvec: Duration,
    pub io_time: Duration,
    pub solve_time: Duration,
    pub total_time: Duration,
    /// Independent `||b - Ax|| / ||b - Ax0|| <= tolerance` check.
    pub check_ok: bool,
}

impl Metrics {
    pub fn new(
        matrix: impl Into<String>,
        n: usize,
        nnz: usize,
        max_iter: usize,
        tolerance: f64,
        stats: &SolverStats,
    ) -> Self {
        Self {
            matrix: matrix.into(),
            n,
            nnz,
            max_iter,
            tolerance,
            residual: stats.residual,
            iter: stats.iter,
            time_matvec: stats.time_matvec,
            io_time: Duration::ZERO,
            solve_time: Duration::ZERO,
            total_time: Duration::ZERO,
            check_ok: false,
        }
    }

    /// Sustained matvec throughput: 2 flops per stored nonzero, once per
    /// matvec, `iter + 1` matvecs counting the setup residual.
    pub fn hotspot_gflops(&self) -> f64 {
        let flop = 2.0 * self.nnz as f64 * (self.iter + 1) as f64;
        flop / (self.time_matvec.as_secs_f64() * 1e9)
    }
}

struct Line<'a> {
    name: &'a str,
    value: String,
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = [
            Line {
                name: "Matrix",
                value: self.matrix.clone(),
            },
            Line {
                name: "NNZ",
                value: self.nnz.to_string(),
            },
            Line {
                name: "N",
                value: self.n.to_string(),
            },
            Line {
                name: "Max. iterations",
                value: self.max_iter.to_string(),
            },
            Line {
                name: "Tolerance",
                value: format!("{:.0e}", self.tolerance),
            },
            Line {
                name: "Residual",
                value: format!("{:e}", self.residual),
            },
            Line {
                name: "Iterations",
                value: self.iter.to_string(),
            },
            Line {
                name: "MatVec time",
                value: format!("{:.6}", self.time_matvec.as_secs_f64()),
            },
            Line {
                name: "Hotspot GFLOP/s",
                value: format!("{:.6}", self.hotspot_gflops()),
            },
            Line {
                name: "IO time",
                value: format!("{:.6}", self.io_time.as_secs_f64()),
            },
            Line {
                name: "Solve time",
                value: format!("{:.6}", self.solve_time.as_secs_f64()),
            },
            Line {
                name: "Total time",
                value: format!("{:.6}", self.total_time.as_secs_f64()),
            },
            Line {
                name: "RESULT CHECK",
                value: if self.check_ok { "OK" } else { "ERROR" }.to_string(),
            },
        ];

        let longest = lines.iter().map(|l| l.name.len()).max().unwrap_or(0);
        for l in &lines {
            writeln!(
                f,
                "\x1b[1m{}\x1b[0m: {:pad$}{}",
                l.name,
                "",
                l.value,
                pad = longest - l.name.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::Termination;

    fn stats() -> SolverStats {
        SolverStats {
            iter: 9,
            residual: 3.5e-8,
            bnrm2: 1.0,
            time_matvec: Duration::from_secs(2),
            termination: Termination::Converged,
        }
    }

    #[test]
    fn gflops_counts_setup_matvec() {
        let m = Metrics::new("test.mtx", 100, 1000, 1000, 1e-7, &stats());
        // 2 * 1000 * (9 + 1) flops over 2 seconds.
        assert!((m.hotspot_gflops() - 20_000.0 / 2.0 / 1e9).abs() < 1e-15);
    }

    #[test]
    fn render_contains_every_field() {
        let mut m = Metrics::new("sys.mtx", 100, 1000, 1000, 1e-7, &stats());
        m.check_ok = true;
        let out = m.to_string();
        assert!(out.contains("Matrix"));
        assert!(out.contains("sys.mtx"));
        for name in [
            "NNZ",
            "Max. iterations",
            "Tolerance",
            "Residual",
            "Iterations",
            "MatVec time",
            "Hotspot GFLOP/s",
            "RESULT CHECK",
        ] {
            assert!(out.contains(name), "missing {name}");
        }
        assert!(out.contains("OK"));
    }
}
