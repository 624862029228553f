use std::env;
use std::path::Path;
use std::process;
use std::time::Instant;

use ellcg::error::{Error, Result};
use ellcg::io;
use ellcg::report::Metrics;
use ellcg::solver::{cg, BackendKind, EllMatrix, SolverOptions, SolverStats};

fn usage(prog: &str) {
    println!("Usage: {prog} <matrix.mtx>");
    println!();
    println!("Solves A x = b with the conjugate gradient method, where A is the");
    println!("given sparse SPD matrix and b is its vector of row sums (so the");
    println!("exact solution is all ones). Writes the solution to x.out.");
    println!();
    println!("Environment:");
    println!("  CG_MAX_ITER   iteration budget (default 1000)");
    println!("  CG_TOLERANCE  relative residual tolerance (default 1e-7)");
    println!("  CG_BACKEND    serial | simd | parallel{} (default simd)",
        if cfg!(feature = "gpu") { " | gpu" } else { "" });
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        usage(&args[0]);
        process::exit(1);
    }
    if args[1] == "-h" || args[1] == "--help" {
        usage(&args[0]);
        process::exit(0);
    }

    // Non-convergence is reported in the table, not via the exit status;
    // only parse/allocation/io failures are fatal.
    if let Err(e) = run(Path::new(&args[1])) {
        eprintln!("ERROR: {e}");
        process::exit(1);
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(s) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::Format(format!("invalid {name} '{s}'"))),
        Err(_) => Ok(None),
    }
}

fn options_from_env() -> Result<SolverOptions> {
    let mut opts = SolverOptions::default();
    if let Some(max_iter) = env_parse("CG_MAX_ITER")? {
        opts.max_iter = max_iter;
    }
    if let Some(tolerance) = env_parse("CG_TOLERANCE")? {
        opts.tolerance = tolerance;
    }
    Ok(opts)
}

fn backend_from_env() -> Result<BackendKind> {
    match env::var("CG_BACKEND") {
        Ok(s) => BackendKind::parse(&s),
        Err(_) => Ok(BackendKind::default()),
    }
}

fn solve(
    a: &EllMatrix,
    b: &[f64],
    x: &mut [f64],
    backend: BackendKind,
    opts: SolverOptions,
) -> Result<SolverStats> {
    match backend.cpu_ops() {
        Some(ops) => {
            log::info!("solving on the {} backend", ops.name());
            Ok(cg(a, b, x, ops, opts))
        }
        #[cfg(feature = "gpu")]
        None => {
            log::info!("solving on the gpu backend");
            let gpu = pollster::block_on(ellcg::solver::gpu::GpuSolver::new(a))?;
            Ok(gpu.solve(b, x, opts))
        }
        #[cfg(not(feature = "gpu"))]
        None => unreachable!(),
    }
}

fn print_head(x: &[f64]) {
    let shown = x.len().min(10);
    if x.len() > 10 {
        print!("First 10 values of the solution vector x = (");
    } else {
        print!("Solution vector x = (");
    }
    for (i, xi) in x[..shown].iter().enumerate() {
        print!("{i}:{xi:.6e} ");
    }
    println!(")");
}

fn run(path: &Path) -> Result<()> {
    let opts = options_from_env()?;
    let backend = backend_from_env()?;

    let total = Instant::now();

    let io_timer = Instant::now();
    let mm = io::read_matrix_market(path)?;
    let a = EllMatrix::from_triplets(mm.n, mm.nnz_declared, &mm.triplets, mm.symmetric)?;
    let io_time = io_timer.elapsed();

    // b = row sums of A, x0 = 0: the exact solution is the all-ones vector
    // up to rounding, which makes eyeballing the output easy.
    let b = a.row_sums();
    let mut x = vec![0.0; a.n];

    // Baseline for the final check, from the same residual definition the
    // solver converges against.
    let bnrm2 = a.residual_norm(&b, &x);

    let solve_timer = Instant::now();
    let stats = solve(&a, &b, &mut x, backend, opts)?;
    let solve_time = solve_timer.elapsed();

    print_head(&x);

    // Recompute the residual from scratch rather than trusting the CG
    // recurrence value.
    let residual = a.residual_norm(&b, &x);
    let check_ok = residual <= opts.tolerance * bnrm2 || residual == 0.0;

    io::write_solution(Path::new("x.out"), &x)?;

    let mut metrics = Metrics::new(
        path.display().to_string(),
        a.n,
        a.nnz,
        opts.max_iter,
        opts.tolerance,
        &stats,
    );
    metrics.io_time = io_time;
    metrics.solve_time = solve_time;
    metrics.total_time = total.elapsed();
    metrics.check_ok = check_ok;
    print!("{metrics}");

    Ok(())
}
