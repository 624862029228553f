use criterion::{criterion_group, criterion_main, Criterion};

use ellcg::solver::{EllMatrix, ParallelOps, SerialOps, SimdOps, SolverOps};

// 2D five-point Laplacian on a grid x grid mesh: the classic CG workload,
// ~5 entries per row with a handful of shorter boundary rows.
fn laplacian_2d(grid: usize) -> EllMatrix {
    let n = grid * grid;
    let idx = |r: usize, c: usize| r * grid + c + 1;
    let mut t = Vec::new();
    for r in 0..grid {
        for c in 0..grid {
            t.push((idx(r, c), idx(r, c), 4.0));
            if r > 0 {
                t.push((idx(r, c), idx(r - 1, c), -1.0));
            }
            if r + 1 < grid {
                t.push((idx(r, c), idx(r + 1, c), -1.0));
            }
            if c > 0 {
                t.push((idx(r, c), idx(r, c - 1), -1.0));
            }
            if c + 1 < grid {
                t.push((idx(r, c), idx(r, c + 1), -1.0));
            }
        }
    }
    let m = t.len();
    EllMatrix::from_triplets(n, m, &t, false).unwrap()
}

fn matvec_benchmark(c: &mut Criterion) {
    let a = laplacian_2d(256);
    let x: Vec<f64> = (0..a.n).map(|i| (i as f64 * 0.001).sin()).collect();
    let mut y = vec![0.0; a.n];

    let mut group = c.benchmark_group("matvec_256x256_grid");
    for ops in [&SerialOps as &dyn SolverOps, &SimdOps, &ParallelOps] {
        group.bench_function(ops.name(), |b| {
            b.iter(|| {
                ops.matvec(&a, &x, &mut y);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, matvec_benchmark);
criterion_main!(benches);
