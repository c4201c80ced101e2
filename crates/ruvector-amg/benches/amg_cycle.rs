//! Benchmarks for the solve phase.
//!
//! Measures the cost of a single preconditioning cycle (V and W) and of a
//! full solve with each outer iteration on a prebuilt hierarchy.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ruvector_amg::config::{AmgConfig, SolverKind};
use ruvector_amg::traits::Preconditioner;
use ruvector_amg::types::CsrMatrix;
use ruvector_amg::AmgSolver;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 5-point Dirichlet Laplacian on an `m x m` grid.
fn laplacian_2d(m: usize) -> CsrMatrix<f64> {
    let n = m * m;
    let mut entries: Vec<(usize, usize, f64)> = Vec::with_capacity(5 * n);
    for y in 0..m {
        for x in 0..m {
            let i = y * m + x;
            entries.push((i, i, 4.0));
            if x + 1 < m {
                entries.push((i, i + 1, -1.0));
                entries.push((i + 1, i, -1.0));
            }
            if y + 1 < m {
                entries.push((i, i + m, -1.0));
                entries.push((i + m, i, -1.0));
            }
        }
    }
    CsrMatrix::from_coo(n, n, entries)
}

/// Random vector with deterministic seed.
fn random_vector(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

// ---------------------------------------------------------------------------
// Benchmark: one cycle
// ---------------------------------------------------------------------------

fn cycle_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("amg_cycle");
    group.warm_up_time(Duration::from_secs(3));
    group.sample_size(50);

    for &m in &[64, 128] {
        let matrix = laplacian_2d(m);
        let n = m * m;
        let r = random_vector(n, 43);
        group.throughput(Throughput::Elements(matrix.nnz() as u64));

        for (label, gamma) in [("v", 1), ("w", 2)] {
            let cfg = AmgConfig {
                gamma,
                check: false,
                ..AmgConfig::default()
            };
            let mut solver = AmgSolver::from_csr(&matrix, &cfg).unwrap();
            let mut z = vec![0.0; n];
            group.bench_with_input(BenchmarkId::new(label, m), &m, |b, _| {
                b.iter(|| solver.precondition(criterion::black_box(&r), &mut z).unwrap());
            });
        }
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: full solve per outer iteration
// ---------------------------------------------------------------------------

fn solve_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("amg_solve");
    group.warm_up_time(Duration::from_secs(3));
    group.sample_size(20);

    let m = 96;
    let matrix = laplacian_2d(m);
    let rhs = random_vector(m * m, 44);
    for solver_kind in [SolverKind::Mg, SolverKind::Cg, SolverKind::Bicgstab] {
        let cfg = AmgConfig {
            solver: solver_kind,
            check: false,
            ..AmgConfig::default()
        };
        let mut solver = AmgSolver::from_csr(&matrix, &cfg).unwrap();
        group.bench_with_input(
            BenchmarkId::new("solver", format!("{solver_kind:?}")),
            &solver_kind,
            |b, _| {
                b.iter(|| solver.solve(criterion::black_box(&rhs)).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(cycle, cycle_cost, solve_cost);
criterion_main!(cycle);
