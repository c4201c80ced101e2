//! Filtering algebraic multigrid for sparse linear systems.
//!
//! This crate builds a multigrid hierarchy directly from a sparse matrix:
//! unknowns are split into Coarse and Fine by a greedy, rating-driven
//! coarsening; every Fine unknown is interpolated from one or two Coarse
//! parents with weights fitted to reproduce two test vectors; coarse
//! operators are Galerkin products `R A P`. Scalar and block (systems of
//! PDEs) matrices go through the same code.
//!
//! # Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`arena`] | Two-region scratch arena with nested mark/release scopes |
//! | [`block`], [`matrix`] | Sparse block descriptors, block CSR matrix and vectors |
//! | [`graph`] | Rating buckets, helplist and parent lists of one coarsening pass |
//! | [`candidates`] | Parent-candidate heuristics (variants 0..=6) |
//! | [`coarsen`] | Greedy Coarse/Fine classification |
//! | [`transfer`], [`galerkin`] | Prolongation/restriction and coarse operators |
//! | [`hierarchy`], [`cycle`] | Level construction, V/W-cycle and outer solvers |
//! | `distributed` | Two-phase partitioned coarsening (feature `distributed`) |
//!
//! # Example
//!
//! ```rust
//! use ruvector_amg::config::AmgConfig;
//! use ruvector_amg::cycle::AmgSolver;
//! use ruvector_amg::types::CsrMatrix;
//!
//! // 1-D Laplacian on 100 points.
//! let n = 100;
//! let mut entries = Vec::new();
//! for i in 0..n {
//!     entries.push((i, i, 2.0));
//!     if i + 1 < n {
//!         entries.push((i, i + 1, -1.0));
//!         entries.push((i + 1, i, -1.0));
//!     }
//! }
//! let a = CsrMatrix::from_coo(n, n, entries);
//!
//! let cfg = AmgConfig { cgnodes: 8, ..AmgConfig::default() };
//! let mut solver = AmgSolver::from_csr(&a, &cfg).unwrap();
//! assert!(solver.hierarchy().len() > 1);
//!
//! let report = solver.solve(&vec![1.0; n]).unwrap();
//! assert!(report.converged());
//! ```

pub mod arena;
pub mod block;
pub mod candidates;
pub mod coarsen;
pub mod config;
pub mod cycle;
pub mod error;
pub mod events;
pub mod galerkin;
pub mod graph;
pub mod hierarchy;
pub mod krylov;
pub mod matrix;
pub mod smoother;
pub mod testvec;
pub mod traits;
pub mod transfer;
pub mod types;
pub mod validation;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use config::AmgConfig;
pub use cycle::AmgSolver;
pub use error::{AmgError, Result};
pub use hierarchy::Hierarchy;
pub use matrix::{BlockMatrix, BlockVector};
pub use types::{CsrMatrix, NodeClass, SolveReport, SolveStatus};
