pub mod backend;
pub mod cg;
pub mod ellpack;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod kernels;

pub use backend::{BackendKind, ParallelOps, SerialOps, SimdOps, SolverOps};
pub use cg::{cg, SolverOptions, SolverStats, Termination};
pub use ellpack::EllMatrix;
