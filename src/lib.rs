pub mod error;
pub mod io;
pub mod report;
pub mod solver;

pub use error::{Error, Result};
