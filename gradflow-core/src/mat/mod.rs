//! # Matrix capability (`mat`)
//!
//! The dense matrix type every node value and gradient is stored in, the
//! shape predicates the functions validate against, and the buffer pool the
//! graph recycles memory through.

pub mod matrix;
pub mod numeric;
pub mod pool;

pub use matrix::{same_dims, vectors_of_same_size, Matrix};
pub use numeric::DType;
pub use pool::MatrixPool;
