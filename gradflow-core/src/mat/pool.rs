use std::collections::HashMap;
use std::sync::Mutex;

use crate::mat::{DType, Matrix};

/// Free-list of dense buffers, keyed by element count.
///
/// A graph owns one pool (shared with its nodes through an `Arc`) and routes
/// every operator value and gradient buffer through it, so that clearing a
/// graph and running it again reuses memory instead of reallocating.
///
/// `release` takes the matrix by value: a buffer cannot be released twice.
#[derive(Debug, Default)]
pub struct MatrixPool<T> {
    free: Mutex<HashMap<usize, Vec<Vec<T>>>>,
}

impl<T: DType> MatrixPool<T> {
    pub fn new() -> Self {
        MatrixPool {
            free: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a zero-filled `rows x cols` matrix, reusing a released buffer
    /// of the same size when one is available.
    pub fn acquire(&self, rows: usize, cols: usize) -> Matrix<T> {
        let size = rows * cols;
        let recycled = self
            .free
            .lock()
            .expect("MatrixPool mutex poisoned")
            .get_mut(&size)
            .and_then(Vec::pop);
        match recycled {
            Some(mut data) => {
                data.iter_mut().for_each(|v| *v = T::zero());
                Matrix::from_raw_parts(rows, cols, data)
            }
            None => Matrix::zeros(rows, cols),
        }
    }

    /// Same as `acquire`, with the dimensions of `like`.
    pub fn acquire_like(&self, like: &Matrix<T>) -> Matrix<T> {
        self.acquire(like.rows(), like.columns())
    }

    /// Hands a buffer back to the pool.
    pub fn release(&self, matrix: Matrix<T>) {
        let data = matrix.into_data();
        if data.is_empty() {
            return;
        }
        self.free
            .lock()
            .expect("MatrixPool mutex poisoned")
            .entry(data.len())
            .or_default()
            .push(data);
    }

    /// Number of pooled buffers holding exactly `size` elements.
    pub fn available(&self, size: usize) -> usize {
        self.free
            .lock()
            .expect("MatrixPool mutex poisoned")
            .get(&size)
            .map_or(0, Vec::len)
    }
}
