use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::mat::{DType, MatrixPool};

/// Dense, row-major matrix of `rows x cols` elements.
///
/// This is the value and gradient carrier of every node. Vectors are column
/// vectors (`n x 1`), scalars are `1 x 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: DType> Matrix<T> {
    /// Creates a matrix from row-major data.
    ///
    /// # Errors
    /// Returns `GraphError::MatrixCreation` if `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, GraphError> {
        if data.len() != rows * cols {
            return Err(GraphError::MatrixCreation {
                data_len: data.len(),
                rows,
                cols,
            });
        }
        Ok(Matrix { rows, cols, data })
    }

    /// Creates a `1 x 1` matrix.
    pub fn scalar(value: T) -> Self {
        Matrix {
            rows: 1,
            cols: 1,
            data: vec![value],
        }
    }

    /// Creates a column vector holding `data`.
    pub fn vector(data: Vec<T>) -> Self {
        Matrix {
            rows: data.len(),
            cols: 1,
            data,
        }
    }

    /// Creates a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix {
            rows,
            cols,
            data: vec![T::zero(); rows * cols],
        }
    }

    pub(crate) fn from_raw_parts(rows: usize, cols: usize, data: Vec<T>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Matrix { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.cols
    }

    /// Returns `(rows, columns)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Reports whether the matrix has a single row or a single column.
    pub fn is_vector(&self) -> bool {
        self.rows == 1 || self.cols == 1
    }

    pub fn is_scalar(&self) -> bool {
        self.data.len() == 1
    }

    /// Flat, row-major view of the elements.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Element-wise minimum into a buffer drawn from `pool`. Shapes must be
    /// equal, or both operands must be vectors of the same length (the result
    /// then takes `self`'s shape).
    pub fn minimum(&self, other: &Matrix<T>, pool: &MatrixPool<T>) -> Result<Matrix<T>, GraphError> {
        check_compatible(self, other, "minimum")?;
        let mut out = pool.acquire_like(self);
        for ((y, &a), &b) in out.data.iter_mut().zip(&self.data).zip(&other.data) {
            *y = a.min(b);
        }
        Ok(out)
    }

    /// Adds `other` into `self`, element by element.
    pub fn add_in_place(&mut self, other: &Matrix<T>) -> Result<(), GraphError> {
        check_compatible(self, other, "add_in_place")?;
        for (acc, &v) in self.data.iter_mut().zip(other.data.iter()) {
            *acc += v;
        }
        Ok(())
    }
}

/// Reports whether `a` and `b` have the same number of rows and columns.
pub fn same_dims<T>(a: &Matrix<T>, b: &Matrix<T>) -> bool {
    a.rows == b.rows && a.cols == b.cols
}

/// Reports whether `a` and `b` are both vectors with the same number of
/// elements, regardless of their orientation.
pub fn vectors_of_same_size<T: DType>(a: &Matrix<T>, b: &Matrix<T>) -> bool {
    a.is_vector() && b.is_vector() && a.data.len() == b.data.len()
}

/// Fails with `IncompatibleShapes` unless `same_dims` or `vectors_of_same_size` holds.
pub(crate) fn check_compatible<T: DType>(
    a: &Matrix<T>,
    b: &Matrix<T>,
    operation: &str,
) -> Result<(), GraphError> {
    if same_dims(a, b) || vectors_of_same_size(a, b) {
        Ok(())
    } else {
        Err(GraphError::IncompatibleShapes {
            operation: operation.to_string(),
            left: (a.rows, a.cols),
            right: (b.rows, b.cols),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Matrix::<f32>::new(2, 2, vec![1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            GraphError::MatrixCreation {
                data_len: 3,
                rows: 2,
                cols: 2
            }
        );
    }

    #[test]
    fn test_shape_predicates() {
        let col = Matrix::<f64>::vector(vec![1.0, 2.0, 3.0]);
        let row = Matrix::<f64>::new(1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        let square = Matrix::<f64>::zeros(3, 3);

        assert!(!same_dims(&col, &row));
        assert!(vectors_of_same_size(&col, &row));
        assert!(!vectors_of_same_size(&col, &square));
        assert!(same_dims(&square, &Matrix::zeros(3, 3)));
    }

    #[test]
    fn test_minimum_accepts_transposed_vectors() {
        let col = Matrix::<f32>::vector(vec![1.0, 5.0, 3.0]);
        let row = Matrix::<f32>::new(1, 3, vec![4.0, 2.0, 3.0]).unwrap();
        let out = col.minimum(&row, &MatrixPool::new()).unwrap();
        assert_eq!(out.dims(), (3, 1));
        assert_eq!(out.data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_minimum_draws_output_from_pool() {
        let pool = MatrixPool::new();
        pool.release(Matrix::<f64>::vector(vec![9.0, 9.0]));
        let a = Matrix::vector(vec![1.0, 4.0]);
        let b = Matrix::vector(vec![3.0, 2.0]);

        let out = a.minimum(&b, &pool).unwrap();

        assert_eq!(pool.available(2), 0);
        assert_eq!(out.data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_minimum_rejects_incompatible() {
        let a = Matrix::<f32>::zeros(2, 3);
        let b = Matrix::<f32>::zeros(3, 2);
        assert!(matches!(
            a.minimum(&b, &MatrixPool::new()),
            Err(GraphError::IncompatibleShapes { .. })
        ));
    }

    #[test]
    fn test_add_in_place_accumulates() {
        let mut acc = Matrix::<f64>::vector(vec![1.0, 2.0]);
        acc.add_in_place(&Matrix::vector(vec![0.5, 0.5])).unwrap();
        acc.add_in_place(&Matrix::vector(vec![1.0, -1.0])).unwrap();
        assert_eq!(acc.data(), &[2.5, 1.5]);
    }
}
