use crate::autograd::{Function, Graph, Node};
use crate::error::GraphError;
use crate::mat::matrix::check_compatible;
use crate::mat::{DType, Matrix, MatrixPool};

/// Element-wise minimum, `y = min(x1, x2)`.
///
/// The gradient is routed by strict comparison: position `i` of `x1`
/// receives `gy[i]` only when `x1[i] < x2[i]`, and symmetrically for `x2`.
/// On ties neither operand receives anything at that position.
#[derive(Debug)]
pub struct Min<T: DType> {
    x1: Node<T>,
    x2: Node<T>,
}

impl<T: DType> Min<T> {
    pub fn new(x1: Node<T>, x2: Node<T>) -> Self {
        Min { x1, x2 }
    }
}

impl<T: DType> Function<T> for Min<T> {
    fn forward(&self, pool: &MatrixPool<T>) -> Result<Matrix<T>, GraphError> {
        let x1v = self.x1.try_value()?;
        let x2v = self.x2.try_value()?;
        x1v.minimum(&x2v, pool)
    }

    fn backward(&self, gy: &Matrix<T>, pool: &MatrixPool<T>) -> Result<(), GraphError> {
        let x1v = self.x1.try_value()?;
        let x2v = self.x2.try_value()?;
        check_compatible(&x1v, &x2v, "Min::backward")?;

        if self.x1.requires_grad() {
            check_compatible(&x1v, gy, "Min::backward")?;
            let gx = strictly_less_grad(pool, &x1v, &x2v, gy);
            let result = self.x1.propagate_grad(&gx);
            pool.release(gx);
            result?;
        }
        if self.x2.requires_grad() {
            check_compatible(&x2v, gy, "Min::backward")?;
            let gx = strictly_less_grad(pool, &x2v, &x1v, gy);
            let result = self.x2.propagate_grad(&gx);
            pool.release(gx);
            result?;
        }
        Ok(())
    }

    fn operands(&self) -> Vec<Node<T>> {
        vec![self.x1.clone(), self.x2.clone()]
    }
}

/// `gx[i] = gy[i]` where `x[i] < other[i]`, 0 elsewhere; shaped like `x`.
fn strictly_less_grad<T: DType>(
    pool: &MatrixPool<T>,
    x: &Matrix<T>,
    other: &Matrix<T>,
    gy: &Matrix<T>,
) -> Matrix<T> {
    let mut gx = pool.acquire_like(x);
    let inputs = x.data().iter().zip(other.data()).zip(gy.data());
    for (g, ((&a, &b), &upstream)) in gx.data_mut().iter_mut().zip(inputs) {
        if a < b {
            *g = upstream;
        }
    }
    gx
}

impl<T: DType> Graph<T> {
    /// Inserts `min(x1, x2)`.
    ///
    /// # Panics
    /// Panics if an operand belongs to another graph, or (with eager
    /// execution) if the operands are neither the same shape nor vectors of
    /// the same length.
    pub fn min(&self, x1: &Node<T>, x2: &Node<T>) -> Node<T> {
        self.new_operator(Min::new(x1.clone(), x2.clone()))
    }
}

#[cfg(test)]
#[path = "min_test.rs"]
mod tests;
