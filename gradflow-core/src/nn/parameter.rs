use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::autograd::GradValue;
use crate::error::GraphError;
use crate::mat::{DType, Matrix};

/// A learnable leaf value living outside any graph.
///
/// `Parameter` is a shared handle: clones refer to the same value and
/// gradient. It enters a graph through
/// [`Graph::new_wrap`](crate::autograd::Graph::new_wrap) (trainable) or
/// [`Graph::new_wrap_no_grad`](crate::autograd::Graph::new_wrap_no_grad)
/// (frozen), and receives the gradients propagated to the wrapper.
pub struct Parameter<T: DType> {
    data: Arc<RwLock<ParameterData<T>>>,
}

struct ParameterData<T: DType> {
    name: Option<String>,
    value: Arc<Matrix<T>>,
    grad: Option<Matrix<T>>,
    requires_grad: bool,
}

impl<T: DType> Parameter<T> {
    /// Creates a parameter that requires gradients.
    pub fn new(value: Matrix<T>, name: Option<String>) -> Self {
        Parameter {
            data: Arc::new(RwLock::new(ParameterData {
                name,
                value: Arc::new(value),
                grad: None,
                requires_grad: true,
            })),
        }
    }

    pub fn new_unnamed(value: Matrix<T>) -> Self {
        Self::new(value, None)
    }

    pub fn name(&self) -> Option<String> {
        self.read_data().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.write_data().name = Some(name.into());
    }

    pub fn set_requires_grad(&self, requires_grad: bool) {
        self.write_data().requires_grad = requires_grad;
    }

    /// Replaces the value, e.g. after an optimizer step or when loading.
    pub fn replace_value(&self, value: Matrix<T>) {
        self.write_data().value = Arc::new(value);
    }

    /// Reports whether two handles refer to the same parameter.
    pub fn ptr_eq(&self, other: &Parameter<T>) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    fn read_data(&self) -> RwLockReadGuard<'_, ParameterData<T>> {
        self.data.read().expect("Parameter RwLock poisoned")
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, ParameterData<T>> {
        self.data.write().expect("Parameter RwLock poisoned")
    }
}

impl<T: DType> GradValue<T> for Parameter<T> {
    fn value(&self) -> Arc<Matrix<T>> {
        Arc::clone(&self.read_data().value)
    }

    fn grad(&self) -> Option<Matrix<T>> {
        self.read_data().grad.clone()
    }

    fn has_grad(&self) -> bool {
        self.read_data().grad.is_some()
    }

    fn requires_grad(&self) -> bool {
        self.read_data().requires_grad
    }

    fn propagate_grad(&self, gx: &Matrix<T>) -> Result<(), GraphError> {
        let mut guard = self.write_data();
        let data = &mut *guard;
        match &mut data.grad {
            Some(existing) => existing.add_in_place(gx),
            None => {
                let mut grad = Matrix::zeros(data.value.rows(), data.value.columns());
                grad.add_in_place(gx)?;
                data.grad = Some(grad);
                Ok(())
            }
        }
    }

    fn zero_grad(&self) {
        self.write_data().grad = None;
    }
}

impl<T: DType> Clone for Parameter<T> {
    /// Cloning a Parameter clones the handle, not the value.
    fn clone(&self) -> Self {
        Parameter {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: DType> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.read_data();
        f.debug_struct("Parameter")
            .field("name", &data.name)
            .field("dims", &data.value.dims())
            .field("requires_grad", &data.requires_grad)
            .finish()
    }
}

/// Persisted form: the gradient is runtime state and is not stored.
#[derive(Serialize, Deserialize)]
#[serde(bound = "T: DType")]
struct ParameterRecord<T: DType> {
    name: Option<String>,
    value: Matrix<T>,
    requires_grad: bool,
}

impl<T: DType> Serialize for Parameter<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.read_data();
        ParameterRecord {
            name: data.name.clone(),
            value: (*data.value).clone(),
            requires_grad: data.requires_grad,
        }
        .serialize(serializer)
    }
}

impl<'de, T: DType> Deserialize<'de> for Parameter<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let record = ParameterRecord::<T>::deserialize(deserializer)?;
        let param = Parameter::new(record.value, record.name);
        param.set_requires_grad(record.requires_grad);
        Ok(param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_accumulates_gradients() {
        let p = Parameter::new_unnamed(Matrix::vector(vec![1.0f32, 2.0]));
        assert!(p.requires_grad());
        assert!(!p.has_grad());

        p.propagate_grad(&Matrix::vector(vec![0.5, 1.0])).unwrap();
        p.propagate_grad(&Matrix::vector(vec![0.5, -2.0])).unwrap();
        assert_eq!(p.grad().unwrap().data(), &[1.0, -1.0]);

        assert!(p.has_grad());
        p.zero_grad();
        assert!(!p.has_grad());
    }

    #[test]
    fn test_parameter_clone_shares_state() {
        let p = Parameter::new(Matrix::scalar(3.0f64), Some("w".to_string()));
        let q = p.clone();
        q.set_name("renamed");
        assert!(p.ptr_eq(&q));
        assert_eq!(p.name().as_deref(), Some("renamed"));
    }

    #[test]
    fn test_parameter_serde_keeps_value_and_drops_grad() {
        let p = Parameter::new(Matrix::vector(vec![1.5f64, -2.0]), Some("bias".to_string()));
        p.propagate_grad(&Matrix::vector(vec![1.0, 1.0])).unwrap();

        let json = serde_json::to_string(&p).unwrap();
        let restored: Parameter<f64> = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.name().as_deref(), Some("bias"));
        assert_eq!(restored.value().data(), &[1.5, -2.0]);
        assert!(restored.requires_grad());
        assert!(restored.grad().is_none());
    }
}
