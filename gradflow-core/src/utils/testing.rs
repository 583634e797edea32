use crate::mat::{DType, Matrix};

/// Checks that a matrix has the expected dimensions and that every element
/// is within `tolerance` of the expected data.
/// Panics with the first offending index otherwise.
pub fn check_matrix_near<T: DType>(
    actual: &Matrix<T>,
    expected_dims: (usize, usize),
    expected_data: &[T],
    tolerance: T,
) {
    assert_eq!(actual.dims(), expected_dims, "Dimension mismatch");
    assert_eq!(
        actual.size(),
        expected_data.len(),
        "Data length mismatch"
    );

    for (i, (a, e)) in actual.data().iter().zip(expected_data.iter()).enumerate() {
        let diff = (*a - *e).abs();
        if diff > tolerance {
            panic!(
                "Data mismatch at index {}: actual={:?}, expected={:?}, diff={:?}, tolerance={:?}",
                i, a, e, diff, tolerance
            );
        }
    }
}

/// Asserts that `f` panics and that the panic message contains `expected`.
pub fn assert_panics_with<R>(expected: &str, f: impl FnOnce() -> R) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    let payload = match result {
        Ok(_) => panic!("expected a panic containing {:?}, but none occurred", expected),
        Err(payload) => payload,
    };
    let message = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("<non-string panic payload>");
    assert!(
        message.contains(expected),
        "panic message {:?} does not contain {:?}",
        message,
        expected
    );
}
