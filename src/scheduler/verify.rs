use crate::error::{BrokerError, Result};
use crate::scheduler::job::Dimensions;

/// Absolute per-cell tolerance when comparing against the reference product.
pub const VERIFY_TOLERANCE: f64 = 1e-5;

/// Outcome of cross-checking an assembled result.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub verified: bool,
    pub error: Option<String>,
}

impl Verification {
    fn passed() -> Self {
        Self {
            verified: true,
            error: None,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            verified: false,
            error: Some(reason),
        }
    }
}

/// Reference product by straightforward triple-nested accumulation.
pub fn multiply_reference(a: &[f64], b: &[f64], dims: Dimensions) -> Result<Vec<f64>> {
    let Dimensions {
        rows_a,
        cols_a,
        cols_b,
    } = dims;
    if a.len() != rows_a * cols_a {
        return Err(BrokerError::Verification(format!(
            "matrix A has {} values, expected {}",
            a.len(),
            rows_a * cols_a
        )));
    }
    if b.len() != cols_a * cols_b {
        return Err(BrokerError::Verification(format!(
            "matrix B has {} values, expected {}",
            b.len(),
            cols_a * cols_b
        )));
    }

    let mut out = vec![0.0; rows_a * cols_b];
    for row in 0..rows_a {
        for col in 0..cols_b {
            let mut sum = 0.0;
            for k in 0..cols_a {
                sum += a[row * cols_a + k] * b[k * cols_b + col];
            }
            out[row * cols_b + col] = sum;
        }
    }
    Ok(out)
}

/// Compare `actual` against the reference product of `a` and `b`.
///
/// Never fails; every problem is reported inside the returned [`Verification`].
pub fn verify_product(a: &[f64], b: &[f64], dims: Dimensions, actual: &[f64]) -> Verification {
    let expected = match multiply_reference(a, b, dims) {
        Ok(expected) => expected,
        Err(e) => {
            tracing::error!(error = %e, "Reference computation failed");
            return Verification::failed(format!("Verification failed: {e}"));
        }
    };

    if expected.len() != actual.len() {
        return Verification::failed(format!(
            "Verification mismatch: expected {} cells, got {}",
            expected.len(),
            actual.len()
        ));
    }

    let mismatch = expected
        .iter()
        .zip(actual)
        .position(|(e, a)| (e - a).abs() > VERIFY_TOLERANCE || a.is_nan());

    match mismatch {
        None => Verification::passed(),
        Some(index) => {
            let (row, col) = (index / dims.cols_b, index % dims.cols_b);
            Verification::failed(format!(
                "Verification mismatch at ({row}, {col}): expected {}, got {}",
                expected[index], actual[index]
            ))
        }
    }
}
