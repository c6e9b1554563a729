use crate::error::{BrokerError, Result};

/// Merge per-chunk results into one flat row-major `rows_a x cols_b` matrix.
///
/// Chunks are concatenated in ascending `chunk_id` order regardless of the
/// order they are supplied in. Fails if the combined length is not exactly
/// `rows_a * cols_b`.
pub fn merge_chunks<'a, I>(chunks: I, rows_a: usize, cols_b: usize) -> Result<Vec<f64>>
where
    I: IntoIterator<Item = (usize, &'a [f64])>,
{
    let mut ordered: Vec<(usize, &[f64])> = chunks.into_iter().collect();
    ordered.sort_by_key(|(chunk_id, _)| *chunk_id);

    let expected = rows_a * cols_b;
    let actual: usize = ordered.iter().map(|(_, values)| values.len()).sum();
    if actual != expected {
        return Err(BrokerError::ResultSizeMismatch { expected, actual });
    }

    let mut result = Vec::with_capacity(expected);
    for (_, values) in ordered {
        result.extend_from_slice(values);
    }
    Ok(result)
}
