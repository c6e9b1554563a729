/// A contiguous block of rows cut from a row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    pub chunk_id: usize,
    pub row_offset: usize,
    pub row_count: usize,
    pub values: Vec<f64>,
}

/// Split a `rows x cols` row-major matrix into `num_chunks` row blocks.
///
/// The first `rows % num_chunks` blocks get one extra row, so block sizes
/// differ by at most one and blocks appear in row order. Returns an empty
/// vector when `num_chunks` is zero or `matrix` is shorter than
/// `rows * cols`; callers treat that as a failure.
///
/// `num_chunks` must not exceed `rows`, otherwise trailing blocks are empty.
pub fn split_rows(matrix: &[f64], rows: usize, cols: usize, num_chunks: usize) -> Vec<RowBlock> {
    if num_chunks == 0 {
        return Vec::new();
    }

    let base = rows / num_chunks;
    let remainder = rows % num_chunks;

    let mut blocks = Vec::with_capacity(num_chunks);
    let mut row_offset: usize = 0;

    for chunk_id in 0..num_chunks {
        let row_count = base + usize::from(chunk_id < remainder);
        let range = row_offset
            .checked_mul(cols)
            .zip((row_offset + row_count).checked_mul(cols));

        let Some(values) = range.and_then(|(start, end)| matrix.get(start..end)) else {
            tracing::error!(
                rows,
                cols,
                len = matrix.len(),
                "Matrix shorter than its declared dimensions"
            );
            return Vec::new();
        };

        blocks.push(RowBlock {
            chunk_id,
            row_offset,
            row_count,
            values: values.to_vec(),
        });
        row_offset += row_count;
    }

    blocks
}
