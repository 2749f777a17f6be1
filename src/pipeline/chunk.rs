//! Chunking: split normalized rows into fixed-size, ordered groups.
//!
//! Chunks borrow from the row vector; nothing is copied. Concatenating the
//! chunks in order reproduces the input exactly.

use crate::error::Sheet2PdfError;
use crate::pipeline::input::ReceiptLabels;
use crate::pipeline::normalize::NormalizedRow;

/// An ordered slice of rows rendered as one document.
#[derive(Debug, Clone, Copy)]
pub struct RowChunk<'a> {
    /// 0-based position of this chunk in the request.
    pub index: usize,
    /// 0-based index of the chunk's first row in the sheet's data rows.
    pub first_row: usize,
    pub rows: &'a [NormalizedRow],
    /// Shared header labels; every chunk points at the same value.
    pub labels: &'a ReceiptLabels,
}

impl RowChunk<'_> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Split `rows` into chunks of at most `size` rows.
///
/// Zero rows produce zero chunks; a zero-row chunk is never returned.
pub fn chunk_rows<'a>(
    rows: &'a [NormalizedRow],
    size: usize,
    labels: &'a ReceiptLabels,
) -> Result<Vec<RowChunk<'a>>, Sheet2PdfError> {
    if size == 0 {
        return Err(Sheet2PdfError::InvalidConfig(
            "Chunk size must be ≥ 1".into(),
        ));
    }

    Ok(rows
        .chunks(size)
        .enumerate()
        .map(|(index, rows)| RowChunk {
            index,
            first_row: index * size,
            rows,
            labels,
        })
        .collect())
}

/// Number of chunks `chunk_rows` will produce: `ceil(n / size)`.
pub fn chunk_count(n: usize, size: usize) -> usize {
    if size == 0 {
        0
    } else {
        n.div_ceil(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<NormalizedRow> {
        (0..n)
            .map(|i| NormalizedRow::new(vec![("id".to_string(), i.to_string())]))
            .collect()
    }

    fn labels() -> ReceiptLabels {
        ReceiptLabels {
            project: "p".into(),
            date: "d".into(),
        }
    }

    fn sizes(chunks: &[RowChunk<'_>]) -> Vec<usize> {
        chunks.iter().map(RowChunk::len).collect()
    }

    #[test]
    fn thousand_rows_by_four_hundred() {
        let r = rows(1000);
        let l = labels();
        let chunks = chunk_rows(&r, 400, &l).unwrap();
        assert_eq!(sizes(&chunks), vec![400, 400, 200]);
        assert_eq!(chunks[2].first_row, 800);
        assert_eq!(chunks[2].rows[0].get("id"), Some("800"));
    }

    #[test]
    fn exact_multiple_has_no_short_tail() {
        let r = rows(800);
        let l = labels();
        assert_eq!(sizes(&chunk_rows(&r, 400, &l).unwrap()), vec![400, 400]);
    }

    #[test]
    fn one_over_chunk_size_gives_tail_of_one() {
        let r = rows(401);
        let l = labels();
        assert_eq!(sizes(&chunk_rows(&r, 400, &l).unwrap()), vec![400, 1]);
    }

    #[test]
    fn zero_rows_give_zero_chunks() {
        let l = labels();
        assert!(chunk_rows(&[], 400, &l).unwrap().is_empty());
        assert_eq!(chunk_count(0, 400), 0);
    }

    #[test]
    fn zero_size_is_rejected() {
        let r = rows(3);
        let l = labels();
        assert!(matches!(
            chunk_rows(&r, 0, &l),
            Err(Sheet2PdfError::InvalidConfig(_))
        ));
    }

    #[test]
    fn chunks_share_labels() {
        let r = rows(5);
        let l = labels();
        let chunks = chunk_rows(&r, 2, &l).unwrap();
        assert!(chunks.iter().all(|c| std::ptr::eq(c.labels, &l)));
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
