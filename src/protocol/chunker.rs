use serde::Serialize;

/// Default chunk size: 2 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// One contiguous byte range `[from, to)` of a file, sent in a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    pub from: u64,
    pub to: u64,
    pub is_last: bool,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }
}

/// The range to send after `cursor` bytes have been confirmed.
///
/// Pure: retrying from the same cursor yields the same range. A zero-byte
/// file still gets one empty terminal range so its upload completes.
pub fn next_range(file_size: u64, cursor: u64, chunk_size: u64) -> ChunkRange {
    let chunk_size = chunk_size.max(1);
    let from = cursor.min(file_size);
    let to = from.saturating_add(chunk_size).min(file_size);
    ChunkRange {
        from,
        to,
        is_last: to >= file_size,
    }
}

/// Every range of a file in upload order.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    cursor: u64,
    done: bool,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        Self {
            file_size,
            chunk_size,
            cursor: 0,
            done: false,
        }
    }

    /// Number of requests needed for the whole file.
    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size.max(1)).max(1)
    }
}

impl Iterator for ChunkPlan {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.done {
            return None;
        }
        let range = next_range(self.file_size, self.cursor, self.chunk_size);
        self.cursor = range.to;
        self.done = range.is_last;
        Some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(file_size: u64, chunk_size: u64) {
        let ranges: Vec<ChunkRange> = ChunkPlan::new(file_size, chunk_size).collect();
        assert!(!ranges.is_empty());
        assert_eq!(ranges[0].from, 0);
        assert_eq!(ranges.last().unwrap().to, file_size);

        for pair in ranges.windows(2) {
            assert_eq!(pair[0].to, pair[1].from, "ranges must be contiguous");
            assert!(!pair[0].is_last, "only the final range may be last");
            assert!(pair[0].to < file_size);
        }
        for r in &ranges {
            assert!(r.from <= r.to);
            assert!(r.len() <= chunk_size);
        }
        assert!(ranges.last().unwrap().is_last);
        assert_eq!(
            ranges.len() as u64,
            ChunkPlan::new(file_size, chunk_size).chunk_count()
        );
    }

    #[test]
    fn test_five_megabyte_file_with_two_mib_chunks() {
        let ranges: Vec<ChunkRange> = ChunkPlan::new(5_000_000, 2_097_152).collect();
        assert_eq!(
            ranges,
            vec![
                ChunkRange {
                    from: 0,
                    to: 2_097_152,
                    is_last: false,
                },
                ChunkRange {
                    from: 2_097_152,
                    to: 4_194_304,
                    is_last: false,
                },
                ChunkRange {
                    from: 4_194_304,
                    to: 5_000_000,
                    is_last: true,
                },
            ]
        );
    }

    #[test]
    fn test_zero_byte_file_has_one_terminal_range() {
        let ranges: Vec<ChunkRange> = ChunkPlan::new(0, DEFAULT_CHUNK_SIZE).collect();
        assert_eq!(
            ranges,
            vec![ChunkRange {
                from: 0,
                to: 0,
                is_last: true,
            }]
        );
        assert!(ranges[0].is_empty());
    }

    #[test]
    fn test_chunk_larger_than_file_is_single_range() {
        let r = next_range(100, 0, 4096);
        assert_eq!(
            r,
            ChunkRange {
                from: 0,
                to: 100,
                is_last: true,
            }
        );
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_empty_range() {
        let ranges: Vec<ChunkRange> = ChunkPlan::new(8, 4).collect();
        assert_eq!(ranges.len(), 2);
        assert!(ranges[1].is_last);
        assert_eq!(ranges[1].to, 8);
    }

    #[test]
    fn test_next_range_is_idempotent() {
        assert_eq!(next_range(1000, 300, 256), next_range(1000, 300, 256));
    }

    #[test]
    fn test_partition_over_many_sizes() {
        for file_size in [0u64, 1, 2, 3, 7, 64, 255, 256, 257, 1000, 4097] {
            for chunk_size in [1u64, 2, 3, 16, 255, 256, 1024, 5000] {
                assert_partition(file_size, chunk_size);
            }
        }
    }
}
