use std::fmt;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// How an object is split across stream workers.
///
/// Ranges are contiguous, non-overlapping and cover `[0, total_bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub total_bytes: u64,
    pub ranges: Vec<ByteRange>,
}

impl TransferPlan {
    /// Splits `total_bytes` into `min(server_max, configured_max)` near-equal
    /// ranges. The last range absorbs the remainder.
    ///
    /// At least one stream is planned, and never more streams than bytes.
    pub fn partition(total_bytes: u64, server_max: u32, configured_max: u32) -> Self {
        let mut count = u64::from(server_max.min(configured_max).max(1));
        if total_bytes > 0 {
            count = count.min(total_bytes);
        } else {
            count = 1;
        }

        let base = total_bytes / count;
        let ranges = (0..count)
            .map(|i| {
                let start = i * base;
                let end = if i == count - 1 { total_bytes } else { start + base };
                ByteRange { start, end }
            })
            .collect();

        Self {
            total_bytes,
            ranges,
        }
    }

    /// One stream covering the whole object.
    pub fn single(total_bytes: u64) -> Self {
        Self::partition(total_bytes, 1, 1)
    }

    pub fn stream_count(&self) -> usize {
        self.ranges.len()
    }
}
