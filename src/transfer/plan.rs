//! Chunk planning for fixed-size transfers
//!
//! Splits a transfer of known size into contiguous, disjoint chunks. Every
//! chunk is `chunk_size` long except the last, which holds the remainder.

use crate::error::{Result, TransferError};

/// Parallelism used when a caller passes zero
pub const DEFAULT_PARALLELISM: u16 = 5;

/// A contiguous byte range of a larger transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in offset order
    pub index: usize,
    pub offset: u64,
    pub length: u64,
}

impl Chunk {
    /// Exclusive end of the chunk
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Size parameters of a single transfer call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    total_size: u64,
    chunk_size: u64,
    parallelism: u16,
}

impl TransferPlan {
    /// Build a plan, rejecting a zero chunk size even for empty transfers.
    pub fn new(total_size: u64, chunk_size: u64, parallelism: u16) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TransferError::invalid_argument(
                "chunk size must be greater than zero",
            ));
        }

        let parallelism = if parallelism == 0 {
            DEFAULT_PARALLELISM
        } else {
            parallelism
        };

        Ok(Self {
            total_size,
            chunk_size,
            parallelism,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn parallelism(&self) -> u16 {
        self.parallelism
    }

    /// Number of chunks; an empty transfer has none.
    pub fn chunk_count(&self) -> usize {
        if self.total_size == 0 {
            return 0;
        }
        ((self.total_size - 1) / self.chunk_size + 1) as usize
    }

    /// The chunk at `index`, or `None` past the end of the plan
    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        if index >= self.chunk_count() {
            return None;
        }
        let offset = index as u64 * self.chunk_size;
        let length = self.chunk_size.min(self.total_size - offset);
        Some(Chunk {
            index,
            offset,
            length,
        })
    }

    /// Chunks in ascending offset order
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.chunk_count()).filter_map(move |index| self.chunk(index))
    }
}

/// Plan the chunks of a transfer without a parallelism bound.
pub fn plan(total_size: u64, chunk_size: u64) -> Result<Vec<Chunk>> {
    let plan = TransferPlan::new(total_size, chunk_size, DEFAULT_PARALLELISM)?;
    Ok(plan.chunks().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        let chunks = plan(100, 10).unwrap();
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.length == 10));
    }

    #[test]
    fn test_remainder_chunk() {
        let chunks = plan(100, 9).unwrap();
        assert_eq!(chunks.len(), 12);
        assert_eq!(chunks[10].length, 9);
        assert_eq!(chunks[11].length, 1);
        assert_eq!(chunks[11].offset, 99);
    }

    #[test]
    fn test_coverage_without_gaps() {
        for (total, size) in [(1u64, 1u64), (7, 3), (1000, 7), (4096, 4096), (4097, 4096)] {
            let chunks = plan(total, size).unwrap();
            let mut expected_offset = 0;
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
                assert_eq!(chunk.offset, expected_offset);
                assert!(chunk.length > 0 && chunk.length <= size);
                expected_offset = chunk.end();
            }
            assert_eq!(expected_offset, total);
            assert_eq!(chunks.len() as u64, total.div_ceil(size));
        }
    }

    #[test]
    fn test_zero_total_has_no_chunks() {
        let plan = TransferPlan::new(0, 100, 5).unwrap();
        assert_eq!(plan.chunk_count(), 0);
        assert!(plan.chunk(0).is_none());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            TransferPlan::new(100, 0, 5),
            Err(TransferError::InvalidArgument(_))
        ));
        assert!(matches!(
            TransferPlan::new(0, 0, 5),
            Err(TransferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_default_parallelism() {
        let plan = TransferPlan::new(10, 1, 0).unwrap();
        assert_eq!(plan.parallelism(), DEFAULT_PARALLELISM);
    }
}
