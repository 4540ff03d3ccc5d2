//! Transfer-session bookkeeping shared by the receive side of OTA.

/// The phases of an in-flight update, strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    /// Chunks are still arriving.
    Receiving,
    /// All chunks staged; checksum verification pending.
    Verifying,
    /// Image verified; activation pending.
    Activating,
}

/// Fixed bitmap of received chunk indices.
#[derive(Debug, Clone)]
pub struct ChunkBitmap {
    words: Vec<u64>,
    total: u32,
    received: u32,
}

impl ChunkBitmap {
    pub fn new(total: u32) -> Self {
        let words = vec![0u64; (total as usize).div_ceil(64)];
        ChunkBitmap {
            words,
            total,
            received: 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn contains(&self, index: u32) -> bool {
        if index >= self.total {
            return false;
        }
        self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    /// Record an index. Returns true if it was newly set.
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.total || self.contains(index) {
            return false;
        }
        self.words[(index / 64) as usize] |= 1u64 << (index % 64);
        self.received += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.total
    }

    /// The lowest missing indices, at most `limit` of them.
    pub fn missing(&self, limit: usize) -> Vec<u32> {
        let mut out = Vec::new();
        for index in 0..self.total {
            if !self.contains(index) {
                out.push(index);
                if out.len() == limit {
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_complete() {
        let mut bitmap = ChunkBitmap::new(3);
        assert!(bitmap.set(0));
        assert!(!bitmap.set(0));
        assert!(!bitmap.is_complete());
        assert!(bitmap.set(2));
        assert!(bitmap.set(1));
        assert!(bitmap.is_complete());
        assert_eq!(bitmap.received(), 3);
    }

    #[test]
    fn test_set_out_of_range_ignored() {
        let mut bitmap = ChunkBitmap::new(2);
        assert!(!bitmap.set(2));
        assert_eq!(bitmap.received(), 0);
    }

    #[test]
    fn test_missing_respects_limit() {
        let mut bitmap = ChunkBitmap::new(130);
        bitmap.set(0);
        bitmap.set(64);
        let missing = bitmap.missing(3);
        assert_eq!(missing, vec![1, 2, 3]);
        assert_eq!(bitmap.missing(256).len(), 128);
    }

    #[test]
    fn test_word_boundary() {
        let mut bitmap = ChunkBitmap::new(65);
        for i in 0..65 {
            assert!(bitmap.set(i));
        }
        assert!(bitmap.is_complete());
    }
}
