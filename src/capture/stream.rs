//! In-order reassembly for streamed per-frame text chunks.
//!
//! Frames are extracted concurrently, so their rendered chunks can complete
//! out of order. Each chunk carries a monotonic index assigned up front;
//! the assembler buffers gaps and flushes strictly in index order, so the
//! final text is deterministic regardless of arrival order.

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ChunkAssembler {
    next_index: u64,
    pending: BTreeMap<u64, String>,
    assembled: String,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one chunk; flushes everything that is now contiguous.
    ///
    /// A duplicate index overwrites the buffered chunk; an index below the
    /// flush watermark is dropped.
    pub fn push(&mut self, index: u64, chunk: String) {
        if index < self.next_index {
            log::debug!("dropping already-flushed chunk {}", index);
            return;
        }
        self.pending.insert(index, chunk);
        self.flush_ready();
    }

    fn flush_ready(&mut self) {
        while let Some(chunk) = self.pending.remove(&self.next_index) {
            if !self.assembled.is_empty() && !chunk.is_empty() {
                self.assembled.push('\n');
            }
            self.assembled.push_str(&chunk);
            self.next_index += 1;
        }
    }

    /// True when no out-of-order chunks are still buffered
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of chunks flushed into the assembled text so far
    pub fn flushed(&self) -> u64 {
        self.next_index
    }

    pub fn into_text(self) -> String {
        self.assembled
    }
}
