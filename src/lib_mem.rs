#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use tracing::debug;

use crate::domain::{Mode, MIB};
use crate::error::{EngineError, EngineResult};
use crate::service::{FillStrategy, TailPolicy};

/// Granularity of heap growth: 128 KiB, eight blocks per megabyte.
pub const BLOCK_BYTES: usize = 128 * 1024;
pub const BLOCKS_PER_MB: usize = 8;

// Written into every new byte so the kernel has to back the pages.
const FILL_BYTE: u8 = 0xA5;

/// "ram" mode: holds the pressure as in-process allocations.
///
/// Memory lives in a list of chunks. Only the last chunk is open for growth; once it is
/// large relative to the target it is sealed instead of being reallocated, so growing into
/// gigabytes never copies what is already held. Nothing is released until the process exits.
#[derive(Debug)]
pub struct HeapGrowth {
    chunks: Vec<Vec<u8>>,
}

impl Default for HeapGrowth {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapGrowth {
    pub fn new() -> Self {
        Self {
            chunks: vec![Vec::new()],
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn footprint_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    /// Index of the chunk to grow, sealing the current one when it is already large
    /// relative to the target and growing it would reallocate.
    fn open_chunk(&mut self, need: usize, target_bytes: usize) -> usize {
        let seal = match self.chunks.last() {
            Some(c) => c.capacity() - c.len() < need && c.capacity() + c.capacity() / 4 >= target_bytes,
            None => true,
        };
        if seal {
            self.chunks.push(Vec::new());
        }
        self.chunks.len() - 1
    }
}

fn mb_to_bytes(mb: u64) -> EngineResult<usize> {
    usize::try_from(mb)
        .ok()
        .and_then(|mb| mb.checked_mul(BLOCKS_PER_MB * BLOCK_BYTES))
        .ok_or_else(|| EngineError::FillFailure(format!("{mb} MB does not fit in address space")))
}

impl FillStrategy for HeapGrowth {
    fn mode(&self) -> Mode {
        Mode::Ram
    }

    fn tail_policy(&self) -> TailPolicy {
        TailPolicy::Tenth
    }

    fn fill(&mut self, amount_mb: u64, target_delta_mb: u64) -> EngineResult<()> {
        let need = mb_to_bytes(amount_mb)?;
        let target_bytes = mb_to_bytes(target_delta_mb.max(amount_mb))?;
        let idx = self.open_chunk(need, target_bytes);
        let chunk = &mut self.chunks[idx];
        chunk
            .try_reserve(need)
            .map_err(|e| EngineError::FillFailure(format!("allocate {amount_mb} MB: {e}")))?;
        let len = chunk.len();
        chunk.resize(len + need, FILL_BYTE);
        debug!(
            chunk = idx,
            len = chunk.len(),
            cap = chunk.capacity(),
            target_delta_mb,
            amount_mb,
            "heap grown"
        );
        Ok(())
    }

    fn footprint_mb(&self) -> u64 {
        self.footprint_bytes() / MIB
    }
}
