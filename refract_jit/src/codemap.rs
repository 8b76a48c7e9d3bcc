//! Bytecode-to-machine-offset mapping for the baseline tier.
//!
//! The baseline compiler records, for every bytecode instruction boundary,
//! the offset of the corresponding machine code. OSR exits decode this map
//! once per compiled function and binary-search it per exit to find the
//! resumption address.

use refract_core::{ReconcileError, ReconcileResult};

/// One decoded mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPair {
    /// Bytecode offset of the instruction.
    pub bytecode_offset: u32,
    /// Offset of its machine code within the baseline code block.
    pub machine_offset: u32,
}

/// Decoded bytecode→machine map, sorted by bytecode offset.
#[derive(Debug, Clone, Default)]
pub struct BytecodeMap {
    pairs: Vec<OffsetPair>,
}

impl BytecodeMap {
    /// Decode from `(bytecode_offset, machine_offset)` pairs. Input order is
    /// arbitrary; the map sorts once here so lookups can binary-search.
    pub fn decode(pairs: impl IntoIterator<Item = (u32, u32)>) -> Self {
        let mut pairs: Vec<OffsetPair> = pairs
            .into_iter()
            .map(|(bytecode_offset, machine_offset)| OffsetPair {
                bytecode_offset,
                machine_offset,
            })
            .collect();
        pairs.sort_by_key(|p| p.bytecode_offset);
        Self { pairs }
    }

    /// Machine offset for an exact bytecode offset.
    pub fn machine_offset(&self, bytecode_offset: u32) -> ReconcileResult<u32> {
        self.pairs
            .binary_search_by_key(&bytecode_offset, |p| p.bytecode_offset)
            .map(|idx| self.pairs[idx].machine_offset)
            .map_err(|_| ReconcileError::UnmappedBytecode { bytecode_offset })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
