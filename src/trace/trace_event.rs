//! The normalized record of one retired instruction.
//!
//! Readers for the concrete simulator formats all produce this shape; the
//! replay cursor consumes it. Events are densely indexed by their position
//! in the trace vector and are immutable once parsed.

/// One retired instruction.
///
/// `pc_after` of event `i` equals `pc_before` of event `i + 1`; for the final
/// event it is derived from the instruction encoding width when known. Old
/// register/memory values are deliberately absent here: no supported trace
/// format records pre-images, so the cursor captures them into its reversal
/// log the first time an event is applied.
#[derive(Clone, Debug)]
pub struct TraceEvent {
    pub pc_before: u64,
    pub pc_after: u64,
    pub reg_writes: Vec<RegWrite>,
    pub mem_writes: Vec<MemWrite>,
    /// Read observations, used to populate the memory overlay lazily.
    /// Never unapplied on rewind.
    pub mem_reads: Vec<MemRead>,
    /// Disassembly hint; carried for diagnostics, unused by the protocol.
    pub disasm: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegWrite {
    /// Architectural register index, as agreed with the dispatcher's
    /// register map.
    pub reg: usize,
    pub value: u64,
}

/// A store: `data` is in memory order (one entry per byte address).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemWrite {
    pub addr: u64,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemRead {
    pub addr: u64,
    pub data: Vec<u8>,
}

impl TraceEvent {
    pub fn new(pc_before: u64, pc_after: u64) -> TraceEvent {
        TraceEvent {
            pc_before,
            pc_after,
            reg_writes: Vec::new(),
            mem_writes: Vec::new(),
            mem_reads: Vec::new(),
            disasm: None,
        }
    }
}
