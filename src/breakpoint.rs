//! Process-wide breakpoint table.
//!
//! Since no instructions ever execute, software and hardware breakpoints
//! are behaviorally identical: both are just addresses the run controller
//! compares the PC against. The kind is kept so stop replies can say
//! `swbreak` vs `hwbreak`.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BreakpointKind {
    Software,
    Hardware,
}

/// Identity is address + kind; `length` (the kind field of the Z packet,
/// 2 or 4 for RISC-V) is carried but does not distinguish breakpoints.
#[derive(Copy, Clone, Debug)]
pub struct Breakpoint {
    pub addr: u64,
    pub kind: BreakpointKind,
    pub length: u32,
}

impl PartialEq for Breakpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.kind == other.kind
    }
}

impl Eq for Breakpoint {}

impl Hash for Breakpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
        self.kind.hash(state);
    }
}

#[derive(Default)]
pub struct BreakpointTable {
    set: HashSet<Breakpoint>,
}

impl BreakpointTable {
    pub fn new() -> BreakpointTable {
        Default::default()
    }

    /// Re-inserting an existing address+kind updates its length.
    pub fn insert(&mut self, bp: Breakpoint) {
        self.set.replace(bp);
    }

    pub fn remove(&mut self, addr: u64, kind: BreakpointKind) -> bool {
        self.set.remove(&Breakpoint {
            addr,
            kind,
            length: 0,
        })
    }

    /// Which kind of breakpoint, if any, covers `pc`. Software wins when
    /// both kinds sit on the same address.
    pub fn lookup(&self, pc: u64) -> Option<BreakpointKind> {
        for &kind in &[BreakpointKind::Software, BreakpointKind::Hardware] {
            if self.set.contains(&Breakpoint {
                addr: pc,
                kind,
                length: 0,
            }) {
                return Some(kind);
            }
        }
        None
    }

    pub fn contains(&self, pc: u64) -> bool {
        self.lookup(pc).is_some()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }
}
