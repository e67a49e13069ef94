//! The replayable CPU state: registers plus a sparse memory overlay, kept
//! consistent with a cursor into the trace.
//!
//! Applying an event records the pre-image of everything it touches into a
//! reversal log, so rewinding is O(delta) rather than a replay from the
//! start. A value whose pre-image was never observed (first write to a
//! register, store to a never-seen address) rewinds to "unavailable" and is
//! reported to the debugger as such.

use crate::arch::CpuArch;
use crate::log::LogLevel::LogDebug;
use crate::trace::trace_event::TraceEvent;
use std::collections::HashMap;
use std::rc::Rc;

/// Pre-images captured when one event was applied. `regs` holds the PC and
/// every written register; `mem` holds one entry per stored byte. `None`
/// means the location had no recorded value before the event.
struct UndoEntry {
    regs: Vec<(usize, Option<u64>)>,
    mem: Vec<(u64, Option<u8>)>,
}

pub struct CpuState {
    arch: &'static CpuArch,
    trace: Rc<Vec<TraceEvent>>,
    /// Index of the most recently applied event; -1 = before event 0.
    cursor: isize,
    registers: Vec<Option<u64>>,
    /// Debugger-issued register writes. Replay is authoritative, so these
    /// shadow reads until the next cursor motion and are then discarded.
    shadow_registers: HashMap<usize, u64>,
    /// Sparse byte-addressed overlay. No implicit zero fill.
    memory: HashMap<u64, u8>,
    /// One entry per applied event, in application order.
    undo_log: Vec<UndoEntry>,
}

impl CpuState {
    /// `trace` must be non-empty (validated by the reader).
    pub fn new(arch: &'static CpuArch, trace: Rc<Vec<TraceEvent>>) -> CpuState {
        let mut registers = vec![None; arch.register_count];
        for &(reg, value) in arch.hardwired {
            registers[reg] = Some(value);
        }
        registers[arch.pc_register] = Some(trace[0].pc_before & arch.value_mask());
        CpuState {
            arch,
            trace,
            cursor: -1,
            registers,
            shadow_registers: HashMap::new(),
            memory: HashMap::new(),
            undo_log: Vec::new(),
        }
    }

    pub fn arch(&self) -> &'static CpuArch {
        self.arch
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }

    pub fn at_start(&self) -> bool {
        self.cursor < 0
    }

    pub fn at_end(&self) -> bool {
        self.cursor + 1 >= self.trace.len() as isize
    }

    /// The PC always has a value: it is seeded from `event[0].pc_before` and
    /// every event records it in its pre-image.
    pub fn pc(&self) -> u64 {
        self.registers[self.arch.pc_register].expect("pc register always has a value")
    }

    pub fn read_reg(&self, reg: usize) -> Option<u64> {
        if let Some(&v) = self.shadow_registers.get(&reg) {
            return Some(v);
        }
        self.registers.get(reg).copied().flatten()
    }

    /// Shadow write: visible to subsequent reads, discarded on the next
    /// motion, never part of replay state.
    pub fn write_reg(&mut self, reg: usize, value: u64) {
        log!(
            LogDebug,
            "shadowing debugger write of {:#x} to register {}",
            value,
            reg
        );
        self.shadow_registers.insert(reg, value & self.arch.value_mask());
    }

    /// Per-byte read; `None` marks bytes absent from the overlay.
    pub fn read_mem(&self, addr: u64, len: usize) -> Vec<Option<u8>> {
        (0..len as u64)
            .map(|i| self.memory.get(&addr.wrapping_add(i)).copied())
            .collect()
    }

    /// Unconditional overlay store; this is how the debugger's `load` and
    /// user pokes land.
    pub fn write_mem(&mut self, addr: u64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.memory.insert(addr.wrapping_add(i as u64), b);
        }
    }

    /// Apply `event[cursor + 1]`. Caller checks `at_end()` first.
    pub fn advance(&mut self) {
        debug_assert!(!self.at_end());
        let trace = self.trace.clone();
        let ev = &trace[(self.cursor + 1) as usize];
        let mask = self.arch.value_mask();

        let mut undo = UndoEntry {
            regs: Vec::with_capacity(ev.reg_writes.len() + 1),
            mem: Vec::new(),
        };
        undo.regs
            .push((self.arch.pc_register, self.registers[self.arch.pc_register]));
        for rw in &ev.reg_writes {
            if self.arch.is_valid_register(rw.reg) {
                undo.regs.push((rw.reg, self.registers[rw.reg]));
            }
        }
        for mw in &ev.mem_writes {
            for i in 0..mw.data.len() as u64 {
                let a = mw.addr.wrapping_add(i);
                undo.mem.push((a, self.memory.get(&a).copied()));
            }
        }

        self.registers[self.arch.pc_register] = Some(ev.pc_after & mask);
        for rw in &ev.reg_writes {
            if self.arch.is_valid_register(rw.reg) {
                self.registers[rw.reg] = Some(rw.value & mask);
            } else {
                log!(LogDebug, "ignoring write to out-of-range register {}", rw.reg);
            }
        }
        for mw in &ev.mem_writes {
            self.write_mem(mw.addr, &mw.data);
        }
        // Read observations only fill holes; they never override a recorded
        // write and are never unapplied.
        for mr in &ev.mem_reads {
            for (i, &b) in mr.data.iter().enumerate() {
                self.memory.entry(mr.addr.wrapping_add(i as u64)).or_insert(b);
            }
        }

        self.undo_log.push(undo);
        self.cursor += 1;
        self.shadow_registers.clear();
    }

    /// Unapply `event[cursor]`. Caller checks `at_start()` first.
    pub fn retreat(&mut self) {
        debug_assert!(!self.at_start());
        let undo = self
            .undo_log
            .pop()
            .expect("an applied event always has an undo entry");
        for (reg, old) in undo.regs {
            self.registers[reg] = old;
        }
        for (addr, old) in undo.mem {
            match old {
                Some(b) => {
                    self.memory.insert(addr, b);
                }
                None => {
                    self.memory.remove(&addr);
                }
            }
        }
        self.cursor -= 1;
        self.shadow_registers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RISCV64;
    use crate::trace::trace_event::{MemRead, MemWrite, RegWrite, TraceEvent};

    fn mkstate(events: Vec<TraceEvent>) -> CpuState {
        CpuState::new(&RISCV64, Rc::new(events))
    }

    fn sample_trace() -> Vec<TraceEvent> {
        let mut e0 = TraceEvent::new(0x1000, 0x1004);
        e0.reg_writes.push(RegWrite { reg: 5, value: 0x1000 });
        let mut e1 = TraceEvent::new(0x1004, 0x1008);
        e1.reg_writes.push(RegWrite { reg: 5, value: 0x2000 });
        e1.mem_writes.push(MemWrite {
            addr: 0x80,
            data: vec![0xaa, 0xbb],
        });
        let mut e2 = TraceEvent::new(0x1008, 0x100c);
        e2.mem_writes.push(MemWrite {
            addr: 0x80,
            data: vec![0x11, 0x22],
        });
        vec![e0, e1, e2]
    }

    #[test]
    fn initial_state() {
        let cpu = mkstate(sample_trace());
        assert!(cpu.at_start());
        assert!(!cpu.at_end());
        assert_eq!(cpu.cursor(), -1);
        assert_eq!(cpu.pc(), 0x1000);
        assert_eq!(cpu.read_reg(0), Some(0)); // hardwired zero
        assert_eq!(cpu.read_reg(5), None);
    }

    #[test]
    fn advance_applies_event() {
        let mut cpu = mkstate(sample_trace());
        cpu.advance();
        assert_eq!(cpu.cursor(), 0);
        assert_eq!(cpu.pc(), 0x1004);
        assert_eq!(cpu.read_reg(5), Some(0x1000));

        cpu.advance();
        assert_eq!(cpu.pc(), 0x1008);
        assert_eq!(cpu.read_reg(5), Some(0x2000));
        assert_eq!(cpu.read_mem(0x80, 2), vec![Some(0xaa), Some(0xbb)]);
    }

    #[test]
    fn advance_then_retreat_is_identity() {
        let mut cpu = mkstate(sample_trace());
        cpu.advance();
        let regs_before: Vec<Option<u64>> = (0..33).map(|r| cpu.read_reg(r)).collect();
        let pc_before = cpu.pc();

        cpu.advance();
        cpu.retreat();

        let regs_after: Vec<Option<u64>> = (0..33).map(|r| cpu.read_reg(r)).collect();
        assert_eq!(regs_before, regs_after);
        assert_eq!(cpu.pc(), pc_before);
    }

    #[test]
    fn retreat_restores_overwritten_memory() {
        let mut cpu = mkstate(sample_trace());
        cpu.advance();
        cpu.advance(); // writes aa bb at 0x80
        cpu.advance(); // overwrites with 11 22
        assert_eq!(cpu.read_mem(0x80, 2), vec![Some(0x11), Some(0x22)]);

        cpu.retreat();
        assert_eq!(cpu.read_mem(0x80, 2), vec![Some(0xaa), Some(0xbb)]);

        // before the first store the bytes were never recorded
        cpu.retreat();
        assert_eq!(cpu.read_mem(0x80, 2), vec![None, None]);
    }

    #[test]
    fn retreat_marks_first_written_register_unavailable() {
        let mut cpu = mkstate(sample_trace());
        cpu.advance();
        assert_eq!(cpu.read_reg(5), Some(0x1000));
        cpu.retreat();
        assert_eq!(cpu.read_reg(5), None);
        assert_eq!(cpu.pc(), 0x1000);
    }

    #[test]
    fn replay_is_deterministic_across_rewinds() {
        let mut cpu = mkstate(sample_trace());
        cpu.advance();
        cpu.advance();
        cpu.advance();
        let file_direct: Vec<Option<u64>> = (0..33).map(|r| cpu.read_reg(r)).collect();
        let mem_direct = cpu.read_mem(0x80, 2);

        cpu.retreat();
        cpu.retreat();
        cpu.advance();
        cpu.retreat();
        cpu.advance();
        cpu.advance();
        assert_eq!(
            (0..33).map(|r| cpu.read_reg(r)).collect::<Vec<_>>(),
            file_direct
        );
        assert_eq!(cpu.read_mem(0x80, 2), mem_direct);
    }

    #[test]
    fn mem_reads_populate_holes_and_persist() {
        let mut e0 = TraceEvent::new(0x1000, 0x1004);
        e0.mem_reads.push(MemRead {
            addr: 0x40,
            data: vec![0x01, 0x02],
        });
        let e1 = TraceEvent::new(0x1004, 0x1008);
        let mut cpu = mkstate(vec![e0, e1]);

        cpu.advance();
        assert_eq!(cpu.read_mem(0x40, 2), vec![Some(0x01), Some(0x02)]);

        // observations are monotone: retreat does not evict them
        cpu.retreat();
        assert_eq!(cpu.read_mem(0x40, 2), vec![Some(0x01), Some(0x02)]);
    }

    #[test]
    fn mem_read_does_not_override_written_byte() {
        let mut e0 = TraceEvent::new(0x1000, 0x1004);
        e0.mem_writes.push(MemWrite {
            addr: 0x40,
            data: vec![0xff],
        });
        e0.mem_reads.push(MemRead {
            addr: 0x40,
            data: vec![0x01],
        });
        let e1 = TraceEvent::new(0x1004, 0x1008);
        let mut cpu = mkstate(vec![e0, e1]);
        cpu.advance();
        assert_eq!(cpu.read_mem(0x40, 1), vec![Some(0xff)]);
    }

    #[test]
    fn shadow_register_writes_override_until_motion() {
        let mut cpu = mkstate(sample_trace());
        cpu.advance();
        cpu.write_reg(5, 0xdead);
        assert_eq!(cpu.read_reg(5), Some(0xdead));

        cpu.advance();
        assert_eq!(cpu.read_reg(5), Some(0x2000));

        cpu.write_reg(6, 0xbeef);
        cpu.retreat();
        assert_eq!(cpu.read_reg(6), None);
    }

    #[test]
    fn debugger_memory_writes_stick() {
        let mut cpu = mkstate(sample_trace());
        cpu.write_mem(0x2000, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            cpu.read_mem(0x2000, 4),
            vec![Some(0xde), Some(0xad), Some(0xbe), Some(0xef)]
        );
        assert_eq!(cpu.read_mem(0x2004, 1), vec![None]);
    }
}
