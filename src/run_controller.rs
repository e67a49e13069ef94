//! Maps debugger resume requests onto trace-cursor motion.
//!
//! A motion either steps once or runs the cursor until a breakpoint, a
//! trace boundary, or a pending interrupt stops it. The controller never
//! blocks: the interrupt predicate is polled between cursor motions at a
//! bounded interval so a Ctrl-C from the debugger lands promptly even in
//! the middle of a long continue.

use crate::breakpoint::{BreakpointKind, BreakpointTable};
use crate::cpu_state::CpuState;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum RunDirection {
    RunForward,
    RunBackward,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StopReason {
    Breakpoint { pc: u64, kind: BreakpointKind },
    StepComplete,
    TraceEnd,
    TraceStart,
    Interrupted,
}

/// Cursor motions between interrupt polls.
const INTERRUPT_CHECK_INTERVAL: u64 = 1024;

pub struct RunController<'a> {
    cpu: &'a mut CpuState,
    breakpoints: &'a BreakpointTable,
}

impl<'a> RunController<'a> {
    pub fn new(cpu: &'a mut CpuState, breakpoints: &'a BreakpointTable) -> RunController<'a> {
        RunController { cpu, breakpoints }
    }

    /// One motion. A step at a boundary pins the cursor and reports the
    /// boundary; it never reports a breakpoint.
    pub fn step(&mut self, dir: RunDirection) -> StopReason {
        match dir {
            RunDirection::RunForward => {
                if self.cpu.at_end() {
                    return StopReason::TraceEnd;
                }
                self.cpu.advance();
                StopReason::StepComplete
            }
            RunDirection::RunBackward => {
                if self.cpu.at_start() {
                    return StopReason::TraceStart;
                }
                self.cpu.retreat();
                StopReason::StepComplete
            }
        }
    }

    /// Run until a breakpointed PC, the trace boundary, or an interrupt.
    /// At least one motion happens before the first breakpoint test, so a
    /// breakpoint at the current PC does not immediately re-trigger.
    pub fn cont(
        &mut self,
        dir: RunDirection,
        interrupt_pending: &mut dyn FnMut() -> bool,
    ) -> StopReason {
        let mut motions: u64 = 0;
        loop {
            match dir {
                RunDirection::RunForward => {
                    if self.cpu.at_end() {
                        return StopReason::TraceEnd;
                    }
                    self.cpu.advance();
                }
                RunDirection::RunBackward => {
                    if self.cpu.at_start() {
                        return StopReason::TraceStart;
                    }
                    self.cpu.retreat();
                }
            }
            let pc = self.cpu.pc();
            if let Some(kind) = self.breakpoints.lookup(pc) {
                return StopReason::Breakpoint { pc, kind };
            }
            motions += 1;
            if motions % INTERRUPT_CHECK_INTERVAL == 0 && interrupt_pending() {
                return StopReason::Interrupted;
            }
        }
    }
}
