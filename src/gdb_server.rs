//! The RSP command dispatcher: one session between a connected debugger
//! and the replayed CPU.
//!
//! The session alternates between two states. Stopped: queries are
//! answered immediately from the CPU state. Running: a resume request
//! hands control to the run controller, which moves the cursor until
//! something stops it, and the resulting stop reason is reported back as a
//! `T` stop reply. The debugger believes it is talking to a live stub; in
//! reality every answer comes from the trace.

use crate::arch::CpuArch;
use crate::breakpoint::{Breakpoint, BreakpointKind, BreakpointTable};
use crate::cpu_state::CpuState;
use crate::gdb_connection::{
    breakpoint_kind_of_ztype, GdbConnection, GdbRequest, InboundPacket, PacketStream,
    MAX_PACKET_SIZE,
};
use crate::log::LogLevel::{LogInfo, LogWarn};
use crate::run_controller::{RunController, RunDirection, StopReason};
use crate::trace::trace_event::TraceEvent;
use crate::util;
use std::io;
use std::rc::Rc;

pub struct GdbServer {
    cpu: CpuState,
    breakpoints: BreakpointTable,
    detached: bool,
}

impl GdbServer {
    pub fn new(arch: &'static CpuArch, trace: Rc<Vec<TraceEvent>>) -> GdbServer {
        GdbServer {
            cpu: CpuState::new(arch, trace),
            breakpoints: BreakpointTable::new(),
            detached: false,
        }
    }

    /// Serve one debugger until it disconnects or detaches.
    pub fn serve<S: PacketStream>(&mut self, conn: &mut GdbConnection<S>) -> io::Result<()> {
        loop {
            let req = match conn.read_packet()? {
                None => {
                    log!(LogInfo, "debugger disconnected");
                    return Ok(());
                }
                Some(InboundPacket::Interrupt) => {
                    // an interrupt with nothing running still gets its one
                    // stop reply
                    let reply = self.stop_reply(StopReason::Interrupted);
                    conn.send_packet(&reply)?;
                    continue;
                }
                Some(InboundPacket::Payload(payload)) => GdbRequest::parse(&payload),
            };

            if req == GdbRequest::StartNoAckMode {
                // the OK must go out (and be acked) under the old regime
                conn.send_packet(b"OK")?;
                conn.start_no_ack_mode();
                continue;
            }

            let reply = self.dispatch(req, &mut || conn.poll_interrupt());
            conn.send_packet(&reply)?;

            if self.detached {
                log!(LogInfo, "debugger detached");
                return Ok(());
            }
        }
    }

    /// Answer one request. Motions consult `interrupt_pending` so a Ctrl-C
    /// can abort them mid-run.
    pub fn dispatch(
        &mut self,
        req: GdbRequest,
        interrupt_pending: &mut dyn FnMut() -> bool,
    ) -> Vec<u8> {
        use GdbRequest::*;
        match req {
            GetStopReason => b"S05".to_vec(),
            ReadAllRegisters => self.read_all_registers(),
            WriteAllRegisters(bytes) => {
                let size = self.cpu.arch().register_size;
                for (reg, chunk) in bytes.chunks_exact(size).enumerate() {
                    if self.cpu.arch().is_valid_register(reg) {
                        self.cpu.write_reg(reg, util::le_bytes_to_value(chunk));
                    }
                }
                b"OK".to_vec()
            }
            ReadRegister(reg) => {
                if !self.cpu.arch().is_valid_register(reg) {
                    log!(LogWarn, "unrecognized register number {} on read", reg);
                    return Vec::new();
                }
                let size = self.cpu.arch().register_size;
                match self.cpu.read_reg(reg) {
                    Some(v) => util::encode_value_le(v, size).into_bytes(),
                    None => "xx".repeat(size).into_bytes(),
                }
            }
            WriteRegister { reg, bytes } => {
                if self.cpu.arch().is_valid_register(reg) {
                    self.cpu.write_reg(reg, util::le_bytes_to_value(&bytes));
                } else {
                    log!(LogWarn, "unrecognized register number {} on write", reg);
                }
                b"OK".to_vec()
            }
            ReadMemory { addr, len } => self.read_memory(addr, len),
            WriteMemory { addr, bytes } => {
                self.cpu.write_mem(addr, &bytes);
                b"OK".to_vec()
            }
            InsertBreakpoint {
                ztype,
                addr,
                length,
            } => match breakpoint_kind_of_ztype(ztype) {
                Some(kind) => {
                    self.breakpoints.insert(Breakpoint { addr, kind, length });
                    b"OK".to_vec()
                }
                // watchpoints are unsupported: no memory access ever happens
                None => Vec::new(),
            },
            RemoveBreakpoint { ztype, addr, .. } => match breakpoint_kind_of_ztype(ztype) {
                Some(kind) => {
                    self.breakpoints.remove(addr, kind);
                    b"OK".to_vec()
                }
                None => Vec::new(),
            },
            Resume { dir, step } => {
                let stop = {
                    let mut ctrl = RunController::new(&mut self.cpu, &self.breakpoints);
                    if step {
                        ctrl.step(dir)
                    } else {
                        ctrl.cont(dir, interrupt_pending)
                    }
                };
                self.stop_reply(stop)
            }
            QuerySupported => format!(
                "PacketSize={:x};qXfer:features:read+;swbreak+;hwbreak+;QStartNoAckMode+;\
                 ReverseStep+;ReverseContinue+;vContSupported+",
                MAX_PACKET_SIZE
            )
            .into_bytes(),
            StartNoAckMode => b"OK".to_vec(),
            QueryAttached => b"1".to_vec(),
            QueryCurrentThread => b"QC1".to_vec(),
            QueryThreadInfoFirst => b"m1".to_vec(),
            QueryThreadInfoNext => b"l".to_vec(),
            QuerySymbolsDone => b"OK".to_vec(),
            SetThread => b"OK".to_vec(),
            XferFeaturesRead { annex, offset, len } => self.xfer_features_read(&annex, offset, len),
            MustReplyEmpty => Vec::new(),
            VContQuery => b"vCont;c;C;s;S".to_vec(),
            Detach => {
                self.detached = true;
                b"OK".to_vec()
            }
            Unknown => Vec::new(),
        }
    }

    /// The whole register file in architectural order, little-endian hex
    /// per register; registers the replay has not determined yet read as
    /// `xx..`.
    fn read_all_registers(&self) -> Vec<u8> {
        let arch = self.cpu.arch();
        let mut out = String::with_capacity(arch.register_count * arch.register_size * 2);
        for reg in 0..arch.register_count {
            match self.cpu.read_reg(reg) {
                Some(v) => out.push_str(&util::encode_value_le(v, arch.register_size)),
                None => out.push_str(&"xx".repeat(arch.register_size)),
            }
        }
        out.into_bytes()
    }

    fn read_memory(&self, addr: u64, len: usize) -> Vec<u8> {
        let bytes = self.cpu.read_mem(addr, len);
        if len > 0 && bytes.iter().all(|b| b.is_none()) {
            return b"E14".to_vec();
        }
        let mut out = String::with_capacity(len * 2);
        for b in bytes {
            match b {
                Some(v) => out.push_str(&format!("{:02x}", v)),
                None => out.push_str("xx"),
            }
        }
        out.into_bytes()
    }

    fn xfer_features_read(&self, annex: &str, offset: usize, len: usize) -> Vec<u8> {
        let xml = match (annex, self.cpu.arch().target_description_xml) {
            ("target.xml", Some(xml)) => xml.as_bytes(),
            _ => return b"E00".to_vec(),
        };
        if offset >= xml.len() {
            return b"l".to_vec();
        }
        let end = (offset + len).min(xml.len());
        let mut reply = Vec::with_capacity(end - offset + 1);
        reply.push(if end < xml.len() { b'm' } else { b'l' });
        reply.extend_from_slice(&xml[offset..end]);
        reply
    }

    /// `T05thread:1;<pcreg>:<pc>;` plus `swbreak:;`/`hwbreak:;` for
    /// breakpoint stops or `reason:trace-end;`/`reason:trace-start;` at the
    /// trace boundaries. Interrupts report SIGINT.
    fn stop_reply(&self, stop: StopReason) -> Vec<u8> {
        let arch = self.cpu.arch();
        let pc_pair = format!(
            "{:02x}:{};",
            arch.pc_register,
            util::encode_value_le(self.cpu.pc(), arch.register_size)
        );
        let reply = match stop {
            StopReason::Interrupted => "T02thread:1;".to_owned(),
            StopReason::StepComplete => format!("T05thread:1;{}", pc_pair),
            StopReason::Breakpoint { kind, .. } => {
                let kind_pair = match kind {
                    BreakpointKind::Software => "swbreak:;",
                    BreakpointKind::Hardware => "hwbreak:;",
                };
                format!("T05thread:1;{}{}", pc_pair, kind_pair)
            }
            StopReason::TraceEnd => format!("T05thread:1;{}reason:trace-end;", pc_pair),
            StopReason::TraceStart => format!("T05thread:1;{}reason:trace-start;", pc_pair),
        };
        reply.into_bytes()
    }
}
