//! The gdb Remote Serial Protocol wire layer.
//!
//! This struct wraps up the state of the gdb packet protocol (framing,
//! checksums, acknowledgement, noack mode, retransmits) so the dispatcher
//! above it only ever sees decoded request payloads and sends decoded
//! reply payloads.
//!
//! Frame shape: `$` payload `#` two-hex-digit checksum, the checksum being
//! the 8-bit sum of the transmitted payload bytes. Inside a payload `}`
//! escapes the following byte XOR 0x20 and `*` run-length-encodes the
//! previous character (count = encoded byte - 29). A `0x03` byte outside
//! any frame is the debugger's interrupt and is surfaced as its own
//! inbound event.

use crate::breakpoint::BreakpointKind;
use crate::log::LogLevel::{LogDebug, LogWarn};
use crate::run_controller::RunDirection;
use crate::util;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{recv, MsgFlags};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

/// Advertised through qSupported as `PacketSize=4000` (hex).
pub const MAX_PACKET_SIZE: usize = 0x4000;

/// Consecutive checksum failures tolerated before the connection is
/// considered unusable.
const MAX_CHECKSUM_RETRIES: u32 = 8;

const INTERRUPT_BYTE: u8 = 0x03;

/// Transport the codec runs over. `peek_byte` is the non-blocking look at
/// pending input used to catch Ctrl-C mid-motion.
pub trait PacketStream: Read + Write {
    /// Next pending byte without consuming it; `None` when nothing is
    /// queued. An error (including EOF) means the peer is gone.
    fn peek_byte(&mut self) -> io::Result<Option<u8>>;
}

impl PacketStream for TcpStream {
    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        let fd = self.as_raw_fd();
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut fds, 0) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(nix::Error::Sys(Errno::EINTR)) => return Ok(None),
            Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
        }
        let mut buf = [0u8; 1];
        match recv(fd, &mut buf, MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "debugger closed the connection",
            )),
            Ok(_) => Ok(Some(buf[0])),
            Err(nix::Error::Sys(Errno::EAGAIN)) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

/// One inbound event: a decoded packet payload, or the out-of-band
/// interrupt byte.
#[derive(Debug, Eq, PartialEq)]
pub enum InboundPacket {
    Payload(Vec<u8>),
    Interrupt,
}

pub struct GdbConnection<S: PacketStream> {
    stream: S,
    /// Buffered input from the debugger.
    inbuf: VecDeque<u8>,
    /// True when "no-ack mode" is enabled, in which neither side sends
    /// `+`/`-` after the handshake.
    no_ack: bool,
    /// Interrupt observed while we were doing something else; delivered on
    /// the next poll or read.
    pending_interrupt: bool,
}

impl<S: PacketStream> GdbConnection<S> {
    pub fn new(stream: S) -> GdbConnection<S> {
        GdbConnection {
            stream,
            inbuf: VecDeque::new(),
            no_ack: false,
            pending_interrupt: false,
        }
    }

    /// Called after the `OK` reply to qStartNoAckMode has gone out (and
    /// been acked).
    pub fn start_no_ack_mode(&mut self) {
        log!(LogDebug, "entering no-ack mode");
        self.no_ack = true;
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.inbuf.pop_front() {
            return Ok(Some(b));
        }
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        self.inbuf.extend(&chunk[1..n]);
        Ok(Some(chunk[0]))
    }

    /// Blocking read of the next inbound event. `None` means the debugger
    /// disconnected cleanly.
    pub fn read_packet(&mut self) -> io::Result<Option<InboundPacket>> {
        if self.pending_interrupt {
            self.pending_interrupt = false;
            return Ok(Some(InboundPacket::Interrupt));
        }
        let mut bad_checksums = 0u32;
        loop {
            let b = match self.read_byte()? {
                None => return Ok(None),
                Some(b) => b,
            };
            match b {
                b'$' => match self.read_packet_body()? {
                    Some(payload) => return Ok(Some(InboundPacket::Payload(payload))),
                    None => {
                        bad_checksums += 1;
                        if bad_checksums >= MAX_CHECKSUM_RETRIES {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "too many checksum failures",
                            ));
                        }
                        // wait for the retransmit
                    }
                },
                INTERRUPT_BYTE => return Ok(Some(InboundPacket::Interrupt)),
                b'+' => {}
                b'-' => log!(LogWarn, "nack with no packet outstanding"),
                _ => log!(LogDebug, "discarding junk byte {:#04x}", b),
            }
        }
    }

    /// Body after the `$`. `Ok(None)` means the checksum failed and a `-`
    /// was sent.
    fn read_packet_body(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut raw = Vec::new();
        let mut sum = 0u8;
        loop {
            let b = match self.read_byte()? {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-packet",
                    ))
                }
                Some(b) => b,
            };
            if b == b'#' {
                break;
            }
            sum = sum.wrapping_add(b);
            raw.push(b);
            if raw.len() > MAX_PACKET_SIZE * 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "oversized packet",
                ));
            }
        }
        let mut cs = [0u8; 2];
        for slot in cs.iter_mut() {
            *slot = match self.read_byte()? {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-checksum",
                    ))
                }
                Some(b) => b,
            };
        }
        let sent = std::str::from_utf8(&cs)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok());
        if sent != Some(sum) {
            log!(
                LogWarn,
                "checksum mismatch: computed {:02x}, received {}",
                sum,
                String::from_utf8_lossy(&cs)
            );
            self.stream.write_all(b"-")?;
            self.stream.flush()?;
            return Ok(None);
        }
        if !self.no_ack {
            self.stream.write_all(b"+")?;
            self.stream.flush()?;
        }
        log!(LogDebug, "<- ${}#{:02x}", String::from_utf8_lossy(&raw), sum);
        Ok(Some(decode_payload(&raw)))
    }

    /// Frame and send a reply, retransmitting on `-` until acked (or
    /// immediately done in noack mode).
    pub fn send_packet(&mut self, payload: &[u8]) -> io::Result<()> {
        let frame = frame_packet(payload);
        log!(LogDebug, "-> {}", String::from_utf8_lossy(&frame));
        for _attempt in 0..MAX_CHECKSUM_RETRIES {
            self.stream.write_all(&frame)?;
            self.stream.flush()?;
            if self.no_ack {
                return Ok(());
            }
            loop {
                match self.read_byte()? {
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed awaiting ack",
                        ))
                    }
                    Some(b'+') => return Ok(()),
                    Some(b'-') => break, // retransmit
                    Some(INTERRUPT_BYTE) => self.pending_interrupt = true,
                    Some(b) => log!(LogDebug, "ignoring byte {:#04x} while awaiting ack", b),
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "retransmit limit reached",
        ))
    }

    /// Non-blocking: has the debugger sent an interrupt? Consumes the
    /// interrupt byte. A dead connection also reports true so a running
    /// motion aborts promptly.
    pub fn poll_interrupt(&mut self) -> bool {
        if self.pending_interrupt {
            self.pending_interrupt = false;
            return true;
        }
        while let Some(&b) = self.inbuf.front() {
            match b {
                INTERRUPT_BYTE => {
                    self.inbuf.pop_front();
                    return true;
                }
                b'+' => {
                    self.inbuf.pop_front();
                }
                _ => return false,
            }
        }
        match self.stream.peek_byte() {
            Ok(Some(INTERRUPT_BYTE)) => {
                let mut b = [0u8; 1];
                let _ = self.stream.read(&mut b);
                true
            }
            Ok(_) => false,
            Err(_) => true,
        }
    }
}

/// 8-bit sum of the transmitted payload bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Escape the bytes that have frame meaning. Replies are never run-length
/// encoded.
pub fn encode_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        match b {
            b'$' | b'#' | b'}' | b'*' => {
                out.push(b'}');
                out.push(b ^ 0x20);
            }
            _ => out.push(b),
        }
    }
    out
}

/// Undo `}`-escapes and expand run-length sequences.
pub fn decode_payload(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'}' if i + 1 < raw.len() => {
                out.push(raw[i + 1] ^ 0x20);
                i += 2;
            }
            b'*' if i + 1 < raw.len() && !out.is_empty() => {
                let count = raw[i + 1].saturating_sub(29) as usize;
                let prev = *out.last().unwrap();
                out.extend(std::iter::repeat(prev).take(count));
                i += 2;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// `$` escaped-payload `#` checksum-of-escaped-payload.
pub fn frame_packet(payload: &[u8]) -> Vec<u8> {
    let escaped = encode_payload(payload);
    let mut frame = Vec::with_capacity(escaped.len() + 4);
    frame.push(b'$');
    frame.extend_from_slice(&escaped);
    frame.push(b'#');
    frame.extend_from_slice(format!("{:02x}", checksum(&escaped)).as_bytes());
    frame
}

/// A decoded debugger request. Everything a source-level debugger probes
/// that the replay stub does not implement parses to `Unknown`, which the
/// dispatcher answers with the empty packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GdbRequest {
    GetStopReason,
    ReadAllRegisters,
    /// The whole register file, raw little-endian bytes in architectural
    /// order.
    WriteAllRegisters(Vec<u8>),
    ReadRegister(usize),
    /// Raw little-endian bytes, as transmitted.
    WriteRegister { reg: usize, bytes: Vec<u8> },
    ReadMemory { addr: u64, len: usize },
    WriteMemory { addr: u64, bytes: Vec<u8> },
    InsertBreakpoint { ztype: u8, addr: u64, length: u32 },
    RemoveBreakpoint { ztype: u8, addr: u64, length: u32 },
    Resume { dir: RunDirection, step: bool },
    QuerySupported,
    StartNoAckMode,
    QueryAttached,
    QueryCurrentThread,
    QueryThreadInfoFirst,
    QueryThreadInfoNext,
    QuerySymbolsDone,
    SetThread,
    XferFeaturesRead { annex: String, offset: usize, len: usize },
    MustReplyEmpty,
    VContQuery,
    Detach,
    Unknown,
}

impl GdbRequest {
    pub fn parse(payload: &[u8]) -> GdbRequest {
        use GdbRequest::*;
        use RunDirection::*;

        // X carries raw binary after the ':'; handle it before insisting on
        // UTF-8.
        if payload.first() == Some(&b'X') {
            return parse_binary_write(payload).unwrap_or(Unknown);
        }

        let s = match std::str::from_utf8(payload) {
            Ok(s) if !s.is_empty() && s.is_ascii() => s,
            _ => return Unknown,
        };

        match s {
            "?" => return GetStopReason,
            "g" => return ReadAllRegisters,
            "s" => {
                return Resume {
                    dir: RunForward,
                    step: true,
                }
            }
            "c" => {
                return Resume {
                    dir: RunForward,
                    step: false,
                }
            }
            "bs" => {
                return Resume {
                    dir: RunBackward,
                    step: true,
                }
            }
            "bc" => {
                return Resume {
                    dir: RunBackward,
                    step: false,
                }
            }
            "QStartNoAckMode" => return StartNoAckMode,
            "qC" => return QueryCurrentThread,
            "qfThreadInfo" => return QueryThreadInfoFirst,
            "qsThreadInfo" => return QueryThreadInfoNext,
            "qSymbol::" => return QuerySymbolsDone,
            "vMustReplyEmpty" => return MustReplyEmpty,
            "vCont?" => return VContQuery,
            _ => {}
        }

        if s.starts_with("qSupported") {
            return QuerySupported;
        }
        if s.starts_with("qAttached") {
            return QueryAttached;
        }
        if s.starts_with("qXfer:features:read:") {
            return parse_xfer_read(&s["qXfer:features:read:".len()..]).unwrap_or(Unknown);
        }
        if s.starts_with("vCont;") {
            return parse_vcont_actions(&s["vCont;".len()..]).unwrap_or(Unknown);
        }

        let (head, rest) = s.split_at(1);
        match head {
            // step/continue with signal: the signal is meaningless to a
            // replay, resume anyway
            "S" => Resume {
                dir: RunForward,
                step: true,
            },
            "C" => Resume {
                dir: RunForward,
                step: false,
            },
            "H" => SetThread,
            "D" => Detach,
            "G" => match util::decode_hex(rest) {
                Some(bytes) => WriteAllRegisters(bytes),
                None => Unknown,
            },
            "p" => match util::parse_hex_u64(rest) {
                Some(reg) => ReadRegister(reg as usize),
                None => Unknown,
            },
            "P" => parse_register_write(rest).unwrap_or(Unknown),
            "m" => parse_memory_read(rest).unwrap_or(Unknown),
            "M" => parse_memory_write(rest).unwrap_or(Unknown),
            "Z" => parse_breakpoint(rest).map(|(ztype, addr, length)| InsertBreakpoint {
                ztype,
                addr,
                length,
            })
            .unwrap_or(Unknown),
            "z" => parse_breakpoint(rest).map(|(ztype, addr, length)| RemoveBreakpoint {
                ztype,
                addr,
                length,
            })
            .unwrap_or(Unknown),
            _ => Unknown,
        }
    }
}

/// `P<reg>=<hex bytes>`
fn parse_register_write(s: &str) -> Option<GdbRequest> {
    let mut it = s.splitn(2, '=');
    let reg = util::parse_hex_u64(it.next()?)? as usize;
    let bytes = util::decode_hex(it.next()?)?;
    Some(GdbRequest::WriteRegister { reg, bytes })
}

/// `m<addr>,<len>`
fn parse_memory_read(s: &str) -> Option<GdbRequest> {
    let mut it = s.splitn(2, ',');
    let addr = util::parse_hex_u64(it.next()?)?;
    let len = util::parse_hex_u64(it.next()?)? as usize;
    if len > MAX_PACKET_SIZE {
        return None;
    }
    Some(GdbRequest::ReadMemory { addr, len })
}

/// `M<addr>,<len>:<hex bytes>`
fn parse_memory_write(s: &str) -> Option<GdbRequest> {
    let mut it = s.splitn(2, ':');
    let header = it.next()?;
    let bytes = util::decode_hex(it.next()?)?;
    let mut hd = header.splitn(2, ',');
    let addr = util::parse_hex_u64(hd.next()?)?;
    let len = util::parse_hex_u64(hd.next()?)? as usize;
    if len != bytes.len() {
        return None;
    }
    Some(GdbRequest::WriteMemory { addr, bytes })
}

/// `X<addr>,<len>:<binary>` — the codec has already undone the escapes.
fn parse_binary_write(payload: &[u8]) -> Option<GdbRequest> {
    let colon = payload.iter().position(|&b| b == b':')?;
    let header = std::str::from_utf8(&payload[1..colon]).ok()?;
    let bytes = payload[colon + 1..].to_vec();
    let mut hd = header.splitn(2, ',');
    let addr = util::parse_hex_u64(hd.next()?)?;
    let len = util::parse_hex_u64(hd.next()?)? as usize;
    if len != bytes.len() {
        return None;
    }
    Some(GdbRequest::WriteMemory { addr, bytes })
}

/// `Z<type>,<addr>,<kind>` / `z<type>,<addr>,<kind>`
fn parse_breakpoint(s: &str) -> Option<(u8, u64, u32)> {
    let mut it = s.split(',');
    let ztype = it.next()?.parse::<u8>().ok()?;
    let addr = util::parse_hex_u64(it.next()?)?;
    let length = util::parse_hex_u64(it.next()?)? as u32;
    Some((ztype, addr, length))
}

/// `annex:offset,length` after `qXfer:features:read:`
fn parse_xfer_read(s: &str) -> Option<GdbRequest> {
    let mut it = s.splitn(2, ':');
    let annex = it.next()?.to_owned();
    let mut range = it.next()?.splitn(2, ',');
    let offset = util::parse_hex_u64(range.next()?)? as usize;
    let len = util::parse_hex_u64(range.next()?)? as usize;
    Some(GdbRequest::XferFeaturesRead { annex, offset, len })
}

/// First supported action of a `vCont;...` list wins; there is only one
/// hart to resume.
fn parse_vcont_actions(s: &str) -> Option<GdbRequest> {
    use RunDirection::RunForward;
    for action in s.split(';') {
        let op = action.split(':').next().unwrap_or("");
        match op.chars().next() {
            Some('s') | Some('S') => {
                return Some(GdbRequest::Resume {
                    dir: RunForward,
                    step: true,
                })
            }
            Some('c') | Some('C') => {
                return Some(GdbRequest::Resume {
                    dir: RunForward,
                    step: false,
                })
            }
            _ => {}
        }
    }
    None
}

pub fn breakpoint_kind_of_ztype(ztype: u8) -> Option<BreakpointKind> {
    match ztype {
        0 => Some(BreakpointKind::Software),
        1 => Some(BreakpointKind::Hardware),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    /// In-memory transport for codec tests.
    struct ByteChannel {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl ByteChannel {
        fn new(input: &[u8]) -> ByteChannel {
            ByteChannel {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for ByteChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ByteChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl PacketStream for ByteChannel {
        fn peek_byte(&mut self) -> io::Result<Option<u8>> {
            let pos = self.input.position() as usize;
            Ok(self.input.get_ref().get(pos).copied())
        }
    }

    #[test]
    fn reads_valid_packet_and_acks() {
        let mut conn = GdbConnection::new(ByteChannel::new(b"$qSupported#37"));
        let pkt = conn.read_packet().unwrap().unwrap();
        assert_eq!(pkt, InboundPacket::Payload(b"qSupported".to_vec()));
        assert_eq!(conn.stream.output, b"+");
    }

    #[test]
    fn bad_checksum_elicits_nack_then_accepts_retransmit() {
        let mut conn = GdbConnection::new(ByteChannel::new(b"$g#00$g#67"));
        let pkt = conn.read_packet().unwrap().unwrap();
        assert_eq!(pkt, InboundPacket::Payload(b"g".to_vec()));
        assert_eq!(conn.stream.output, b"-+");
    }

    #[test]
    fn repeated_checksum_failure_is_fatal() {
        let bad = b"$g#00".repeat(MAX_CHECKSUM_RETRIES as usize + 1);
        let mut conn = GdbConnection::new(ByteChannel::new(&bad));
        assert!(conn.read_packet().is_err());
    }

    #[test]
    fn interrupt_byte_outside_frame() {
        let mut conn = GdbConnection::new(ByteChannel::new(b"\x03$g#67"));
        assert_eq!(
            conn.read_packet().unwrap().unwrap(),
            InboundPacket::Interrupt
        );
        assert_eq!(
            conn.read_packet().unwrap().unwrap(),
            InboundPacket::Payload(b"g".to_vec())
        );
    }

    #[test]
    fn junk_before_dollar_is_discarded() {
        let mut conn = GdbConnection::new(ByteChannel::new(b"xyz+$g#67"));
        assert_eq!(
            conn.read_packet().unwrap().unwrap(),
            InboundPacket::Payload(b"g".to_vec())
        );
    }

    #[test]
    fn eof_reports_disconnect() {
        let mut conn = GdbConnection::new(ByteChannel::new(b""));
        assert_eq!(conn.read_packet().unwrap(), None);
    }

    #[test]
    fn send_packet_waits_for_ack_and_retransmits_on_nack() {
        let mut conn = GdbConnection::new(ByteChannel::new(b"-+"));
        conn.send_packet(b"OK").unwrap();
        assert_eq!(conn.stream.output, b"$OK#9a$OK#9a");
    }

    #[test]
    fn no_ack_mode_skips_the_wait() {
        let mut conn = GdbConnection::new(ByteChannel::new(b""));
        conn.start_no_ack_mode();
        conn.send_packet(b"OK").unwrap();
        assert_eq!(conn.stream.output, b"$OK#9a");
    }

    #[test]
    fn escape_decoding() {
        assert_eq!(decode_payload(b"a}\x03b"), b"a#b".to_vec());
        assert_eq!(decode_payload(b"}\x04"), b"$".to_vec());
        assert_eq!(decode_payload(b"}]"), b"}".to_vec());
    }

    #[test]
    fn run_length_decoding() {
        // '!' is 33: four additional repeats
        assert_eq!(decode_payload(b"0* "), b"0000".to_vec());
        assert_eq!(decode_payload(b"x*!y"), b"xxxxxy".to_vec());
    }

    #[test]
    fn poll_interrupt_consumes_only_the_interrupt() {
        let mut conn = GdbConnection::new(ByteChannel::new(b"\x03$g#67"));
        assert!(conn.poll_interrupt());
        assert!(!conn.poll_interrupt());
        assert_eq!(
            conn.read_packet().unwrap().unwrap(),
            InboundPacket::Payload(b"g".to_vec())
        );
    }

    #[test]
    fn parse_core_requests() {
        use GdbRequest::*;
        assert_eq!(GdbRequest::parse(b"?"), GetStopReason);
        assert_eq!(GdbRequest::parse(b"g"), ReadAllRegisters);
        assert_eq!(GdbRequest::parse(b"p20"), ReadRegister(0x20));
        assert_eq!(
            GdbRequest::parse(b"m1000,4"),
            ReadMemory {
                addr: 0x1000,
                len: 4
            }
        );
        assert_eq!(
            GdbRequest::parse(b"M1000,4:deadbeef"),
            WriteMemory {
                addr: 0x1000,
                bytes: vec![0xde, 0xad, 0xbe, 0xef]
            }
        );
        assert_eq!(
            GdbRequest::parse(b"X1000,2:ab"),
            WriteMemory {
                addr: 0x1000,
                bytes: b"ab".to_vec()
            }
        );
        assert_eq!(
            GdbRequest::parse(b"Z0,80004628,4"),
            InsertBreakpoint {
                ztype: 0,
                addr: 0x8000_4628,
                length: 4
            }
        );
        assert_eq!(
            GdbRequest::parse(b"P5=3412000000000000"),
            WriteRegister {
                reg: 5,
                bytes: vec![0x34, 0x12, 0, 0, 0, 0, 0, 0]
            }
        );
    }

    #[test]
    fn parse_resume_requests() {
        use GdbRequest::*;
        use RunDirection::*;
        for (payload, dir, step) in &[
            (&b"s"[..], RunForward, true),
            (b"c", RunForward, false),
            (b"S05", RunForward, true),
            (b"C05", RunForward, false),
            (b"bs", RunBackward, true),
            (b"bc", RunBackward, false),
            (b"vCont;s:1", RunForward, true),
            (b"vCont;c", RunForward, false),
        ] {
            assert_eq!(
                GdbRequest::parse(payload),
                Resume {
                    dir: *dir,
                    step: *step
                },
                "payload {:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn parse_queries() {
        use GdbRequest::*;
        assert_eq!(GdbRequest::parse(b"qSupported:multiprocess+"), QuerySupported);
        assert_eq!(GdbRequest::parse(b"QStartNoAckMode"), StartNoAckMode);
        assert_eq!(GdbRequest::parse(b"qAttached"), QueryAttached);
        assert_eq!(GdbRequest::parse(b"qC"), QueryCurrentThread);
        assert_eq!(GdbRequest::parse(b"Hg0"), SetThread);
        assert_eq!(GdbRequest::parse(b"vMustReplyEmpty"), MustReplyEmpty);
        assert_eq!(
            GdbRequest::parse(b"qXfer:features:read:target.xml:0,ffb"),
            XferFeaturesRead {
                annex: "target.xml".to_owned(),
                offset: 0,
                len: 0xffb
            }
        );
        assert_eq!(GdbRequest::parse(b"qRcmd,7265736574"), Unknown);
        assert_eq!(GdbRequest::parse(b""), Unknown);
        assert_eq!(
            GdbRequest::parse(b"Z2,1000,4"),
            InsertBreakpoint {
                ztype: 2,
                addr: 0x1000,
                length: 4
            }
        );
    }

    proptest! {
        /// frame ∘ decode is the identity on payloads: whatever bytes the
        /// dispatcher hands the codec come back out of a decode of the
        /// framed form.
        #[test]
        fn framing_round_trips(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let frame = frame_packet(&payload);
            prop_assert_eq!(frame[0], b'$');
            let hash = frame.len() - 3;
            prop_assert_eq!(frame[hash], b'#');
            let escaped = &frame[1..hash];
            let sent = u8::from_str_radix(
                std::str::from_utf8(&frame[hash + 1..]).unwrap(), 16).unwrap();
            prop_assert_eq!(sent, checksum(escaped));
            prop_assert_eq!(decode_payload(escaped), payload);
        }

        /// Any corrupted checksum digit pair is rejected with a nack.
        #[test]
        fn corrupted_checksum_rejected(bad in 0u16..256) {
            let good = checksum(b"g");
            prop_assume!(bad as u8 != good);
            let wire = format!("$g#{:02x}", bad);
            let mut conn = GdbConnection::new(ByteChannel::new(wire.as_bytes()));
            // lone corrupt packet: the read keeps waiting for a retransmit
            // that never comes, so EOF is hit after the nack went out
            let _ = conn.read_packet();
            prop_assert_eq!(&conn.stream.output[..1], b"-");
        }
    }
}
