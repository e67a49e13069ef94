//! Readers for the supported trace file formats.
//!
//! Each reader turns one simulator's log into the shared raw entry shape
//! (hex strings, one entry per retired instruction), which is then linked
//! into the normalized `TraceEvent` sequence: PCs are chained so that
//! `pc_after` of an event is the `pc_before` of its successor, register
//! names are resolved to architectural indices, and memory values are
//! decomposed into per-address bytes in memory (little-endian) order.
//!
//! The raw entries are kept around so a parsed trace can be written back
//! out as the compact JSON interchange format (`--dump-json`), which loads
//! much faster than re-parsing a large simulator log.

use crate::log::LogLevel::{LogDebug, LogWarn};
use crate::trace::trace_event::{MemWrite, RegWrite, TraceEvent};
use crate::util;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TraceFormat {
    Spike,
    SifiveRtl,
    Json,
}

impl FromStr for TraceFormat {
    type Err = TraceParseError;

    fn from_str(s: &str) -> Result<TraceFormat, TraceParseError> {
        match s {
            "spike" => Ok(TraceFormat::Spike),
            "sifive-rtl" => Ok(TraceFormat::SifiveRtl),
            "json" => Ok(TraceFormat::Json),
            _ => Err(TraceParseError::new(format!(
                "unknown trace format `{}' (expected spike, sifive-rtl or json)",
                s
            ))),
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TraceFormat::Spike => write!(f, "spike"),
            TraceFormat::SifiveRtl => write!(f, "sifive-rtl"),
            TraceFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug)]
pub struct TraceParseError {
    pub line: Option<usize>,
    pub message: String,
}

impl TraceParseError {
    fn new(message: String) -> TraceParseError {
        TraceParseError {
            line: None,
            message,
        }
    }

    fn at_line(line: usize, message: String) -> TraceParseError {
        TraceParseError {
            line: Some(line),
            message,
        }
    }
}

impl fmt::Display for TraceParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for TraceParseError {}

impl From<io::Error> for TraceParseError {
    fn from(e: io::Error) -> TraceParseError {
        TraceParseError::new(e.to_string())
    }
}

/// One retired instruction as the interchange format carries it: all
/// numbers are hex strings without an `0x` prefix. `rw` pairs a register
/// name with its new value; `mw` pairs an address with the stored value
/// (digit count giving the store width); `mr` is a bare address.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RawEntry {
    pc: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    ins: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    asm: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rw: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mw: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mr: Vec<String>,
}

/// A fully parsed trace: the normalized event sequence plus the raw
/// entries it was linked from.
#[derive(Debug)]
pub struct Trace {
    raw: Vec<RawEntry>,
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Write the raw entries as compact JSON, one entry per line for easy
    /// viewing, so the file can be reloaded with `-f json`.
    pub fn dump_compact_json(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        let mut prefix = "[";
        for entry in &self.raw {
            writeln!(out, "{}{}", prefix, serde_json::to_string(entry)?)?;
            prefix = ",";
        }
        writeln!(out, "]")?;
        Ok(())
    }
}

pub fn read_trace(path: &Path, format: TraceFormat) -> Result<Trace, TraceParseError> {
    let raw = match format {
        TraceFormat::Spike => read_spike(path)?,
        TraceFormat::SifiveRtl => read_sifive_rtl(path)?,
        TraceFormat::Json => read_json(path)?,
    };
    if raw.is_empty() {
        return Err(TraceParseError::new(
            "trace contains no events".to_owned(),
        ));
    }
    let events = link_events(&raw)?;
    Ok(Trace { raw, events })
}

/// Strip `0x` and leading zeros: `0x0000ab12` -> `ab12`.
fn hex_fmt(s: &str, line: usize) -> Result<String, TraceParseError> {
    let digits = s.trim_start_matches("0x");
    match util::parse_hex_u64(digits) {
        Some(v) => Ok(format!("{:x}", v)),
        None => Err(TraceParseError::at_line(
            line,
            format!("bad hex number `{}'", s),
        )),
    }
}

/// Strip `0x` only; the digit count is meaningful (instruction encodings,
/// store widths).
fn hex_fmt_sized(s: &str) -> String {
    s.trim_start_matches("0x").to_owned()
}

/// Collapse whitespace runs in a disassembly string.
fn disasm_fmt(s: &str) -> String {
    lazy_static! {
        static ref WS: Regex = Regex::new(r"\s+").unwrap();
    }
    WS.replace_all(s, " ").into_owned()
}

fn read_lines(path: &Path) -> Result<Vec<String>, TraceParseError> {
    let f = File::open(path)
        .map_err(|e| TraceParseError::new(format!("cannot open {:?}: {}", path, e)))?;
    let mut lines = Vec::new();
    for line in BufReader::new(f).lines() {
        lines.push(line?);
    }
    Ok(lines)
}

/// spike commit log. Disassembly lines
/// `core   0: 0xPC (0xINSN) mnemonic ...` are paired with the commit line
/// that follows, `core   0: 3 0xPC (0xINSN) [xN 0xVAL]... [mem 0xADDR [0xVAL]]...`.
fn read_spike(path: &Path) -> Result<Vec<RawEntry>, TraceParseError> {
    lazy_static! {
        static ref DISASM: Regex =
            Regex::new(r"^core +\d+: (0x[0-9a-fA-F]+) \((0x[0-9a-fA-F]+)\) (.*)$").unwrap();
        static ref COMMIT: Regex =
            Regex::new(r"^core +\d+: \d+ (0x[0-9a-fA-F]+) \((0x[0-9a-fA-F]+)\)(.*)$").unwrap();
        static ref CORE_LINE: Regex = Regex::new(r"^core +\d+:").unwrap();
        static ref MEM_WRITE: Regex =
            Regex::new(r"^mem (0x[0-9a-fA-F]+) (0x[0-9a-fA-F]+)").unwrap();
        static ref MEM_READ: Regex = Regex::new(r"^mem (0x[0-9a-fA-F]+)").unwrap();
        static ref REG_WRITE: Regex =
            Regex::new(r"^([a-z][a-z_0-9]+) +(0x[0-9a-fA-F]+)").unwrap();
    }

    let mut trace = Vec::new();
    let mut last_pc = String::new();
    let mut last_disasm = String::new();
    for (idx, raw_line) in read_lines(path)?.iter().enumerate() {
        let line_num = idx + 1;
        let line = raw_line.trim();

        if let Some(caps) = DISASM.captures(line) {
            last_pc = hex_fmt(&caps[1], line_num)?;
            last_disasm = caps[3].to_owned();
            continue;
        }

        if let Some(caps) = COMMIT.captures(line) {
            let mut entry = RawEntry::default();
            entry.pc = hex_fmt(&caps[1], line_num)?;
            entry.ins = hex_fmt_sized(&caps[2]);
            if last_pc == entry.pc {
                entry.asm = disasm_fmt(&last_disasm);
            } else {
                log!(
                    LogWarn,
                    "commit without preceding disassembly at line {}",
                    line_num
                );
            }
            last_pc.clear();

            // Accesses trail the commit; patterns ordered most to least
            // specific.
            let mut rest = caps.get(3).unwrap().as_str();
            loop {
                rest = rest.trim_start();
                if rest.is_empty() {
                    break;
                }
                if let Some(c) = MEM_WRITE.captures(rest) {
                    entry
                        .mw
                        .push((hex_fmt(&c[1], line_num)?, hex_fmt_sized(&c[2])));
                    rest = &rest[c.get(0).unwrap().end()..];
                } else if let Some(c) = MEM_READ.captures(rest) {
                    entry.mr.push(hex_fmt_sized(&c[1]));
                    rest = &rest[c.get(0).unwrap().end()..];
                } else if let Some(c) = REG_WRITE.captures(rest) {
                    entry.rw.push((c[1].to_owned(), hex_fmt(&c[2], line_num)?));
                    rest = &rest[c.get(0).unwrap().end()..];
                } else {
                    return Err(TraceParseError::at_line(
                        line_num,
                        format!("unrecognized access suffix `{}'", rest),
                    ));
                }
            }
            trace.push(entry);
        } else if CORE_LINE.is_match(line) {
            log!(LogDebug, "unexpected core line skipped: {}", line);
        } else {
            log!(LogDebug, "skipped: {}", line);
        }
    }
    Ok(trace)
}

/// SiFive RTL commit log, one line per retirement:
/// `SxCy: TIME [1] pc=[PC] W[rN=VAL][e] R[..] R[..] inst=[INSN] disasm`.
/// Only the `W[..]` register write carries state; the format records no
/// memory traffic.
fn read_sifive_rtl(path: &Path) -> Result<Vec<RawEntry>, TraceParseError> {
    lazy_static! {
        static ref COMMIT: Regex =
            Regex::new(r"^S\d+C\d+: +\d+ \[\d+\] +pc=\[([0-9a-fA-F]+)\] +(.*)$").unwrap();
        static ref SIFIVE_LINE: Regex = Regex::new(r"^S\d+C\d+:").unwrap();
        static ref REG_WRITE: Regex =
            Regex::new(r"^W\[([a-z][ _0-9a-zA-Z]*)=([0-9a-fA-F]+)\]").unwrap();
        static ref INST: Regex = Regex::new(r" inst=\[([0-9a-fA-F]+)\] (.*)$").unwrap();
        static ref REG_PREFIX: Regex = Regex::new(r"^r *").unwrap();
    }

    let mut trace = Vec::new();
    for (idx, raw_line) in read_lines(path)?.iter().enumerate() {
        let line_num = idx + 1;
        let line = raw_line.trim();

        if let Some(caps) = COMMIT.captures(line) {
            let mut entry = RawEntry::default();
            entry.pc = hex_fmt(&caps[1], line_num)?;
            let rest = caps.get(2).unwrap().as_str();

            if let Some(c) = INST.captures(rest) {
                entry.ins = hex_fmt_sized(&c[1]);
                entry.asm = disasm_fmt(&c[2]);
            }
            // The encoding field keeps its full width for compressed
            // instructions; the disassembly reports them as c.*. Narrow the
            // encoding so its size is real, as in the other formats.
            if entry.asm.starts_with("c.") && entry.ins.starts_with("0000") {
                entry.ins = entry.ins[4..].to_owned();
            }

            let accesses = rest.trim_start();
            if !accesses.is_empty() {
                match REG_WRITE.captures(accesses) {
                    Some(c) => {
                        let reg = REG_PREFIX.replace(&c[1], "x").into_owned();
                        entry
                            .rw
                            .push((reg, hex_fmt(&format!("0x{}", &c[2]), line_num)?));
                    }
                    None => {
                        return Err(TraceParseError::at_line(
                            line_num,
                            format!("no register write field in `{}'", accesses),
                        ));
                    }
                }
            }
            trace.push(entry);
        } else if SIFIVE_LINE.is_match(line) {
            log!(LogWarn, "unexpected format at line {}: {}", line_num, line);
        } else {
            log!(LogDebug, "skipped: {}", line);
        }
    }
    Ok(trace)
}

fn read_json(path: &Path) -> Result<Vec<RawEntry>, TraceParseError> {
    let f = File::open(path)
        .map_err(|e| TraceParseError::new(format!("cannot open {:?}: {}", path, e)))?;
    serde_json::from_reader(BufReader::new(f))
        .map_err(|e| TraceParseError::at_line(e.line(), e.to_string()))
}

/// Resolve hex strings and register names, and chain the PCs:
/// `pc_after` of entry `i` is the PC of entry `i + 1`; for the last entry it
/// is derived from the instruction encoding width.
fn link_events(raw: &[RawEntry]) -> Result<Vec<TraceEvent>, TraceParseError> {
    let mut pcs = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let pc = util::parse_hex_u64(&entry.pc).ok_or_else(|| {
            TraceParseError::new(format!("event {}: bad pc `{}'", i, entry.pc))
        })?;
        pcs.push(pc);
    }

    let mut events = Vec::with_capacity(raw.len());
    for (i, entry) in raw.iter().enumerate() {
        let pc_after = match pcs.get(i + 1) {
            Some(&pc) => pc,
            None => pcs[i] + (entry.ins.len() / 2) as u64,
        };
        let mut ev = TraceEvent::new(pcs[i], pc_after);

        for (name, value) in &entry.rw {
            match parse_reg_name(name) {
                Some(reg) => {
                    let value = util::parse_hex_u64(value).ok_or_else(|| {
                        TraceParseError::new(format!(
                            "event {}: bad register value `{}'",
                            i, value
                        ))
                    })?;
                    ev.reg_writes.push(RegWrite { reg, value });
                }
                // CSR and float writes carry no state gdb's integer file
                // shows; same policy as the original converters.
                None => log!(LogDebug, "ignoring update to register {}", name),
            }
        }

        for (addr, value) in &entry.mw {
            let addr = util::parse_hex_u64(addr).ok_or_else(|| {
                TraceParseError::new(format!("event {}: bad store address `{}'", i, addr))
            })?;
            ev.mem_writes.push(MemWrite {
                addr,
                data: store_value_bytes(value).ok_or_else(|| {
                    TraceParseError::new(format!("event {}: bad store value `{}'", i, value))
                })?,
            });
        }

        // `mr` records are address-only in every supported format; with no
        // data there is nothing to seed the overlay with.

        if !entry.asm.is_empty() {
            ev.disasm = Some(entry.asm.clone());
        }
        events.push(ev);
    }
    Ok(events)
}

/// `x17` -> 17. Anything else is not an integer register.
fn parse_reg_name(name: &str) -> Option<usize> {
    if !name.starts_with('x') {
        return None;
    }
    name[1..].parse::<usize>().ok()
}

/// A store value like `00000002` becomes its little-endian byte image
/// `[02, 00, 00, 00]`; the digit count gives the store width.
fn store_value_bytes(value: &str) -> Option<Vec<u8>> {
    let padded;
    let digits = if value.len() % 2 == 1 {
        padded = format!("0{}", value);
        &padded
    } else {
        value
    };
    let mut bytes = util::decode_hex(digits)?;
    bytes.reverse();
    Some(bytes)
}
