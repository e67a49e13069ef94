//! Target CPU descriptors.
//!
//! The replay core is generic over the debugged CPU: everything the protocol
//! layer needs to know is carried by a `CpuArch` capability struct passed in
//! at session construction. Adding a target means adding another static
//! descriptor; no code in the state machine or the dispatcher changes.

/// Capability set for one target CPU.
pub struct CpuArch {
    /// gdb architecture name, e.g. `riscv:rv64`.
    pub name: &'static str,
    /// Number of registers in the `g` packet, PC included.
    pub register_count: usize,
    /// Width of every register in bytes.
    pub register_size: usize,
    /// Architectural index of the PC register.
    pub pc_register: usize,
    /// Registers with a fixed architectural value, pre-seeded at session
    /// start (RISC-V `x0` reads as zero without the trace ever writing it).
    pub hardwired: &'static [(usize, u64)],
    /// Target description served through `qXfer:features:read`, if any.
    pub target_description_xml: Option<&'static str>,
}

impl CpuArch {
    pub fn is_valid_register(&self, regno: usize) -> bool {
        regno < self.register_count
    }

    /// All-ones mask for the register width.
    pub fn value_mask(&self) -> u64 {
        if self.register_size >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.register_size * 8)) - 1
        }
    }
}

pub static RISCV64: CpuArch = CpuArch {
    name: "riscv:rv64",
    register_count: 33,
    register_size: 8,
    pc_register: 32,
    hardwired: &[(0, 0)],
    target_description_xml: Some(RISCV64_TARGET_XML),
};

/// Register order must match gdb's built-in riscv:rv64 numbering: x0..x31
/// then pc, 64 bits each.
static RISCV64_TARGET_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
  <architecture>riscv:rv64</architecture>
  <feature name="org.gnu.gdb.riscv.cpu">
    <reg name="zero" bitsize="64" type="int" regnum="0"/>
    <reg name="ra" bitsize="64" type="code_ptr"/>
    <reg name="sp" bitsize="64" type="data_ptr"/>
    <reg name="gp" bitsize="64" type="data_ptr"/>
    <reg name="tp" bitsize="64" type="data_ptr"/>
    <reg name="t0" bitsize="64" type="int"/>
    <reg name="t1" bitsize="64" type="int"/>
    <reg name="t2" bitsize="64" type="int"/>
    <reg name="fp" bitsize="64" type="data_ptr"/>
    <reg name="s1" bitsize="64" type="int"/>
    <reg name="a0" bitsize="64" type="int"/>
    <reg name="a1" bitsize="64" type="int"/>
    <reg name="a2" bitsize="64" type="int"/>
    <reg name="a3" bitsize="64" type="int"/>
    <reg name="a4" bitsize="64" type="int"/>
    <reg name="a5" bitsize="64" type="int"/>
    <reg name="a6" bitsize="64" type="int"/>
    <reg name="a7" bitsize="64" type="int"/>
    <reg name="s2" bitsize="64" type="int"/>
    <reg name="s3" bitsize="64" type="int"/>
    <reg name="s4" bitsize="64" type="int"/>
    <reg name="s5" bitsize="64" type="int"/>
    <reg name="s6" bitsize="64" type="int"/>
    <reg name="s7" bitsize="64" type="int"/>
    <reg name="s8" bitsize="64" type="int"/>
    <reg name="s9" bitsize="64" type="int"/>
    <reg name="s10" bitsize="64" type="int"/>
    <reg name="s11" bitsize="64" type="int"/>
    <reg name="t3" bitsize="64" type="int"/>
    <reg name="t4" bitsize="64" type="int"/>
    <reg name="t5" bitsize="64" type="int"/>
    <reg name="t6" bitsize="64" type="int"/>
    <reg name="pc" bitsize="64" type="code_ptr"/>
  </feature>
</target>
"#;
