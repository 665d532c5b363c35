//! CPU architecture descriptor.

use std::fmt;

/// Machine type of an x86-64 image (`IMAGE_FILE_MACHINE_AMD64`)
pub const MACHINE_AMD64: u16 = 0x8664;
/// Machine type of an ARM64 image (`IMAGE_FILE_MACHINE_ARM64`)
pub const MACHINE_ARM64: u16 = 0xAA64;
/// Machine type of a 32-bit x86 image (`IMAGE_FILE_MACHINE_I386`)
pub const MACHINE_I386: u16 = 0x014C;

const X86_BREAKPOINT: [u8; 1] = [0xCC];
// `brk #0`, little-endian
const ARM64_BREAKPOINT: [u8; 4] = [0x00, 0x00, 0x20, 0xD4];

/// Trap flag (TF) in RFLAGS
pub const X86_TRAP_FLAG: u64 = 0x100;
/// Software-step bit (SS) in PSTATE
pub const ARM64_SS_FLAG: u64 = 1 << 21;

/// CPU architecture of the inferior
///
/// The descriptor decides the size of the software breakpoint instruction
/// (used when rewinding the PC after a trap) and how [`Registers`](super::Registers)
/// lays out its general-purpose slots.
///
/// ## Example
///
/// ```rust
/// use kestrel_core::types::Architecture;
///
/// let arch = Architecture::from_machine(0x8664);
/// assert_eq!(arch, Architecture::X86_64);
/// assert_eq!(arch.breakpoint_size(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// Any other architecture; the name is informational only
    Unknown(&'static str),
}

impl Architecture
{
    /// Get the architecture of the currently running debugger binary
    ///
    /// Both native substrates only debug inferiors of the host's own
    /// architecture, so this is what launch and attach record.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Map a PE/COFF machine type to an architecture
    #[must_use]
    pub const fn from_machine(machine: u16) -> Self
    {
        match machine {
            MACHINE_AMD64 => Architecture::X86_64,
            MACHINE_ARM64 => Architecture::Arm64,
            MACHINE_I386 => Architecture::Unknown("x86"),
            _ => Architecture::Unknown("unknown"),
        }
    }

    /// Bytes of the software breakpoint instruction (empty if unknown)
    #[must_use]
    pub const fn breakpoint_instruction(self) -> &'static [u8]
    {
        match self {
            Architecture::X86_64 => &X86_BREAKPOINT,
            Architecture::Arm64 => &ARM64_BREAKPOINT,
            Architecture::Unknown(_) => &[],
        }
    }

    /// Size in bytes of the software breakpoint instruction
    #[must_use]
    pub const fn breakpoint_size(self) -> u64
    {
        self.breakpoint_instruction().len() as u64
    }

    /// How far the PC has moved past a breakpoint when its trap is reported
    ///
    /// `int3` is a trap: the PC already points past the one-byte instruction.
    /// `brk` is a fault: the PC still points at the breakpoint.
    #[must_use]
    pub const fn trap_rewind(self) -> u64
    {
        match self {
            Architecture::X86_64 => self.breakpoint_size(),
            Architecture::Arm64 | Architecture::Unknown(_) => 0,
        }
    }

    /// Status-register bit that makes the CPU trap after one instruction
    #[must_use]
    pub const fn single_step_flag(self) -> u64
    {
        match self {
            Architecture::X86_64 => X86_TRAP_FLAG,
            Architecture::Arm64 => ARM64_SS_FLAG,
            Architecture::Unknown(_) => 0,
        }
    }

    /// Pointer width in bytes
    #[must_use]
    pub const fn pointer_size(self) -> usize
    {
        match self {
            Architecture::X86_64 | Architecture::Arm64 => 8,
            Architecture::Unknown(_) => std::mem::size_of::<usize>(),
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
