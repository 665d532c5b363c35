//! CPU register types and access.

use super::{Address, Architecture};

/// Identifier for a specific CPU register
///
/// Common registers (PC, SP, FP, Status) exist on every architecture;
/// architecture-specific registers go through the `Arm64` and `X86_64` variants.
///
/// ## Example
///
/// ```rust
/// use kestrel_core::types::{Arm64Register, RegisterId, X86_64Register};
///
/// let pc = RegisterId::Pc;
/// let x0 = RegisterId::Arm64(Arm64Register::X(0));
/// let rax = RegisterId::X86_64(X86_64Register::Rax);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId
{
    /// Program Counter (RIP on x86-64)
    Pc,
    /// Stack Pointer (RSP on x86-64)
    Sp,
    /// Frame Pointer (X29 on ARM64, RBP on x86-64)
    Fp,
    /// Status/flags register (PSTATE on ARM64, RFLAGS on x86-64)
    Status,
    /// ARM64-specific register
    Arm64(Arm64Register),
    /// x86-64-specific register
    X86_64(X86_64Register),
}

/// ARM64 general-purpose register identifier (X0-X30)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arm64Register
{
    /// General-purpose register X0-X30
    X(u8),
}

/// x86-64 register identifier
///
/// Besides the sixteen general-purpose registers this covers the slots a
/// ptrace or `CONTEXT` snapshot carries, so a save/restore cycle through
/// [`Registers`] is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum X86_64Register
{
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    /// Syscall number at kernel entry (Linux only)
    OrigRax,
    Cs,
    Ss,
    Ds,
    Es,
    Fs,
    Gs,
    FsBase,
    GsBase,
}

impl X86_64Register
{
    /// Number of slots in `Registers::general` for x86-64
    pub const SLOTS: usize = 23;

    /// Index of this register in `Registers::general`
    pub const fn index(self) -> usize
    {
        match self {
            X86_64Register::Rax => 0,
            X86_64Register::Rbx => 1,
            X86_64Register::Rcx => 2,
            X86_64Register::Rdx => 3,
            X86_64Register::Rsi => 4,
            X86_64Register::Rdi => 5,
            X86_64Register::R8 => 6,
            X86_64Register::R9 => 7,
            X86_64Register::R10 => 8,
            X86_64Register::R11 => 9,
            X86_64Register::R12 => 10,
            X86_64Register::R13 => 11,
            X86_64Register::R14 => 12,
            X86_64Register::R15 => 13,
            X86_64Register::OrigRax => 14,
            X86_64Register::Cs => 15,
            X86_64Register::Ss => 16,
            X86_64Register::Ds => 17,
            X86_64Register::Es => 18,
            X86_64Register::Fs => 19,
            X86_64Register::Gs => 20,
            X86_64Register::FsBase => 21,
            X86_64Register::GsBase => 22,
        }
    }
}

/// Number of general-purpose slots for ARM64 (X0-X30)
pub const ARM64_SLOTS: usize = 31;

/// Platform-agnostic register snapshot of one thread
///
/// `pc`, `sp`, `fp` and `status` are authoritative: platform code writes them
/// back over whatever the matching general slot holds.
///
/// ```rust
/// use kestrel_core::types::{Architecture, RegisterId, Registers, X86_64Register};
///
/// let mut regs = Registers::for_arch(Architecture::X86_64);
/// regs.set(RegisterId::X86_64(X86_64Register::Rax), 0x1234);
/// assert_eq!(regs.get(RegisterId::X86_64(X86_64Register::Rax)), Some(0x1234));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers
{
    /// Program Counter - address of the next instruction to execute
    pub pc: Address,
    /// Stack Pointer
    pub sp: Address,
    /// Frame Pointer
    pub fp: Address,
    /// General-purpose slots, laid out per architecture
    ///
    /// - **ARM64**: X0-X30
    /// - **x86-64**: see [`X86_64Register::index`]
    pub general: Vec<u64>,
    /// Status/flags register
    pub status: u64,
    architecture: Architecture,
}

impl Registers
{
    /// Create an empty register set with an unknown architecture
    pub fn new() -> Self
    {
        Self {
            pc: Address::ZERO,
            sp: Address::ZERO,
            fp: Address::ZERO,
            general: Vec::new(),
            status: 0,
            architecture: Architecture::Unknown("unknown"),
        }
    }

    /// Create a zeroed register set with the general slots sized for `architecture`
    pub fn for_arch(architecture: Architecture) -> Self
    {
        let slots = match architecture {
            Architecture::X86_64 => X86_64Register::SLOTS,
            Architecture::Arm64 => ARM64_SLOTS,
            Architecture::Unknown(_) => 0,
        };
        Self {
            general: vec![0; slots],
            architecture,
            ..Self::new()
        }
    }

    /// Set the CPU architecture for this register set
    pub fn with_arch(mut self, architecture: Architecture) -> Self
    {
        self.architecture = architecture;
        self
    }

    /// CPU architecture of this register set
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Get the value of a register
    ///
    /// Returns `None` if the identifier does not belong to this architecture
    /// or the slot is out of range.
    pub fn get(&self, id: RegisterId) -> Option<u64>
    {
        match id {
            RegisterId::Pc => Some(self.pc.value()),
            RegisterId::Sp => Some(self.sp.value()),
            RegisterId::Fp => Some(self.fp.value()),
            RegisterId::Status => Some(self.status),
            RegisterId::Arm64(Arm64Register::X(idx)) => {
                if self.architecture != Architecture::Arm64 {
                    return None;
                }
                self.general.get(idx as usize).copied()
            }
            RegisterId::X86_64(reg) => {
                if self.architecture != Architecture::X86_64 {
                    return None;
                }
                self.general.get(reg.index()).copied()
            }
        }
    }

    /// Set the value of a register
    ///
    /// Returns `None` under the same conditions as [`Registers::get`].
    pub fn set(&mut self, id: RegisterId, value: u64) -> Option<()>
    {
        match id {
            RegisterId::Pc => self.pc = Address::from(value),
            RegisterId::Sp => self.sp = Address::from(value),
            RegisterId::Fp => self.fp = Address::from(value),
            RegisterId::Status => self.status = value,
            RegisterId::Arm64(Arm64Register::X(idx)) => {
                if self.architecture != Architecture::Arm64 {
                    return None;
                }
                *self.general.get_mut(idx as usize)? = value;
            }
            RegisterId::X86_64(reg) => {
                if self.architecture != Architecture::X86_64 {
                    return None;
                }
                *self.general.get_mut(reg.index())? = value;
            }
        }
        Some(())
    }
}

impl Default for Registers
{
    fn default() -> Self
    {
        Self::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn arch_mismatch_returns_none()
    {
        let mut regs = Registers::for_arch(Architecture::Arm64);
        assert_eq!(regs.get(RegisterId::X86_64(X86_64Register::Rax)), None);
        assert_eq!(regs.set(RegisterId::X86_64(X86_64Register::Rax), 1), None);
        assert_eq!(regs.set(RegisterId::Arm64(Arm64Register::X(30)), 7), Some(()));
        assert_eq!(regs.get(RegisterId::Arm64(Arm64Register::X(30))), Some(7));
        assert_eq!(regs.get(RegisterId::Arm64(Arm64Register::X(31))), None);
    }

    #[test]
    fn x86_slots_are_distinct()
    {
        let all = [
            X86_64Register::Rax,
            X86_64Register::R15,
            X86_64Register::OrigRax,
            X86_64Register::FsBase,
            X86_64Register::GsBase,
        ];
        let mut regs = Registers::for_arch(Architecture::X86_64);
        for (value, reg) in all.iter().enumerate() {
            regs.set(RegisterId::X86_64(*reg), value as u64 + 1);
        }
        for (value, reg) in all.iter().enumerate() {
            assert_eq!(regs.get(RegisterId::X86_64(*reg)), Some(value as u64 + 1));
        }
        assert_eq!(regs.general.len(), X86_64Register::SLOTS);
    }

    #[test]
    fn common_registers_are_fields()
    {
        let mut regs = Registers::new();
        regs.set(RegisterId::Pc, 0x4000).unwrap();
        assert_eq!(regs.pc, Address::from(0x4000));
        assert_eq!(regs.get(RegisterId::Status), Some(0));
    }
}
