//! Tests for platform-agnostic types

use kestrel_core::types::{Address, Architecture, RegisterId, Registers, X86_64Register};
use kestrel_core::{ProcessId, ThreadId};

#[test]
fn test_process_id_round_trip()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
    let value: u32 = pid.into();
    assert_eq!(value, 12345);
    assert_eq!(pid.to_string(), "12345");
}

#[test]
fn test_thread_id_display()
{
    let tid = ThreadId::from(77_u64);
    assert_eq!(tid.raw(), 77);
    assert_eq!(format!("{tid}"), "77");
}

#[test]
fn test_address_arithmetic()
{
    let address = Address::from(0x1000);
    assert_eq!(address + 0x10, Address::from(0x1010));
    assert_eq!(address - 1, Address::from(0xfff));
    assert_eq!(Address::ZERO.checked_sub(1), None);
    assert_eq!(Address::from(u64::MAX).checked_add(1), None);
    assert_eq!(address.to_string(), "0x0000000000001000");
}

#[test]
fn test_registers_new()
{
    let regs = Registers::new();
    assert_eq!(regs.pc, Address::ZERO);
    assert_eq!(regs.sp, Address::ZERO);
    assert_eq!(regs.fp, Address::ZERO);
    assert!(regs.general.is_empty());
    assert_eq!(regs.status, 0);
    assert_eq!(regs, Registers::default());
}

#[test]
fn test_registers_reject_foreign_architecture()
{
    let mut regs = Registers::for_arch(Architecture::Arm64);
    let rax = RegisterId::X86_64(X86_64Register::Rax);
    assert_eq!(regs.get(rax), None);
    assert_eq!(regs.set(rax, 1), None);
    assert_eq!(regs.set(RegisterId::Pc, 0x4000), Some(()));
    assert_eq!(regs.pc, Address::from(0x4000));
}

#[test]
fn test_architecture_breakpoints()
{
    assert_eq!(Architecture::X86_64.breakpoint_instruction(), &[0xCC]);
    assert_eq!(Architecture::X86_64.trap_rewind(), 1);
    assert_eq!(Architecture::Arm64.breakpoint_size(), 4);
    assert_eq!(Architecture::Arm64.trap_rewind(), 0);
    assert_eq!(Architecture::from_machine(0xAA64), Architecture::Arm64);
    assert_eq!(Architecture::from_machine(0x1234).to_string(), "unknown");
}
