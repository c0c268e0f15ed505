//! Hand-assembled instruction stream exercising the full fetch/execute/memory pipeline against
//! the host-communication mailbox, end to end.

use riscv_sim_core::cpu::Cpu;
use riscv_sim_core::memory::{CachedMem, MemoryStorage, UncachedMem};

const TOHOST: u32 = 0x780;

/// `lui rd, upper` where `upper` already has its low 12 bits cleared.
fn lui(rd: u8, upper: u32) -> u32 {
    (upper & 0xFFFF_F000) | ((rd as u32) << 7) | 0b0110111
}

/// `addi rd, rs1, imm12`, `imm12` in `0..0x800` (never needs sign correction against `lui`).
fn addi(rd: u8, rs1: u8, imm12: u32) -> u32 {
    ((imm12 & 0xFFF) << 20) | ((rs1 as u32) << 15) | ((rd as u32) << 7) | 0b0010011
}

fn csrw(csr: u32, rs1: u8) -> u32 {
    (csr << 20) | ((rs1 as u32) << 15) | (0b001 << 12) | 0b1110011
}

/// Loads the packed tohost word `(kind << 16) | data` into `x2` and writes it to the mailbox.
/// `data` must fit in 11 bits so the `addi` half never needs a `lui` sign-bit correction.
fn emit_tohost_message(mem: &mut Vec<u32>, kind: u32, data: u32) {
    let value = (kind << 16) | data;
    mem.push(lui(2, value));
    mem.push(addi(2, 2, value & 0xFFF));
    mem.push(csrw(TOHOST, 2));
}

fn new_cpu() -> Cpu {
    let uncached = UncachedMem::new(MemoryStorage::new(), 1);
    Cpu::new(CachedMem::new(uncached))
}

#[test]
fn test_prints_then_exits_cleanly() {
    let mut cpu = new_cpu();

    let mut program = Vec::new();
    for &byte in b"Hi\n" {
        emit_tohost_message(&mut program, 1, byte as u32); // PrintChar
    }
    emit_tohost_message(&mut program, 0, 0); // ExitCode 0

    let mut pc = 0x200u32;
    for word in program {
        cpu.mem_mut().storage_mut().write(pc, word);
        pc += 4;
    }
    cpu.reset(0x200);

    let mut printed = Vec::new();
    let mut exit_code = None;
    for _ in 0..100_000 {
        cpu.clock().unwrap();
        if let Some(msg) = cpu.take_message() {
            use riscv_sim_core::csr::HostMessageKind::*;
            match msg.kind {
                PrintChar => printed.push(msg.data as u8 as char),
                ExitCode => {
                    exit_code = Some(msg.data);
                    break;
                }
                PrintIntLow | PrintIntHigh => {}
            }
        }
    }

    assert_eq!("Hi\n", printed.into_iter().collect::<String>());
    assert_eq!(Some(0), exit_code);
}
