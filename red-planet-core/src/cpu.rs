//! The clocked fetch/execute/memory pipeline tying every other module together.
//!
//! [`Cpu::clock`] advances the whole machine by exactly one cycle: it bumps the CSR cycle
//! counter, drives at most one instruction through fetch/decode/execute/memory, and finally
//! decrements the cache's wait-cycle counters. At most one instruction is ever in flight; a
//! multi-cycle data access parks the instruction in `waiting` until its response is ready.

use crate::csr::{CsrError, CsrFile, HostMessage};
use crate::execute::{Executed, Executor, OperandValues};
use crate::instruction::{AluOperand, DecodeError, Instruction};
use crate::memory::{Access, CachedMem};
use crate::registers::Registers;
use log::trace;
use thiserror::Error;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CpuError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Csr(#[from] CsrError),
}

struct PendingAccess {
    instr: Instruction,
    executed: Executed,
    access: Access,
}

pub struct Cpu {
    registers: Registers,
    csrs: CsrFile,
    mem: CachedMem,
    waiting: Option<PendingAccess>,
}

impl Cpu {
    pub fn new(mem: CachedMem) -> Self {
        Self {
            registers: Registers::default(),
            csrs: CsrFile::new(),
            mem,
            waiting: None,
        }
    }

    /// Resets the CSR file and sets the program counter to `entry_ip`. General-purpose registers
    /// are left untouched, matching the reference's `Cpu::Reset`, which only resets the CSR file.
    pub fn reset(&mut self, entry_ip: u32) {
        self.csrs.reset();
        self.waiting = None;
        *self.registers.pc_mut() = entry_ip;
    }

    pub fn ip(&self) -> u32 {
        self.registers.pc()
    }

    pub fn cycle(&self) -> u64 {
        self.csrs.cycle()
    }

    pub fn instret(&self) -> u64 {
        self.csrs.instret()
    }

    pub fn mem(&self) -> &CachedMem {
        &self.mem
    }

    pub fn mem_mut(&mut self) -> &mut CachedMem {
        &mut self.mem
    }

    /// Consumes the most recently produced host message, if any.
    pub fn take_message(&mut self) -> Option<HostMessage> {
        self.csrs.take_message()
    }

    /// Advances the simulator by one clock cycle.
    pub fn clock(&mut self) -> Result<(), CpuError> {
        self.csrs.clock();

        if !self.mem.is_busy() {
            match self.waiting.take() {
                Some(pending) => {
                    let loaded = self
                        .mem
                        .response_data(pending.access, self.csrs.cycle())
                        .expect("response must be ready once the cache is no longer busy");
                    self.commit(pending.instr, pending.executed, loaded)?;
                }
                None => {
                    let ip = self.registers.pc();
                    self.mem.request(Access::Fetch { addr: ip });
                    if let Some(word) = self.mem.response_fetch(self.csrs.cycle()) {
                        self.step_from_fetch(word)?;
                    }
                }
            }
        }

        self.mem.clock();
        Ok(())
    }

    fn step_from_fetch(&mut self, word: u32) -> Result<(), CpuError> {
        let ip = self.registers.pc();
        let instr = Instruction::decode(word)?;
        let operands = self.read_operands(instr)?;
        let executed = Executor::execute(instr, ip, operands);

        match memory_access(instr, &executed) {
            Some(access) => {
                self.mem.request(access);
                match self.mem.response_data(access, self.csrs.cycle()) {
                    Some(loaded) => self.commit(instr, executed, loaded)?,
                    None => {
                        self.waiting = Some(PendingAccess {
                            instr,
                            executed,
                            access,
                        })
                    }
                }
            }
            None => self.commit(instr, executed, 0)?,
        }
        Ok(())
    }

    fn read_operands(&self, instr: Instruction) -> Result<OperandValues, CsrError> {
        Ok(match instr {
            Instruction::Alu { src1, src2, .. } => OperandValues {
                src1: self.registers.x(src1),
                src2: match src2 {
                    AluOperand::Reg(r) => self.registers.x(r),
                    AluOperand::Imm(_) => 0,
                },
                csr: 0,
            },
            Instruction::Ld { base, .. } => OperandValues {
                src1: self.registers.x(base),
                ..Default::default()
            },
            Instruction::St { src, base, .. } => OperandValues {
                src1: self.registers.x(base),
                src2: self.registers.x(src),
                csr: 0,
            },
            Instruction::Csrw { src, .. } => OperandValues {
                src1: self.registers.x(src),
                ..Default::default()
            },
            Instruction::Csrr { csr, .. } => OperandValues {
                csr: self.csrs.read(csr)?,
                ..Default::default()
            },
            Instruction::J { .. } => OperandValues::default(),
            Instruction::Br { src1, src2, .. } => OperandValues {
                src1: self.registers.x(src1),
                src2: self.registers.x(src2),
                csr: 0,
            },
            Instruction::Jr { base, .. } => OperandValues {
                src1: self.registers.x(base),
                ..Default::default()
            },
            Instruction::Auipc { .. } => OperandValues::default(),
        })
    }

    fn commit(&mut self, instr: Instruction, executed: Executed, loaded: u32) -> Result<(), CpuError> {
        let write_value = match instr {
            Instruction::Ld { .. } => loaded,
            _ => executed.data,
        };
        if let Some(dest) = executed.dest {
            self.registers.set_x(dest, write_value);
        }
        if let Instruction::Csrw { csr, .. } = instr {
            self.csrs.write(csr, write_value)?;
        }
        self.csrs.instruction_executed();
        trace!("retired: next ip {:#010x}", executed.next_ip);
        *self.registers.pc_mut() = executed.next_ip;
        Ok(())
    }
}

fn memory_access(instr: Instruction, executed: &Executed) -> Option<Access> {
    match instr {
        Instruction::Ld { .. } => Some(Access::Load {
            addr: executed.mem_addr.unwrap(),
        }),
        Instruction::St { .. } => Some(Access::Store {
            addr: executed.mem_addr.unwrap(),
            data: executed.data,
        }),
        _ => None,
    }
}
