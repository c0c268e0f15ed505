//! Pure arithmetic/branch/address computation over a decoded [`Instruction`].
//!
//! Each method corresponds to one instruction kind, following the reference's `Execute` dispatch.
//! Unlike the reference, `J` does not fall through into branch evaluation: an unconditional jump
//! always sets `next_ip = ip + offset`, and `Jr` clears the target's low bit per RV32I.

use crate::instruction::{AluOp, AluOperand, BranchCondition, Instruction};
use crate::registers::Specifier;
use log::trace;

/// The result of executing one instruction: what to write back to the register file (if
/// anything), the memory address to access (for `Ld`/`St`), and the next program counter.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Executed {
    pub dest: Option<Specifier>,
    pub data: u32,
    pub mem_addr: Option<u32>,
    pub next_ip: u32,
}

/// Values read by the register file and CSR file for the instruction currently executing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct OperandValues {
    pub src1: u32,
    pub src2: u32,
    pub csr: u32,
}

pub struct Executor;

impl Executor {
    pub fn execute(instr: Instruction, ip: u32, operands: OperandValues) -> Executed {
        let pc4 = ip.wrapping_add(4);
        match instr {
            Instruction::Alu { op, dest, src2, .. } => {
                let second = match src2 {
                    AluOperand::Reg(_) => operands.src2,
                    AluOperand::Imm(imm) => imm as u32,
                };
                let data = alu(op, operands.src1, second);
                trace!("alu {op:?}: {:#x}, {:#x} -> {data:#x}", operands.src1, second);
                Executed {
                    dest: Some(dest),
                    data,
                    mem_addr: None,
                    next_ip: pc4,
                }
            }
            Instruction::Ld { dest, offset, .. } => {
                let addr = operands.src1.wrapping_add_signed(offset);
                Executed {
                    dest: Some(dest),
                    data: 0,
                    mem_addr: Some(addr),
                    next_ip: pc4,
                }
            }
            Instruction::St { offset, .. } => {
                let addr = operands.src1.wrapping_add_signed(offset);
                Executed {
                    dest: None,
                    data: operands.src2,
                    mem_addr: Some(addr),
                    next_ip: pc4,
                }
            }
            Instruction::Csrw { .. } => Executed {
                dest: None,
                data: operands.src1,
                mem_addr: None,
                next_ip: pc4,
            },
            Instruction::Csrr { dest, .. } => Executed {
                dest: Some(dest),
                data: operands.csr,
                mem_addr: None,
                next_ip: pc4,
            },
            Instruction::J { dest, offset } => Executed {
                dest: Some(dest),
                data: pc4,
                mem_addr: None,
                next_ip: ip.wrapping_add_signed(offset),
            },
            Instruction::Br {
                condition, offset, ..
            } => {
                let taken = branch(condition, operands.src1, operands.src2);
                trace!("branch {condition:?} taken={taken}");
                Executed {
                    dest: None,
                    data: 0,
                    mem_addr: None,
                    next_ip: if taken {
                        ip.wrapping_add_signed(offset)
                    } else {
                        pc4
                    },
                }
            }
            Instruction::Jr { dest, offset, .. } => {
                let target = operands.src1.wrapping_add_signed(offset) & !1;
                Executed {
                    dest: Some(dest),
                    data: pc4,
                    mem_addr: None,
                    next_ip: target,
                }
            }
            Instruction::Auipc { dest, offset } => Executed {
                dest: Some(dest),
                data: ip.wrapping_add_signed(offset),
                mem_addr: None,
                next_ip: pc4,
            },
        }
    }
}

fn alu(op: AluOp, first: u32, second: u32) -> u32 {
    match op {
        AluOp::Add => first.wrapping_add(second),
        AluOp::Sub => first.wrapping_sub(second),
        AluOp::And => first & second,
        AluOp::Or => first | second,
        AluOp::Xor => first ^ second,
        AluOp::Slt => u32::from((first as i32) < (second as i32)),
        AluOp::Sltu => u32::from(first < second),
        AluOp::Sll => first.wrapping_shl(second % 32),
        AluOp::Srl => first.wrapping_shr(second % 32),
        AluOp::Sra => ((first as i32).wrapping_shr(second % 32)) as u32,
    }
}

fn branch(condition: BranchCondition, first: u32, second: u32) -> bool {
    match condition {
        BranchCondition::Eq => first == second,
        BranchCondition::Neq => first != second,
        BranchCondition::Lt => (first as i32) < (second as i32),
        BranchCondition::Ltu => first < second,
        BranchCondition::Ge => (first as i32) >= (second as i32),
        BranchCondition::Geu => first >= second,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::AluOperand;

    fn specifier(i: u8) -> Specifier {
        Specifier::from_u5(i)
    }

    #[test]
    fn test_sub() {
        let instr = Instruction::Alu {
            op: AluOp::Sub,
            dest: specifier(12),
            src1: specifier(10),
            src2: AluOperand::Reg(specifier(11)),
        };
        let result = Executor::execute(
            instr,
            0x1000,
            OperandValues {
                src1: 124,
                src2: 24,
                csr: 0,
            },
        );
        assert_eq!(100, result.data);

        let result = Executor::execute(
            instr,
            0x1000,
            OperandValues {
                src1: 10,
                src2: 11,
                csr: 0,
            },
        );
        assert_eq!(0xFFFF_FFFF, result.data);
    }

    #[test]
    fn test_slt_vs_sltu() {
        let slt = Instruction::Alu {
            op: AluOp::Slt,
            dest: specifier(1),
            src1: specifier(2),
            src2: AluOperand::Reg(specifier(3)),
        };
        let operands = OperandValues {
            src1: 0xFFFF_FFFF,
            src2: 1,
            csr: 0,
        };
        assert_eq!(1, Executor::execute(slt, 0, operands).data);

        let sltu = Instruction::Alu {
            op: AluOp::Sltu,
            ..slt
        };
        assert_eq!(0, Executor::execute(sltu, 0, operands).data);
    }

    #[test]
    fn test_sra_sign_extends() {
        let instr = Instruction::Alu {
            op: AluOp::Sra,
            dest: specifier(1),
            src1: specifier(2),
            src2: AluOperand::Imm(4),
        };
        let result = Executor::execute(
            instr,
            0,
            OperandValues {
                src1: 0x8000_0000,
                src2: 0,
                csr: 0,
            },
        );
        assert_eq!(0xF800_0000, result.data);
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        let instr = Instruction::Br {
            condition: BranchCondition::Eq,
            src1: specifier(1),
            src2: specifier(2),
            offset: 0x10,
        };
        let taken = Executor::execute(
            instr,
            0x1000,
            OperandValues {
                src1: 5,
                src2: 5,
                csr: 0,
            },
        );
        assert_eq!(0x1010, taken.next_ip);

        let not_taken = Executor::execute(
            instr,
            0x1000,
            OperandValues {
                src1: 5,
                src2: 6,
                csr: 0,
            },
        );
        assert_eq!(0x1004, not_taken.next_ip);
    }

    #[test]
    fn test_jal_is_unconditional_and_does_not_fall_through_to_branch() {
        let instr = Instruction::J {
            dest: specifier(1),
            offset: 0x20,
        };
        // Garbage src1/src2 (as if uninitialized) must not affect the jump target.
        let result = Executor::execute(
            instr,
            0x1000,
            OperandValues {
                src1: 0,
                src2: 0,
                csr: 0,
            },
        );
        assert_eq!(0x1020, result.next_ip);
        assert_eq!(0x1004, result.data);
    }

    #[test]
    fn test_jalr_clears_low_bit() {
        let instr = Instruction::Jr {
            dest: specifier(1),
            base: specifier(2),
            offset: 1,
        };
        let result = Executor::execute(
            instr,
            0x1000,
            OperandValues {
                src1: 0x2000,
                src2: 0,
                csr: 0,
            },
        );
        assert_eq!(0x2000, result.next_ip);
    }
}
