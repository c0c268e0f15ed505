//! Core simulation engine: decoder, executor, register/CSR files, cache hierarchy, and the
//! clocked [`cpu::Cpu`] pipeline that drives them.

#[macro_use]
extern crate static_assertions;

pub mod cpu;
pub mod csr;
pub mod elf;
pub mod execute;
pub mod instruction;
pub mod memory;
pub mod registers;
