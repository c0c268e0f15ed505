//! Control and status registers: cycle/instret counters and the host-communication mailbox.

use log::{trace, warn};
use thiserror::Error;

/// `cycle` / `mcycle`: count of clock cycles executed since reset.
pub const CYCLE: u16 = 0xC00;
/// `instret` / `minstret`: count of instructions retired since reset.
pub const INSTRET: u16 = 0xC02;
/// Low half of a pending host-bound message: `{type: u16, data: i16}` packed into one write.
pub const TOHOST: u16 = 0x780;

/// A message sent from the guest to the host, unpacked from a single `tohost` CSR write.
///
/// The guest packs the high 16 bits as the message type and the low 16 bits as a signed payload;
/// see [`CsrFile::write`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HostMessage {
    pub kind: HostMessageKind,
    pub data: i16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HostMessageKind {
    ExitCode,
    PrintChar,
    PrintIntLow,
    PrintIntHigh,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrError {
    #[error("access to unmapped csr {0:#06x}")]
    UnmappedCsr(u16),
}

/// CSR file: a handful of read/write counters plus the `tohost` mailbox.
///
/// Unlike a privileged RISC-V core, this file has no mode-dependent access control and no trap
/// vector: any mapped CSR can be read or written from any context, matching this simulator's
/// Non-goal of privileged-mode emulation.
#[derive(Debug, Clone)]
pub struct CsrFile {
    cycle: u64,
    instret: u64,
    pending_message: Option<HostMessage>,
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new()
    }
}

impl CsrFile {
    pub fn new() -> Self {
        Self {
            cycle: 0,
            instret: 0,
            pending_message: None,
        }
    }

    /// Resets all counters and clears any buffered host message.
    pub fn reset(&mut self) {
        self.cycle = 0;
        self.instret = 0;
        self.pending_message = None;
    }

    /// Advances the cycle counter. Called once per [`crate::cpu::Cpu::clock`] tick.
    pub fn clock(&mut self) {
        self.cycle += 1;
    }

    /// Marks one instruction as retired. Called once per completed fetch-execute-memory pass.
    pub fn instruction_executed(&mut self) {
        self.instret += 1;
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn instret(&self) -> u64 {
        self.instret
    }

    /// Reads a CSR by address.
    pub fn read(&self, csr: u16) -> Result<u32, CsrError> {
        match csr {
            CYCLE => Ok(self.cycle as u32),
            INSTRET => Ok(self.instret as u32),
            _ => Err(CsrError::UnmappedCsr(csr)),
        }
    }

    /// Writes a CSR by address. A write to [`TOHOST`] latches a [`HostMessage`], overwriting any
    /// message not yet consumed by [`Self::take_message`] (the reference drains at most one
    /// message per tick, so a guest that writes faster than the host drains will lose messages;
    /// this is accepted as the reference's behavior, not a bug to paper over).
    pub fn write(&mut self, csr: u16, value: u32) -> Result<(), CsrError> {
        match csr {
            CYCLE | INSTRET => {
                warn!("ignoring write to read-only csr {csr:#06x}");
                Ok(())
            }
            TOHOST => {
                let kind = match (value >> 16) as u16 {
                    0 => HostMessageKind::ExitCode,
                    1 => HostMessageKind::PrintChar,
                    2 => HostMessageKind::PrintIntLow,
                    3 => HostMessageKind::PrintIntHigh,
                    other => return Err(CsrError::UnmappedCsr(TOHOST.wrapping_add(other))),
                };
                let data = value as u16 as i16;
                trace!("host message latched: {kind:?} {data}");
                self.pending_message = Some(HostMessage { kind, data });
                Ok(())
            }
            _ => Err(CsrError::UnmappedCsr(csr)),
        }
    }

    /// Consumes and returns the most recently latched host message, if any.
    pub fn take_message(&mut self) -> Option<HostMessage> {
        self.pending_message.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_and_instret() {
        let mut csrs = CsrFile::new();
        csrs.clock();
        csrs.clock();
        csrs.instruction_executed();
        assert_eq!(2, csrs.cycle());
        assert_eq!(1, csrs.instret());
        assert_eq!(Ok(2), csrs.read(CYCLE));
        assert_eq!(Ok(1), csrs.read(INSTRET));
    }

    #[test]
    fn test_tohost_print_char() {
        let mut csrs = CsrFile::new();
        csrs.write(TOHOST, (1u32 << 16) | b'H' as u32).unwrap();
        let msg = csrs.take_message().unwrap();
        assert_eq!(HostMessageKind::PrintChar, msg.kind);
        assert_eq!(b'H' as i16, msg.data);
        assert_eq!(None, csrs.take_message());
    }

    #[test]
    fn test_tohost_exit_code() {
        let mut csrs = CsrFile::new();
        csrs.write(TOHOST, 0).unwrap();
        let msg = csrs.take_message().unwrap();
        assert_eq!(HostMessageKind::ExitCode, msg.kind);
        assert_eq!(0, msg.data);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut csrs = CsrFile::new();
        csrs.clock();
        csrs.write(TOHOST, 0).unwrap();
        csrs.reset();
        assert_eq!(0, csrs.cycle());
        assert_eq!(None, csrs.take_message());
    }

    #[test]
    fn test_unmapped_csr() {
        let csrs = CsrFile::new();
        assert_eq!(Err(CsrError::UnmappedCsr(0x123)), csrs.read(0x123));
    }
}
