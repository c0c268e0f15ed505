use clap::Parser;
use log::{debug, error, info};
use riscv_sim_core::cpu::Cpu;
use riscv_sim_core::csr::HostMessageKind;
use riscv_sim_core::memory::{CachedMem, MemoryStorage, UncachedMem, L_MISS};
use std::fs::File;
use std::io::{Read, Write};
use std::process::ExitCode;

const DEFAULT_ENTRY: u32 = 0x200;
const DEFAULT_MAIN_LATENCY: u32 = 120;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// ELF binary to execute.
    elf: String,

    /// Initial program counter, in hex (e.g. `0x200`), or `elf` to use the ELF's own entry point.
    #[arg(long, default_value_t = format!("{DEFAULT_ENTRY:#x}"))]
    entry: String,

    /// Main-memory access latency, in cycles.
    #[arg(long, default_value_t = DEFAULT_MAIN_LATENCY)]
    main_latency: u32,

    /// Cache miss penalty, in cycles.
    #[arg(long, default_value_t = L_MISS)]
    miss_latency: u32,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, RunError> {
    let mut buf = Vec::new();
    File::open(&args.elf)?.read_to_end(&mut buf)?;

    let mut storage = MemoryStorage::new();
    let elf_entry = riscv_sim_core::elf::load_into(&mut storage, &buf)?;

    let entry_ip = match args.entry.as_str() {
        "elf" => elf_entry,
        hex => u32::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|_| RunError::BadEntry(args.entry.clone()))?,
    };

    let uncached = UncachedMem::new(storage, args.main_latency);
    let mut mem = CachedMem::new(uncached);
    mem.set_miss_latency(args.miss_latency);
    let mut cpu = Cpu::new(mem);
    cpu.reset(entry_ip);

    debug!("starting execution at {entry_ip:#010x}");

    let mut print_int: u32 = 0;
    loop {
        if let Err(e) = cpu.clock() {
            error!("fatal: {e}");
            return Ok(ExitCode::FAILURE);
        }

        let Some(msg) = cpu.take_message() else {
            continue;
        };

        match msg.kind {
            HostMessageKind::ExitCode => {
                return Ok(if msg.data == 0 {
                    eprintln!("PASSED");
                    ExitCode::SUCCESS
                } else {
                    eprintln!("FAILED: exit code = {}", msg.data);
                    ExitCode::from(msg.data as u8)
                });
            }
            HostMessageKind::PrintChar => {
                eprint!("{}", msg.data as u8 as char);
                std::io::stderr().flush().ok();
            }
            HostMessageKind::PrintIntLow => {
                print_int = msg.data as u16 as u32;
            }
            HostMessageKind::PrintIntHigh => {
                print_int |= (msg.data as u16 as u32) << 16;
                eprint!("{}", print_int as i32);
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error("failed to read elf file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Elf(#[from] riscv_sim_core::elf::ElfLoadError),
    #[error("invalid --entry value {0:?}, expected \"elf\" or a hex address")]
    BadEntry(String),
}
