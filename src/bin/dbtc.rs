//! dbtc - compile a single guest entry point and report what happened.
//!
//! Usage: dbtc [OPTIONS] <guest-memory-file> <entry-addr-hex>

use std::process::ExitCode;

use dbtcore::backend::mock::MockBackend;
use dbtcore::cache::Coordinator;
use dbtcore::config::Options;
use dbtcore::guest::FlatGuest;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mut isa = "isa16".to_string();
    let mut dump_ir = false;
    let mut perf = false;
    let mut appdir = ".".to_string();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "--isa" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--isa requires an argument");
                    return ExitCode::from(1);
                }
                isa = args[i].clone();
            }
            "--dump-ir" => dump_ir = true,
            "--perf" => perf = true,
            "--appdir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--appdir requires an argument");
                    return ExitCode::from(1);
                }
                appdir = args[i].clone();
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {arg}");
                return ExitCode::from(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    if positional.len() != 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let mem_path = &positional[0];
    let Ok(entry_addr) = u32::from_str_radix(positional[1].trim_start_matches("0x"), 16) else {
        eprintln!("invalid entry address: {}", positional[1]);
        return ExitCode::from(1);
    };

    let mem = match std::fs::read(mem_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {mem_path}: {e}");
            return ExitCode::from(1);
        }
    };

    let mut options = Options::new(appdir);
    options.dump_code = dump_ir;
    options.perf = perf;

    let guest = FlatGuest::new(mem);
    let backend = MockBackend::default();

    let result = match isa.as_str() {
        "isa16" => run(guest, dbtcore::frontend::isa16::Isa16, backend, options, entry_addr),
        "isa32" => run(guest, dbtcore::frontend::isa32::Isa32, backend, options, entry_addr),
        other => {
            eprintln!("unknown --isa {other} (expected isa16 or isa32)");
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("compile_code failed: {msg}");
            ExitCode::from(1)
        }
    }
}

fn run<F: dbtcore::frontend::Frontend>(
    guest: FlatGuest,
    frontend: F,
    backend: MockBackend,
    options: Options,
    entry_addr: u32,
) -> Result<(), String> {
    let dump_code = options.dump_code;
    let mut co = Coordinator::new(guest, frontend, backend, options);
    let id = co.compile_code(entry_addr).map_err(|e| e.to_string())?;
    let code = co.code(id);
    println!("compiled 0x{entry_addr:08x} -> host 0x{:x} ({} bytes)", code.host_addr, code.host_size);
    if dump_code {
        println!("IR written under {:?}", co.options().ir_dump_path(entry_addr));
    }
    Ok(())
}

fn print_usage() {
    println!("dbtc - compile a single guest entry point");
    println!();
    println!("USAGE:");
    println!("    dbtc [OPTIONS] <guest-memory-file> <entry-addr-hex>");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help        Show this help message");
    println!("    --isa <name>      Guest ISA: isa16 (default) or isa32");
    println!("    --dump-ir         Write pre-optimization IR under --appdir/ir/");
    println!("    --perf            Append a perf map line on finalization");
    println!("    --appdir <dir>    Root directory for IR dumps (default: .)");
}
