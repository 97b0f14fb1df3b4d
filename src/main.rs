//! TPU simulator CLI
//!
//! Usage:
//!   tpusim program.bin --host host.json --weights weights.json
//!   tpusim program.bin --config tpu.toml --trace trace.json -v
//!   tpusim program.bin --raw --host host_f32.json --json

use clap::Parser as ClapParser;
use colored::Colorize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

use tpu_sim::{
    Datapath, ExecMode, ExternalBus, Opcode, Program, Quantized, Raw, RunReport, TileStore, Tpu,
    TpuConfig, TpuError, TpuResult, VecHostMemory,
};

#[derive(ClapParser, Debug)]
#[command(name = "tpusim")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Cycle-accurate systolic-array TPU simulator")]
struct Args {
    /// Binary program image (14-byte instruction words)
    #[arg(value_name = "PROGRAM")]
    program: PathBuf,

    /// Host memory image: JSON array of vectors
    #[arg(long = "host")]
    host: Option<PathBuf>,

    /// Grow host memory to at least this many vectors
    #[arg(long = "host-capacity", default_value = "0")]
    host_capacity: usize,

    /// Weight store image: JSON array of square tiles
    #[arg(short = 'w', long = "weights")]
    weights: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Systolic array size (NxN), overrides the configuration file
    #[arg(short = 'n', long = "array-size")]
    array_size: Option<usize>,

    /// Use the f32 diagnostic datapath
    #[arg(long = "raw")]
    raw: bool,

    /// Write the run report with a per-cycle trace as JSON
    #[arg(short = 't', long = "trace")]
    trace: Option<PathBuf>,

    /// Print the final host memory image as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };

    let program = match fs::read(&args.program)
        .map_err(TpuError::from)
        .and_then(|bytes| Program::from_bytes(&bytes))
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!(
                "{}: Failed to load '{}': {}",
                "Error".red(),
                args.program.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if args.verbose {
        println!("{}", "TPU Simulator".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!("{}: {}", "Program".green(), args.program.display());
        println!("{}: {} instructions", "Length".green(), program.len());
        println!(
            "{}: {}x{} ({} mode)",
            "Target array".green(),
            config.array_size,
            config.array_size,
            config.mode
        );
        println!();
    }

    let ok = match config.mode {
        ExecMode::Quantized => run_with::<Quantized>(&args, config, program),
        ExecMode::Raw => run_with::<Raw>(&args, config, program),
    };
    if !ok {
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> TpuResult<TpuConfig> {
    let mut config = match &args.config {
        Some(path) => TpuConfig::load(path)?,
        None => TpuConfig::default(),
    };
    if let Some(n) = args.array_size {
        config.array_size = n;
    }
    if args.raw {
        config.mode = ExecMode::Raw;
    }
    if args.trace.is_some() {
        config.trace = true;
    }
    config.validate()?;
    Ok(config)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> TpuResult<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn load_images<D: Datapath>(
    args: &Args,
    width: usize,
) -> TpuResult<(VecHostMemory<D::Elem>, TileStore<D::Weight>)> {
    let mut host = match &args.host {
        Some(path) => {
            let vectors: Vec<Vec<D::Elem>> = read_json(path)?;
            VecHostMemory::from_vectors(width, vectors)
                .map_err(|e| TpuError::program(format!("host image: {}", e)))?
        }
        None => VecHostMemory::new(0, width),
    };
    host.ensure_capacity(args.host_capacity);

    let weights = match &args.weights {
        Some(path) => {
            let tiles: Vec<Vec<Vec<D::Weight>>> = read_json(path)?;
            TileStore::from_rows(tiles)
                .map_err(|e| TpuError::program(format!("weight image: {}", e)))?
        }
        None => TileStore::new(),
    };
    Ok((host, weights))
}

/// Returns `false` when the run did not complete
fn run_with<D: Datapath>(args: &Args, config: TpuConfig, program: Program) -> bool {
    let (mut host, weights) = match load_images::<D>(args, config.array_size) {
        Ok(images) => images,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return false;
        }
    };

    let mut tpu = match Tpu::<D>::new(config, program) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            return false;
        }
    };

    let result = {
        let mut bus = ExternalBus::<D>::new(&mut host, &weights);
        tpu.run(&mut bus)
    };
    let report = tpu.report();

    let ok = match &result {
        Ok(_) => true,
        Err(e) => {
            eprintln!("{}: {}", "Fault".red().bold(), e);
            false
        }
    };

    print_report(&report, args.verbose);

    if let Some(path) = &args.trace {
        let written = report
            .to_json()
            .map_err(TpuError::from)
            .and_then(|json| fs::write(path, json).map_err(TpuError::from));
        if let Err(e) = written {
            eprintln!("{}: Failed to write trace: {}", "Error".red(), e);
        }
    }

    if args.json_output {
        match serde_json::to_string_pretty(host.vectors()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e),
        }
    }
    ok
}

fn print_report(report: &RunReport, verbose: bool) {
    let title = if report.fault.is_some() {
        "Partial Results".bold().yellow()
    } else {
        "Simulation Results".bold().green()
    };
    println!("{}", title);
    println!("{}", "=".repeat(50));
    println!();

    println!("{}: {}", "Total cycles".cyan(), report.cycles);
    println!("{}: {}", "Retired".cyan(), report.retired.len());
    println!("{}: {}", "Busy cycles".cyan(), report.busy_cycles());
    println!(
        "{}: {}",
        "Halted".cyan(),
        if report.halted { "yes" } else { "no" }
    );
    println!();

    let opcodes = [
        Opcode::ReadHostMemory,
        Opcode::WriteHostMemory,
        Opcode::ReadWeights,
        Opcode::MatrixMultiply,
        Opcode::Activate,
        Opcode::Sync,
        Opcode::Nop,
        Opcode::Halt,
    ];
    for opcode in opcodes {
        let count = report.count(opcode);
        if count > 0 {
            println!("  {:<5} {}", opcode.mnemonic(), count);
        }
    }

    if verbose {
        println!();
        println!("{}", "Instruction Timeline".bold().yellow());
        println!("{}", "-".repeat(50));
        for r in &report.retired {
            println!(
                "  {:>4}  {:<5} {:>8} .. {:<8} ({} cycles)",
                r.pc,
                r.opcode.mnemonic(),
                r.dispatch_cycle,
                r.retire_cycle,
                r.latency
            );
        }
    }

    if let Some(fault) = &report.fault {
        println!();
        println!(
            "{}: instruction {} at cycle {}: {}",
            "Stopped".red(),
            fault.pc,
            fault.cycle,
            fault.message
        );
    }
}
