//! Example: float diagnostic datapath
//!
//! Runs the same schedule as the quantized core on f32 values. Useful for
//! checking a layer before it is quantized.
//!
//! Run with: cargo run --example raw_mode

use tpu_sim::{
    run_program, Activation, ExecMode, Instruction, Program, Raw, TileStore, TpuConfig,
    VecHostMemory, WeightTile,
};

fn main() {
    println!("=== Raw (f32) Mode Example ===\n");

    let config = TpuConfig::new(3).with_mode(ExecMode::Raw).with_trace(true);

    let program = Program::from_instructions(&[
        Instruction::ReadWeights { weight_addr: 0 },
        Instruction::ReadHostMemory { host_addr: 0, ub_addr: 0, len: 2 },
        Instruction::Sync,
        Instruction::MatrixMultiply { ub_addr: 0, acc_addr: 0, len: 2, switch: true, overwrite: true },
        Instruction::Activate { acc_addr: 0, ub_addr: 2, len: 2, function: Activation::Sigmoid },
        Instruction::WriteHostMemory { ub_addr: 2, host_addr: 2, len: 2 },
        Instruction::Halt,
    ])
    .unwrap();

    let mut host = VecHostMemory::from_vectors(
        3,
        vec![
            vec![0.5f32, -1.0, 2.0],
            vec![1.5, 0.25, -0.75],
            vec![0.0; 3],
            vec![0.0; 3],
        ],
    )
    .unwrap();
    let mut weights = TileStore::new();
    weights.push(
        WeightTile::from_rows(vec![
            vec![0.1f32, -0.2, 0.3],
            vec![0.4, 0.5, -0.6],
            vec![-0.7, 0.8, 0.9],
        ])
        .unwrap(),
    );

    let report = run_program::<Raw>(config, program, &mut host, &weights).unwrap();

    println!("Total cycles: {}", report.cycles);
    println!("Trace records: {}\n", report.trace.len());
    for (v, out) in host.vectors()[2..].iter().enumerate() {
        println!("  sigmoid(x{}·W) = {:?}", v, out);
    }
}
