//! Example: 8x8 layer through the full pipeline
//!
//! Loads eight input vectors, fetches one weight tile, multiplies, applies
//! ReLU and writes the result back to host memory. Four NOPs give the weight
//! tile time to land before the switch.
//!
//! Run with: cargo run --example worked_example

use tpu_sim::{
    run_program, Activation, Instruction, Program, Quantized, TileStore, TpuConfig,
    VecHostMemory, WeightTile,
};

fn main() {
    println!("=== 8x8 Worked Example ===\n");

    let config = TpuConfig::default();
    let size = config.array_size;

    let mut instructions = vec![
        Instruction::ReadHostMemory { host_addr: 0, ub_addr: 0, len: 8 },
        Instruction::ReadWeights { weight_addr: 0 },
    ];
    instructions.extend(std::iter::repeat(Instruction::Nop).take(4));
    instructions.extend([
        Instruction::MatrixMultiply { ub_addr: 0, acc_addr: 0, len: 8, switch: true, overwrite: true },
        Instruction::Activate { acc_addr: 0, ub_addr: 8, len: 8, function: Activation::Relu },
        Instruction::WriteHostMemory { ub_addr: 8, host_addr: 8, len: 8 },
        Instruction::Halt,
    ]);

    println!("Program:");
    for (pc, instr) in instructions.iter().enumerate() {
        println!("  {:>2}: {}", pc, instr);
    }
    println!();

    let program = Program::from_instructions(&instructions).unwrap();

    // Inputs: x[v][i] = v - i; weights: W[i][j] = (i + 2j) mod 5 - 2
    let inputs: Vec<Vec<i8>> = (0..size)
        .map(|v| (0..size).map(|i| v as i8 - i as i8).collect())
        .collect();
    let rows: Vec<Vec<i8>> = (0..size)
        .map(|i| (0..size).map(|j| ((i + 2 * j) % 5) as i8 - 2).collect())
        .collect();

    let mut vectors = inputs.clone();
    vectors.resize(2 * size, vec![0; size]);
    let mut host = VecHostMemory::from_vectors(size, vectors).unwrap();
    let mut weights = TileStore::new();
    weights.push(WeightTile::from_rows(rows.clone()).unwrap());

    let report = run_program::<Quantized>(config, program, &mut host, &weights).unwrap();

    println!("Total cycles: {}", report.cycles);
    println!("Busy cycles (without NOP padding): {}\n", report.busy_cycles());

    println!("Output (relu(x·W)):");
    for (v, out) in host.vectors()[size..].iter().enumerate() {
        let expected: Vec<i8> = (0..size)
            .map(|j| {
                let dot: i32 = (0..size).map(|i| inputs[v][i] as i32 * rows[i][j] as i32).sum();
                dot.clamp(0, 127) as i8
            })
            .collect();
        let mark = if *out == expected { "ok" } else { "MISMATCH" };
        println!("  {:?}  {}", out, mark);
    }
}
