//! Example: accumulating a 16-deep reduction on a 4x4 array
//!
//! A layer with 16 input channels does not fit one tile. The reduction is
//! split in four slices of four channels; the first pass overwrites the
//! accumulator, the remaining three add onto it. The result goes through the
//! sigmoid table.
//!
//! Run with: cargo run --example conv_accumulate

use tpu_sim::{
    run_program, Activation, Instruction, Program, Quantized, TileStore, TpuConfig,
    VecHostMemory, WeightTile,
};

const SIZE: usize = 4;
const SLICES: usize = 4;
const VECTORS: usize = 6;

fn main() {
    println!("=== Accumulated Reduction Example ===\n");

    let config = TpuConfig::new(SIZE);

    // Full input rows have SIZE * SLICES channels; slice k of vector v lives
    // at host address k * VECTORS + v.
    let input = |v: usize, c: usize| ((v * 7 + c * 3) % 11) as i8 - 5;
    let weight = |c: usize, j: usize| ((c + j) % 3) as i8 - 1;

    let mut host_vectors = Vec::new();
    for k in 0..SLICES {
        for v in 0..VECTORS {
            host_vectors.push((0..SIZE).map(|i| input(v, k * SIZE + i)).collect::<Vec<_>>());
        }
    }
    let out_base = host_vectors.len();
    host_vectors.resize(out_base + VECTORS, vec![0; SIZE]);

    let mut weights = TileStore::new();
    for k in 0..SLICES {
        let rows = (0..SIZE)
            .map(|i| (0..SIZE).map(|j| weight(k * SIZE + i, j)).collect())
            .collect();
        weights.push(WeightTile::from_rows(rows).unwrap());
    }

    let mut instructions = Vec::new();
    for k in 0..SLICES {
        // Fetch the tile first; the previous pass covers its landing time
        instructions.push(Instruction::ReadWeights { weight_addr: k as u64 });
        instructions.push(Instruction::ReadHostMemory {
            host_addr: (k * VECTORS) as u64,
            ub_addr: (k * VECTORS) as u32,
            len: VECTORS as u8,
        });
        instructions.push(Instruction::Sync);
        instructions.push(Instruction::MatrixMultiply {
            ub_addr: (k * VECTORS) as u32,
            acc_addr: 0,
            len: VECTORS as u8,
            switch: true,
            overwrite: k == 0,
        });
    }
    let out_ub = (SLICES * VECTORS) as u32;
    instructions.push(Instruction::Activate {
        acc_addr: 0,
        ub_addr: out_ub,
        len: VECTORS as u8,
        function: Activation::Sigmoid,
    });
    instructions.push(Instruction::WriteHostMemory {
        ub_addr: out_ub,
        host_addr: out_base as u64,
        len: VECTORS as u8,
    });
    instructions.push(Instruction::Halt);

    let program = Program::from_instructions(&instructions).unwrap();
    let mut host = VecHostMemory::from_vectors(SIZE, host_vectors).unwrap();
    let report = run_program::<Quantized>(config, program, &mut host, &weights).unwrap();

    println!("Instructions retired: {}", report.retired.len());
    println!("Total cycles: {}\n", report.cycles);

    println!("sigmoid(x·W) as Q0.7 (127 = 1.0):");
    for v in 0..VECTORS {
        let sums: Vec<i32> = (0..SIZE)
            .map(|j| {
                (0..SIZE * SLICES)
                    .map(|c| input(v, c) as i32 * weight(c, j) as i32)
                    .sum()
            })
            .collect();
        println!(
            "  pre-activation {:?} -> {:?}",
            sums,
            host.vectors()[out_base + v]
        );
    }
}
