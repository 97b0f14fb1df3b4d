//! Cycle-accurate systolic-array TPU simulator
//!
//! This library models a fixed-point matrix-multiply accelerator clock cycle
//! by clock cycle: the MAC grid with its input skew and output de-skew, the
//! double-buffered weight FIFO, the unified and accumulator buffers, the
//! activation pipeline and the instruction scheduler that drives them.
//!
//! # Example
//!
//! ```rust
//! use tpu_sim::{
//!     run_program, Activation, Instruction, Program, Quantized, TileStore, TpuConfig,
//!     VecHostMemory, WeightTile,
//! };
//!
//! let config = TpuConfig::new(2);
//! let program = Program::from_instructions(&[
//!     Instruction::ReadWeights { weight_addr: 0 },
//!     Instruction::ReadHostMemory { host_addr: 0, ub_addr: 0, len: 1 },
//!     Instruction::Sync,
//!     Instruction::MatrixMultiply { ub_addr: 0, acc_addr: 0, len: 1, switch: true, overwrite: true },
//!     Instruction::Activate { acc_addr: 0, ub_addr: 1, len: 1, function: Activation::Relu },
//!     Instruction::WriteHostMemory { ub_addr: 1, host_addr: 1, len: 1 },
//!     Instruction::Halt,
//! ])
//! .unwrap();
//!
//! let mut host = VecHostMemory::<i8>::from_vectors(2, vec![vec![2, 3], vec![0, 0]]).unwrap();
//! let mut weights = TileStore::<i8>::new();
//! weights.push(WeightTile::from_rows(vec![vec![1, 0], vec![1, -1]]).unwrap());
//!
//! let report = run_program::<Quantized>(config, program, &mut host, &weights).unwrap();
//!
//! assert_eq!(host.vectors()[1], vec![5, 0]);
//! assert!(report.halted);
//! ```

pub mod activation;
pub mod arith;
pub mod buffer;
pub mod config;
pub mod datapath;
pub mod decoder;
pub mod error;
pub mod host;
pub mod isa;
pub mod mac;
pub mod scheduler;
pub mod systolic;
pub mod trace;
pub mod weights;

pub use activation::{Activation, ActivationUnit, SigmoidTable, SIGMOID_MAX_ERROR};
pub use buffer::{AccumulatorBuffer, UnifiedBuffer, VectorMemory, WriteMode};
pub use config::{ExecMode, TpuConfig};
pub use datapath::{Datapath, Quantized, Raw};
pub use decoder::Decoder;
pub use error::{DecodeError, EncodeError, Fault, HazardError, Memory, Resource, TpuError, TpuResult};
pub use host::{HostMemory, VecHostMemory};
pub use isa::{Instruction, InstructionWord, Opcode, Program, INSTRUCTION_BYTES};
pub use scheduler::{ExternalBus, Phase, ResourceTable, Tpu};
pub use systolic::{ArrayInput, ArrayOutput, SystolicArray};
pub use trace::{CycleRecord, FaultRecord, RetireRecord, RunReport, TraceEvent};
pub use weights::{TileStore, WeightFifo, WeightStore, WeightTile};

/// Build a core for `D`, run `program` to completion and return its report
pub fn run_program<'a, D: Datapath>(
    config: TpuConfig,
    program: Program,
    host: &'a mut dyn HostMemory<D::Elem>,
    weights: &'a dyn WeightStore<D::Weight>,
) -> TpuResult<RunReport> {
    let mut tpu = Tpu::<D>::new(config, program)?;
    tpu.run(&mut ExternalBus::new(host, weights))
}
