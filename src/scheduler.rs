//! Pipeline and latency scheduler
//!
//! [`Tpu`] owns every piece of on-chip state and steps it one clock cycle
//! per [`Tpu::advance`]. Fetch, decode, dispatch and retire are zero-time
//! transitions taken inside a call; only executing cycles advance the clock,
//! so a program's cycle count is the sum of its instruction latencies.
//!
//! One instruction is in flight at a time. The core never stalls: a program
//! that dispatches against a busy resource or an unready weight tile faults
//! with a [`HazardError`] carrying the instruction index and cycle.

use crate::activation::ActivationUnit;
use crate::buffer::{AccumulatorBuffer, UnifiedBuffer, WriteMode};
use crate::config::TpuConfig;
use crate::datapath::Datapath;
use crate::decoder::Decoder;
use crate::error::{Fault, HazardError, Memory, Resource, TpuError, TpuResult};
use crate::host::HostMemory;
use crate::isa::{Instruction, InstructionWord, Program};
use crate::systolic::{ArrayInput, SystolicArray};
use crate::trace::{CycleRecord, FaultRecord, RetireRecord, RunReport, TraceEvent};
use crate::weights::{WeightFifo, WeightStore};

/// Where the core is within its instruction cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Decode,
    Dispatch,
    Executing { remaining: u64 },
    Retire,
    Halted,
}

/// Busy-until cycle per shared resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceTable {
    busy_until: [u64; 6],
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn busy_until(&self, resource: Resource) -> u64 {
        self.busy_until[resource.index()]
    }

    pub fn check(&self, resource: Resource, now: u64) -> Result<(), HazardError> {
        let busy_until = self.busy_until(resource);
        if busy_until > now {
            return Err(HazardError::ResourceBusy {
                resource,
                busy_until,
            });
        }
        Ok(())
    }

    pub fn occupy(&mut self, resource: Resource, until: u64) {
        let slot = &mut self.busy_until[resource.index()];
        *slot = (*slot).max(until);
    }
}

/// Resources an instruction claims at dispatch
fn claims(instr: &Instruction) -> &'static [Resource] {
    match instr {
        Instruction::ReadHostMemory { .. } | Instruction::WriteHostMemory { .. } => {
            &[Resource::HostMemory, Resource::UnifiedBuffer]
        }
        Instruction::ReadWeights { .. } => &[Resource::WeightStore],
        Instruction::MatrixMultiply { .. } => &[
            Resource::UnifiedBuffer,
            Resource::Array,
            Resource::Accumulator,
        ],
        Instruction::Activate { .. } => &[
            Resource::Accumulator,
            Resource::ActivationUnit,
            Resource::UnifiedBuffer,
        ],
        Instruction::Nop | Instruction::Sync | Instruction::Halt => &[],
    }
}

/// Collaborators outside the core, lent for one call
pub struct ExternalBus<'a, D: Datapath> {
    pub host: &'a mut dyn HostMemory<D::Elem>,
    pub weights: &'a dyn WeightStore<D::Weight>,
}

impl<'a, D: Datapath> ExternalBus<'a, D> {
    pub fn new(
        host: &'a mut dyn HostMemory<D::Elem>,
        weights: &'a dyn WeightStore<D::Weight>,
    ) -> Self {
        Self { host, weights }
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    pc: usize,
    instr: Instruction,
    dispatch_cycle: u64,
    latency: u64,
    step: u64,
}

/// The simulated core
pub struct Tpu<D: Datapath> {
    config: TpuConfig,
    decoder: Decoder,
    program: Program,
    pc: usize,
    cycle: u64,
    phase: Phase,
    fetched: Option<InstructionWord>,
    decoded: Option<Instruction>,
    current: Option<InFlight>,
    resources: ResourceTable,
    ub: UnifiedBuffer<D::Elem>,
    acc: AccumulatorBuffer<D>,
    array: SystolicArray<D>,
    fifo: WeightFifo<D::Weight>,
    activation: ActivationUnit<D>,
    dispatch_events: Vec<TraceEvent>,
    retired: Vec<RetireRecord>,
    trace: Vec<CycleRecord>,
    fault: Option<FaultRecord>,
}

impl<D: Datapath> Tpu<D> {
    pub fn new(config: TpuConfig, program: Program) -> TpuResult<Self> {
        config.validate()?;
        if config.mode != D::MODE {
            return Err(TpuError::config(format!(
                "configuration selects {} mode but the core was built for {}",
                config.mode,
                D::MODE
            )));
        }
        let size = config.array_size;
        Ok(Self {
            decoder: Decoder::new(&config),
            program,
            pc: 0,
            cycle: 0,
            phase: Phase::Fetch,
            fetched: None,
            decoded: None,
            current: None,
            resources: ResourceTable::new(),
            ub: UnifiedBuffer::unified(config.ub_capacity, size),
            acc: AccumulatorBuffer::new(config.acc_capacity, size),
            array: SystolicArray::new(size),
            fifo: WeightFifo::new(config.fifo_depth),
            activation: ActivationUnit::new(),
            dispatch_events: Vec::new(),
            retired: Vec::new(),
            trace: Vec::new(),
            fault: None,
            config,
        })
    }

    pub fn config(&self) -> &TpuConfig {
        &self.config
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_halted(&self) -> bool {
        self.phase == Phase::Halted
    }

    pub fn unified_buffer(&self) -> &UnifiedBuffer<D::Elem> {
        &self.ub
    }

    pub fn accumulator(&self) -> &AccumulatorBuffer<D> {
        &self.acc
    }

    pub fn array(&self) -> &SystolicArray<D> {
        &self.array
    }

    pub fn weight_fifo(&self) -> &WeightFifo<D::Weight> {
        &self.fifo
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// Run until halt or fault
    pub fn run(&mut self, bus: &mut ExternalBus<'_, D>) -> TpuResult<RunReport> {
        while self.advance(bus)? {}
        Ok(self.report())
    }

    /// Execute one clock cycle; returns `false` once the core has halted
    ///
    /// The call that discovers the end of the program halts without
    /// consuming a cycle.
    pub fn advance(&mut self, bus: &mut ExternalBus<'_, D>) -> TpuResult<bool> {
        loop {
            match self.phase {
                Phase::Halted => return Ok(false),
                Phase::Fetch => match self.program.get(self.pc) {
                    Some(word) => {
                        self.fetched = Some(*word);
                        self.phase = Phase::Decode;
                    }
                    None => {
                        log::info!(
                            "End of program at pc {} after {} cycles",
                            self.pc,
                            self.cycle
                        );
                        self.phase = Phase::Halted;
                        return Ok(false);
                    }
                },
                Phase::Decode => {
                    let Some(word) = self.fetched.take() else {
                        self.phase = Phase::Fetch;
                        continue;
                    };
                    match self.decoder.decode(&word) {
                        Ok(instr) => self.decoded = Some(instr),
                        Err(e) => return Err(self.fail(e.into())),
                    }
                    self.phase = Phase::Dispatch;
                }
                Phase::Dispatch => {
                    let Some(instr) = self.decoded.take() else {
                        self.phase = Phase::Fetch;
                        continue;
                    };
                    let latency = match self.dispatch(instr, bus) {
                        Ok(latency) => latency,
                        Err(fault) => return Err(self.fail(fault)),
                    };
                    log::debug!(
                        "[{:>6}] pc {:>4}: {} ({} cycles)",
                        self.cycle,
                        self.pc,
                        instr,
                        latency
                    );
                    self.current = Some(InFlight {
                        pc: self.pc,
                        instr,
                        dispatch_cycle: self.cycle,
                        latency,
                        step: 0,
                    });
                    self.phase = Phase::Executing { remaining: latency };
                }
                Phase::Executing { remaining } => {
                    if let Err(fault) = self.execute_cycle(bus) {
                        return Err(self.fail(fault));
                    }
                    self.cycle += 1;
                    if remaining > 1 {
                        self.phase = Phase::Executing {
                            remaining: remaining - 1,
                        };
                    } else {
                        self.phase = Phase::Retire;
                        self.retire();
                    }
                    return Ok(!self.is_halted());
                }
                Phase::Retire => self.retire(),
            }
        }
    }

    /// Records gathered so far
    pub fn report(&self) -> RunReport {
        RunReport {
            cycles: self.cycle,
            halted: self.is_halted() && self.fault.is_none(),
            retired: self.retired.clone(),
            trace: self.trace.clone(),
            fault: self.fault.clone(),
        }
    }

    fn fail(&mut self, fault: Fault) -> TpuError {
        match &fault {
            Fault::Hazard(h) => {
                log::warn!("Hazard at pc {} cycle {}: {}", self.pc, self.cycle, h)
            }
            other => log::error!("Fault at pc {} cycle {}: {}", self.pc, self.cycle, other),
        }
        // Writes issued before the fault within this cycle stand
        self.ub.commit();
        self.acc.commit();
        self.current = None;
        self.phase = Phase::Halted;
        self.fault = Some(FaultRecord {
            pc: self.pc,
            cycle: self.cycle,
            message: fault.to_string(),
        });
        TpuError::fault(self.pc, self.cycle, fault)
    }

    /// Claim resources and perform dispatch-time side effects
    fn dispatch(&mut self, instr: Instruction, bus: &ExternalBus<'_, D>) -> Result<u64, Fault> {
        let now = self.cycle;
        for &resource in claims(&instr) {
            self.resources.check(resource, now)?;
        }

        let mut latency = instr.latency(&self.config, D::WEIGHT_BYTES);
        match instr {
            Instruction::ReadWeights { weight_addr } => {
                if self.fifo.is_full() {
                    return Err(HazardError::FifoFull {
                        capacity: self.fifo.depth(),
                    }
                    .into());
                }
                let tile = bus.weights.read_tile(weight_addr, self.config.array_size)?;
                let ready_at = now
                    .saturating_add(latency)
                    .saturating_add(self.config.weight_fetch_latency);
                self.fifo.push(tile, ready_at)?;
                self.resources.occupy(Resource::WeightStore, ready_at);
                self.dispatch_events.push(TraceEvent::WeightFetch {
                    weight_addr,
                    ready_at,
                });
            }
            Instruction::MatrixMultiply { switch: true, .. } => {
                let tile = self.fifo.pop(now)?;
                self.array.load_staged(&tile)?;
                self.dispatch_events.push(TraceEvent::WeightSwitch);
            }
            Instruction::ReadHostMemory { .. } | Instruction::WriteHostMemory { .. } => {
                let width = bus.host.width();
                if width != self.config.array_size {
                    return Err(Fault::width(Memory::HostMemory, self.config.array_size, width));
                }
            }
            Instruction::Activate { function, .. } => self.activation.begin(function),
            Instruction::Sync => {
                let pending = self.resources.busy_until(Resource::WeightStore);
                latency = pending.saturating_sub(now).max(1);
            }
            _ => {}
        }

        for &resource in claims(&instr) {
            if resource != Resource::WeightStore {
                self.resources.occupy(resource, now.saturating_add(latency));
            }
        }
        Ok(latency)
    }

    fn execute_cycle(&mut self, bus: &mut ExternalBus<'_, D>) -> Result<(), Fault> {
        let Some(flight) = self.current.as_ref() else {
            return Ok(());
        };
        let (pc, instr, step) = (flight.pc, flight.instr, flight.step);
        let mut events = std::mem::take(&mut self.dispatch_events);

        match instr {
            Instruction::ReadHostMemory {
                host_addr,
                ub_addr,
                ..
            } => {
                let host_addr = host_addr + step;
                let ub_addr = ub_addr as usize + step as usize;
                for vector in bus.host.read(host_addr, 1)? {
                    self.ub.stage(ub_addr, vector)?;
                }
                events.push(TraceEvent::HostRead { host_addr, ub_addr });
            }
            Instruction::WriteHostMemory {
                ub_addr,
                host_addr,
                ..
            } => {
                let host_addr = host_addr + step;
                let ub_addr = ub_addr as usize + step as usize;
                let vector = self.ub.read(ub_addr)?.to_vec();
                bus.host.write(host_addr, &[vector])?;
                events.push(TraceEvent::HostWrite { ub_addr, host_addr });
            }
            Instruction::MatrixMultiply {
                ub_addr,
                acc_addr,
                len,
                switch,
                overwrite,
            } => {
                let input = if step < len as u64 {
                    let addr = ub_addr as usize + step as usize;
                    let tag = step as usize;
                    events.push(TraceEvent::ArrayFeed { ub_addr: addr, tag });
                    Some(ArrayInput {
                        values: self.ub.read(addr)?.to_vec(),
                        tag,
                        switch: switch && step == 0,
                    })
                } else {
                    None
                };
                if let Some(out) = self.array.step(input)? {
                    let addr = acc_addr as usize + out.tag;
                    let mode = if overwrite {
                        WriteMode::Overwrite
                    } else {
                        WriteMode::Accumulate
                    };
                    self.acc.write(addr, out.values, mode)?;
                    events.push(TraceEvent::AccumulatorWrite {
                        acc_addr: addr,
                        accumulate: !overwrite,
                    });
                }
            }
            Instruction::Activate {
                acc_addr,
                ub_addr,
                len,
                ..
            } => {
                let input = if step < len as u64 {
                    let addr = acc_addr as usize + step as usize;
                    events.push(TraceEvent::AccumulatorRead { acc_addr: addr });
                    Some((step as usize, self.acc.read(addr)?))
                } else {
                    None
                };
                if let Some(out) = self.activation.step(input) {
                    let addr = ub_addr as usize + out.tag;
                    self.ub.stage(addr, out.values)?;
                    events.push(TraceEvent::BufferWrite { ub_addr: addr });
                }
            }
            Instruction::Nop
            | Instruction::ReadWeights { .. }
            | Instruction::Sync
            | Instruction::Halt => {}
        }

        self.ub.commit();
        self.acc.commit();

        if self.config.trace {
            self.trace.push(CycleRecord {
                cycle: self.cycle,
                pc,
                opcode: instr.opcode(),
                step,
                events,
            });
        }
        if let Some(flight) = self.current.as_mut() {
            flight.step += 1;
        }
        Ok(())
    }

    fn retire(&mut self) {
        let Some(flight) = self.current.take() else {
            self.phase = Phase::Fetch;
            return;
        };
        log::trace!(
            "[{:>6}] pc {:>4}: retire {}",
            self.cycle,
            flight.pc,
            flight.instr.opcode()
        );
        self.retired.push(RetireRecord {
            pc: flight.pc,
            opcode: flight.instr.opcode(),
            dispatch_cycle: flight.dispatch_cycle,
            retire_cycle: self.cycle,
            latency: flight.latency,
        });

        if let Instruction::MatrixMultiply { .. } = flight.instr {
            debug_assert!(self.array.is_drained());
        }
        if flight.instr == Instruction::Halt {
            log::info!("Halted at pc {} after {} cycles", flight.pc, self.cycle);
            self.phase = Phase::Halted;
            return;
        }
        self.pc += 1;
        self.phase = Phase::Fetch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::datapath::{Quantized, Raw};
    use crate::error::Memory;
    use crate::host::VecHostMemory;
    use crate::isa::Opcode;
    use crate::weights::{TileStore, WeightTile};

    fn identity(size: usize) -> WeightTile<i8> {
        WeightTile::from_rows(
            (0..size)
                .map(|i| (0..size).map(|j| (i == j) as i8).collect())
                .collect(),
        )
        .unwrap()
    }

    fn bus<'a>(host: &'a mut VecHostMemory<i8>, store: &'a TileStore<i8>) -> ExternalBus<'a, Quantized> {
        ExternalBus::new(host, store)
    }

    fn build(config: TpuConfig, instructions: &[Instruction]) -> Tpu<Quantized> {
        Tpu::new(config, Program::from_instructions(instructions).unwrap()).unwrap()
    }

    fn small() -> TpuConfig {
        TpuConfig::new(2).with_capacities(16, 16)
    }

    #[test]
    fn test_mode_must_match_datapath() {
        let config = small().with_mode(crate::config::ExecMode::Raw);
        assert!(matches!(
            Tpu::<Quantized>::new(config.clone(), Program::default()),
            Err(TpuError::Config { .. })
        ));
        assert!(Tpu::<Raw>::new(config, Program::default()).is_ok());
    }

    #[test]
    fn test_cycle_count_is_sum_of_latencies() {
        let mut tpu = build(
            small(),
            &[
                Instruction::ReadHostMemory { host_addr: 0, ub_addr: 0, len: 3 },
                Instruction::Nop,
                Instruction::WriteHostMemory { ub_addr: 0, host_addr: 4, len: 3 },
                Instruction::Halt,
            ],
        );
        let mut host = VecHostMemory::<i8>::from_vectors(
            2,
            vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![0, 0], vec![0, 0], vec![0, 0], vec![0, 0]],
        )
        .unwrap();
        let store = TileStore::<i8>::new();
        let report = tpu.run(&mut bus(&mut host, &store)).unwrap();

        assert_eq!(report.cycles, 3 + 1 + 3 + 1);
        assert!(report.halted);
        assert_eq!(&host.vectors()[4..7], &[vec![1, 2], vec![3, 4], vec![5, 6]]);
        assert_eq!(report.retired[2].dispatch_cycle, 4);
        assert_eq!(report.retired[2].retire_cycle, 7);
    }

    #[test]
    fn test_end_of_program_halts_without_extra_cycle() {
        let mut tpu = build(small(), &[Instruction::Nop, Instruction::Nop]);
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let store = TileStore::<i8>::new();
        let mut bus = bus(&mut host, &store);
        assert!(tpu.advance(&mut bus).unwrap());
        assert!(tpu.advance(&mut bus).unwrap());
        assert!(!tpu.advance(&mut bus).unwrap());
        assert_eq!(tpu.cycle(), 2);
        assert!(tpu.is_halted());
        assert!(!tpu.advance(&mut bus).unwrap());
        assert_eq!(tpu.cycle(), 2);
    }

    #[test]
    fn test_weight_port_busy_until_tile_lands() {
        let mut tpu = build(
            small(),
            &[
                Instruction::ReadWeights { weight_addr: 0 },
                Instruction::ReadWeights { weight_addr: 0 },
            ],
        );
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let mut store = TileStore::<i8>::new();
        store.push(identity(2));
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        match err {
            TpuError::Fault { pc, cycle, fault } => {
                assert_eq!(pc, 1);
                assert_eq!(cycle, 1);
                assert_eq!(
                    fault,
                    Fault::Hazard(HazardError::ResourceBusy {
                        resource: Resource::WeightStore,
                        busy_until: 5,
                    })
                );
            }
            other => panic!("unexpected error {}", other),
        }
        assert!(tpu.is_halted());
        assert_eq!(tpu.report().fault.map(|f| f.pc), Some(1));
    }

    #[test]
    fn test_sync_waits_for_weight_fetch() {
        let mut tpu = build(
            small(),
            &[
                Instruction::ReadWeights { weight_addr: 0 },
                Instruction::Sync,
                Instruction::ReadWeights { weight_addr: 0 },
                Instruction::Sync,
                Instruction::Sync,
            ],
        );
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let mut store = TileStore::<i8>::new();
        store.push(identity(2));
        let report = tpu.run(&mut bus(&mut host, &store)).unwrap();
        let latencies: Vec<u64> = report.retired.iter().map(|r| r.latency).collect();
        // RW lands at 0 + 1 + 4; SYNC covers cycles 1..5
        assert_eq!(latencies, vec![1, 4, 1, 4, 1]);
        assert_eq!(tpu.weight_fifo().len(), 2);
    }

    #[test]
    fn test_fifo_full() {
        let config = small().with_fifo_depth(1).with_weight_timing(64, 0);
        let mut tpu = build(
            config,
            &[
                Instruction::ReadWeights { weight_addr: 0 },
                Instruction::ReadWeights { weight_addr: 0 },
            ],
        );
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let mut store = TileStore::<i8>::new();
        store.push(identity(2));
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        assert_eq!(
            err.as_fault(),
            Some(&Fault::Hazard(HazardError::FifoFull { capacity: 1 }))
        );
    }

    #[test]
    fn test_longest_fetch_latency_still_guards_switch() {
        let config = small().with_weight_timing(64, crate::config::MAX_WEIGHT_FETCH_LATENCY);
        let mut tpu = build(
            config,
            &[
                Instruction::ReadWeights { weight_addr: 0 },
                Instruction::MatrixMultiply { ub_addr: 0, acc_addr: 0, len: 1, switch: true, overwrite: true },
            ],
        );
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let mut store = TileStore::<i8>::new();
        store.push(identity(2));
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        assert_eq!(
            err.as_fault(),
            Some(&Fault::Hazard(HazardError::TileNotReady {
                ready_at: 1 + crate::config::MAX_WEIGHT_FETCH_LATENCY
            }))
        );
        assert!(matches!(
            Tpu::<Quantized>::new(small().with_weight_timing(64, u64::MAX), Program::default()),
            Err(TpuError::Config { .. })
        ));
    }

    #[test]
    fn test_host_width_must_match_array() {
        let mut tpu = build(
            small(),
            &[Instruction::ReadHostMemory { host_addr: 0, ub_addr: 0, len: 1 }],
        );
        let mut host = VecHostMemory::<i8>::new(1, 3);
        let store = TileStore::<i8>::new();
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        assert!(matches!(
            err,
            TpuError::Fault {
                pc: 0,
                cycle: 0,
                fault: Fault::WidthMismatch { memory: Memory::HostMemory, expected: 2, got: 3 },
            }
        ));
        assert!(host.vectors().iter().all(|v| v == &[0, 0, 0]));
    }

    #[test]
    fn test_switch_with_empty_fifo() {
        let mut tpu = build(
            small(),
            &[Instruction::MatrixMultiply { ub_addr: 0, acc_addr: 0, len: 1, switch: true, overwrite: true }],
        );
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let store = TileStore::<i8>::new();
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        assert_eq!(err.as_fault(), Some(&Fault::Hazard(HazardError::FifoEmpty)));
    }

    #[test]
    fn test_weight_address_out_of_range() {
        let mut tpu = build(
            small(),
            &[Instruction::Nop, Instruction::ReadWeights { weight_addr: 9 }],
        );
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let store = TileStore::<i8>::new();
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        assert!(matches!(
            err,
            TpuError::Fault {
                pc: 1,
                cycle: 1,
                fault: Fault::OutOfRange { memory: Memory::WeightStore, address: 9, .. },
            }
        ));
    }

    #[test]
    fn test_decode_error_faults_with_position() {
        let mut words = Program::from_instructions(&[Instruction::Nop]).unwrap().words().to_vec();
        let mut bad = [0u8; crate::isa::INSTRUCTION_BYTES];
        bad[0] = 0x77;
        words.push(InstructionWord(bad));
        let mut tpu = Tpu::<Quantized>::new(small(), Program::new(words)).unwrap();
        let mut host = VecHostMemory::<i8>::new(1, 2);
        let store = TileStore::<i8>::new();
        let err = tpu.run(&mut bus(&mut host, &store)).unwrap_err();
        assert_eq!(err.to_string(), "instruction 1 faulted at cycle 1: decode error: unrecognized opcode 0x77");
    }

    #[test]
    fn test_matmul_then_activate() {
        let config = small().with_trace(true);
        let mut tpu = build(
            config,
            &[
                Instruction::ReadWeights { weight_addr: 0 },
                Instruction::ReadHostMemory { host_addr: 0, ub_addr: 0, len: 2 },
                Instruction::Nop,
                Instruction::Nop,
                Instruction::MatrixMultiply { ub_addr: 0, acc_addr: 0, len: 2, switch: true, overwrite: true },
                Instruction::Activate { acc_addr: 0, ub_addr: 4, len: 2, function: Activation::Relu },
                Instruction::WriteHostMemory { ub_addr: 4, host_addr: 2, len: 2 },
                Instruction::Halt,
            ],
        );
        let mut host = VecHostMemory::<i8>::from_vectors(
            2,
            vec![vec![3, -4], vec![100, 100], vec![0, 0], vec![0, 0]],
        )
        .unwrap();
        let mut store = TileStore::<i8>::new();
        // Swap lanes and negate the second output
        store.push(WeightTile::from_rows(vec![vec![0, -1], vec![1, 0]]).unwrap());
        let report = tpu.run(&mut bus(&mut host, &store)).unwrap();

        // x·W = [x1, -x0]
        assert_eq!(tpu.accumulator().read_range(0, 2).unwrap(), vec![vec![-4, -3], vec![100, -100]]);
        assert_eq!(&host.vectors()[2..4], &[vec![0, 0], vec![100, 0]]);
        assert_eq!(report.cycles, 1 + 2 + 2 + 6 + 3 + 2 + 1);
        assert_eq!(report.trace.len() as u64, report.cycles);
        assert_eq!(report.count(Opcode::Nop), 2);
        assert!(report.trace[0].events.contains(&TraceEvent::WeightFetch { weight_addr: 0, ready_at: 5 }));
    }
}
