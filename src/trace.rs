//! Execution records
//!
//! Retire records are always kept. Per-cycle records are only gathered when
//! tracing is enabled in the configuration.

use serde::Serialize;

use crate::isa::Opcode;

/// One instruction from dispatch to retire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetireRecord {
    pub pc: usize,
    pub opcode: Opcode,
    pub dispatch_cycle: u64,
    /// First cycle after the instruction's last executing cycle
    pub retire_cycle: u64,
    pub latency: u64,
}

/// Datapath activity within one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    HostRead { host_addr: u64, ub_addr: usize },
    HostWrite { ub_addr: usize, host_addr: u64 },
    WeightFetch { weight_addr: u64, ready_at: u64 },
    WeightSwitch,
    ArrayFeed { ub_addr: usize, tag: usize },
    AccumulatorWrite { acc_addr: usize, accumulate: bool },
    AccumulatorRead { acc_addr: usize },
    BufferWrite { ub_addr: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub pc: usize,
    pub opcode: Opcode,
    /// Cycle index within the instruction
    pub step: u64,
    pub events: Vec<TraceEvent>,
}

/// Where a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultRecord {
    pub pc: usize,
    pub cycle: u64,
    pub message: String,
}

/// Summary of a run, complete or interrupted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub cycles: u64,
    pub halted: bool,
    pub retired: Vec<RetireRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<CycleRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultRecord>,
}

impl RunReport {
    /// Retired instructions of one opcode
    pub fn count(&self, opcode: Opcode) -> usize {
        self.retired.iter().filter(|r| r.opcode == opcode).count()
    }

    /// Sum of retired latencies, excluding NOP padding
    pub fn busy_cycles(&self) -> u64 {
        self.retired
            .iter()
            .filter(|r| r.opcode != Opcode::Nop)
            .map(|r| r.latency)
            .sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
