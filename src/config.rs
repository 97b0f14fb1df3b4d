//! Core configuration
//!
//! Supplied once when the core is built and immutable afterwards. Can be
//! loaded from a TOML file; missing keys fall back to the defaults below.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TpuError, TpuResult};

/// Default systolic array dimension
pub const DEFAULT_ARRAY_SIZE: usize = 8;
/// Default unified-buffer capacity in vectors (96 Ki)
pub const DEFAULT_UB_CAPACITY: usize = 96 * 1024;
/// Default accumulator capacity in vectors (4 Ki)
pub const DEFAULT_ACC_CAPACITY: usize = 4 * 1024;
pub const DEFAULT_FIFO_DEPTH: usize = 4;
/// Bytes the weight store delivers per cycle
pub const DEFAULT_WEIGHT_TRANSFER_BYTES: usize = 64;
/// Cycles between the end of a weight transfer and the tile landing in the FIFO
pub const DEFAULT_WEIGHT_FETCH_LATENCY: u64 = 4;

/// Largest unified-buffer capacity addressable by the 24-bit field
pub const MAX_UB_CAPACITY: usize = 1 << 24;
pub const MAX_ARRAY_SIZE: usize = 256;
/// Upper bound on `capacity * array_size` lanes for each on-chip buffer
pub const MAX_MEMORY_LANES: usize = 1 << 28;
pub const MAX_WEIGHT_FETCH_LATENCY: u64 = u32::MAX as u64;

/// Numeric execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// int8 activations and weights, int32 accumulators
    #[default]
    Quantized,
    /// f32 everywhere (diagnostic)
    Raw,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Quantized => write!(f, "quantized"),
            ExecMode::Raw => write!(f, "raw"),
        }
    }
}

/// Configuration for the simulated core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpuConfig {
    /// Size of the SxS systolic array
    pub array_size: usize,
    /// Unified buffer capacity in vectors
    pub ub_capacity: usize,
    /// Accumulator capacity in vectors
    pub acc_capacity: usize,
    /// Weight FIFO depth in tiles
    pub fifo_depth: usize,
    pub mode: ExecMode,
    pub weight_transfer_bytes: usize,
    pub weight_fetch_latency: u64,
    /// Record a per-cycle trace
    pub trace: bool,
}

impl TpuConfig {
    pub fn new(array_size: usize) -> Self {
        Self {
            array_size,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_capacities(mut self, ub_capacity: usize, acc_capacity: usize) -> Self {
        self.ub_capacity = ub_capacity;
        self.acc_capacity = acc_capacity;
        self
    }

    pub fn with_fifo_depth(mut self, depth: usize) -> Self {
        self.fifo_depth = depth;
        self
    }

    pub fn with_weight_timing(mut self, transfer_bytes: usize, fetch_latency: u64) -> Self {
        self.weight_transfer_bytes = transfer_bytes;
        self.weight_fetch_latency = fetch_latency;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> TpuResult<Self> {
        let config: TpuConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> TpuResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> TpuResult<()> {
        if self.array_size == 0 || self.array_size > MAX_ARRAY_SIZE {
            return Err(TpuError::config(format!(
                "array_size must be in 1..={}, got {}",
                MAX_ARRAY_SIZE, self.array_size
            )));
        }
        if self.ub_capacity == 0 || self.ub_capacity > MAX_UB_CAPACITY {
            return Err(TpuError::config(format!(
                "ub_capacity must be in 1..={}, got {}",
                MAX_UB_CAPACITY, self.ub_capacity
            )));
        }
        if self.acc_capacity == 0 || self.acc_capacity > u32::MAX as usize {
            return Err(TpuError::config(format!(
                "acc_capacity must be in 1..={}, got {}",
                u32::MAX,
                self.acc_capacity
            )));
        }
        let buffers = [("ub_capacity", self.ub_capacity), ("acc_capacity", self.acc_capacity)];
        for (name, capacity) in buffers {
            // Buffers are allocated up front
            if capacity.saturating_mul(self.array_size) > MAX_MEMORY_LANES {
                return Err(TpuError::config(format!(
                    "{} of {} vectors x {} lanes exceeds {} lanes",
                    name, capacity, self.array_size, MAX_MEMORY_LANES
                )));
            }
        }
        if self.fifo_depth == 0 {
            return Err(TpuError::config("fifo_depth must be at least 1"));
        }
        if self.weight_transfer_bytes == 0 {
            return Err(TpuError::config("weight_transfer_bytes must be at least 1"));
        }
        if self.weight_fetch_latency > MAX_WEIGHT_FETCH_LATENCY {
            return Err(TpuError::config(format!(
                "weight_fetch_latency must be at most {}, got {}",
                MAX_WEIGHT_FETCH_LATENCY, self.weight_fetch_latency
            )));
        }
        Ok(())
    }

    /// Cycles an RW instruction occupies the weight-store port for transfer
    pub fn weight_transfer_cycles(&self, weight_bytes: usize) -> u64 {
        let tile_bytes = self.array_size * self.array_size * weight_bytes;
        tile_bytes.div_ceil(self.weight_transfer_bytes) as u64
    }

    /// Cycles a matrix multiply over `len` vectors takes
    pub fn matmul_cycles(&self, len: usize) -> u64 {
        (len + 2 * self.array_size) as u64
    }
}

impl Default for TpuConfig {
    fn default() -> Self {
        Self {
            array_size: DEFAULT_ARRAY_SIZE,
            ub_capacity: DEFAULT_UB_CAPACITY,
            acc_capacity: DEFAULT_ACC_CAPACITY,
            fifo_depth: DEFAULT_FIFO_DEPTH,
            mode: ExecMode::Quantized,
            weight_transfer_bytes: DEFAULT_WEIGHT_TRANSFER_BYTES,
            weight_fetch_latency: DEFAULT_WEIGHT_FETCH_LATENCY,
            trace: false,
        }
    }
}
