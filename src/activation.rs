//! Activation unit
//!
//! Converts accumulator vectors back to unified-buffer precision through an
//! elementwise nonlinearity. The unit has one pipeline register, so `L`
//! vectors take `L + 1` cycles.
//!
//! # Quantized sigmoid
//!
//! The accumulator lane is read as a Q.4 fixed-point number (`v / 16`) and
//! clamped to the table range `[-128, 127]`, i.e. real inputs `[-8, 7.9375]`.
//! The output is `round(127 * sigmoid(v / 16))` stored as `i8`, so `127`
//! represents `1.0`. Inside the table range the only error is output rounding
//! (at most `0.5 / 127`); outside it the true sigmoid is within `3.4e-4` of the
//! saturated endpoint. [`SIGMOID_MAX_ERROR`] bounds both.

use serde::{Deserialize, Serialize};

use crate::datapath::Datapath;

/// Fractional bits of the sigmoid input
pub const SIGMOID_INPUT_FRAC_BITS: u32 = 4;

/// Output value representing 1.0
pub const SIGMOID_OUTPUT_SCALE: f64 = 127.0;

/// Upper bound on `|lookup(v) / 127 - sigmoid(v / 16)|` over all `i32` inputs
pub const SIGMOID_MAX_ERROR: f64 = 0.004;

const TABLE_MIN: i32 = -128;
const TABLE_MAX: i32 = 127;

/// Elementwise function applied by an ACT instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Identity,
    Relu,
    Sigmoid,
}

impl Activation {
    /// Decode the two-bit selector from the instruction flags
    pub fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0 => Some(Activation::Identity),
            1 => Some(Activation::Relu),
            2 => Some(Activation::Sigmoid),
            _ => None,
        }
    }

    pub fn selector(self) -> u8 {
        match self {
            Activation::Identity => 0,
            Activation::Relu => 1,
            Activation::Sigmoid => 2,
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::Identity => write!(f, "identity"),
            Activation::Relu => write!(f, "relu"),
            Activation::Sigmoid => write!(f, "sigmoid"),
        }
    }
}

/// Reference sigmoid at the quantized input scale
pub fn sigmoid_reference(value: i32) -> f64 {
    let x = value as f64 / (1u32 << SIGMOID_INPUT_FRAC_BITS) as f64;
    1.0 / (1.0 + (-x).exp())
}

/// 256-entry sigmoid lookup table for the quantized datapath
#[derive(Debug, Clone)]
pub struct SigmoidTable {
    entries: Vec<i8>,
}

impl SigmoidTable {
    pub fn new() -> Self {
        let entries = (TABLE_MIN..=TABLE_MAX)
            .map(|v| (sigmoid_reference(v) * SIGMOID_OUTPUT_SCALE).round() as i8)
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, value: i32) -> i8 {
        let index = value.clamp(TABLE_MIN, TABLE_MAX) - TABLE_MIN;
        self.entries[index as usize]
    }
}

impl Default for SigmoidTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One accumulator vector on its way through the unit
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationOutput<E> {
    /// Position of the vector within the instruction
    pub tag: usize,
    pub values: Vec<E>,
}

/// Pipelined activation unit
#[derive(Debug, Clone)]
pub struct ActivationUnit<D: Datapath> {
    function: Activation,
    sigmoid: SigmoidTable,
    register: Option<ActivationOutput<D::Elem>>,
}

impl<D: Datapath> ActivationUnit<D> {
    pub fn new() -> Self {
        Self {
            function: Activation::Identity,
            sigmoid: SigmoidTable::new(),
            register: None,
        }
    }

    /// Select the function for the next instruction
    pub fn begin(&mut self, function: Activation) {
        self.function = function;
        self.register = None;
    }

    /// Transform one vector without touching the pipeline
    pub fn apply(&self, values: &[D::Acc]) -> Vec<D::Elem> {
        values
            .iter()
            .map(|&v| D::activate(self.function, v, &self.sigmoid))
            .collect()
    }

    /// Advance one cycle: emit the registered result, latch the new input
    pub fn step(&mut self, input: Option<(usize, &[D::Acc])>) -> Option<ActivationOutput<D::Elem>> {
        let next = input.map(|(tag, values)| ActivationOutput {
            tag,
            values: self.apply(values),
        });
        std::mem::replace(&mut self.register, next)
    }

    pub fn is_idle(&self) -> bool {
        self.register.is_none()
    }
}

impl<D: Datapath> Default for ActivationUnit<D> {
    fn default() -> Self {
        Self::new()
    }
}
