//! Element types and arithmetic for one execution mode
//!
//! The quantized datapath is the design target: 8-bit activations and
//! weights, 32-bit accumulators, saturating arithmetic from [`crate::arith`].
//! The raw datapath runs the same schedule on `f32` values and exists for
//! diagnostics only.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::activation::{Activation, SigmoidTable};
use crate::arith;
use crate::config::ExecMode;

/// Lane type bound shared by every element type
pub trait Lane: Copy + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Lane for T where T: Copy + Default + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Binds the element types of an execution mode to their arithmetic
pub trait Datapath: Copy + Debug + Default + PartialEq + Send + Sync + 'static {
    /// Unified-buffer and host-memory lane
    type Elem: Lane;
    /// Weight-tile entry
    type Weight: Lane;
    /// Accumulator lane
    type Acc: Lane;

    const MODE: ExecMode;

    /// Size of one weight in the weight store, used for transfer latency
    const WEIGHT_BYTES: usize;

    /// `psum + x * w` at accumulator precision
    fn mac(psum: Self::Acc, x: Self::Elem, w: Self::Weight) -> Self::Acc;

    /// Combine a stored accumulator lane with a new partial sum
    fn accumulate(stored: Self::Acc, incoming: Self::Acc) -> Self::Acc;

    /// Narrow an accumulator lane back to buffer precision
    fn activate(function: Activation, value: Self::Acc, sigmoid: &SigmoidTable) -> Self::Elem;
}

/// int8 × int8 → int32 datapath
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quantized;

impl Datapath for Quantized {
    type Elem = i8;
    type Weight = i8;
    type Acc = i32;

    const MODE: ExecMode = ExecMode::Quantized;
    const WEIGHT_BYTES: usize = 1;

    fn mac(psum: i32, x: i8, w: i8) -> i32 {
        arith::mac_i8(psum, x, w)
    }

    fn accumulate(stored: i32, incoming: i32) -> i32 {
        arith::sat_add_i32(stored, incoming)
    }

    fn activate(function: Activation, value: i32, sigmoid: &SigmoidTable) -> i8 {
        match function {
            Activation::Identity => arith::sat_narrow_i32_to_i8(value),
            Activation::Relu => arith::sat_narrow_i32_to_i8(value.max(0)),
            Activation::Sigmoid => sigmoid.lookup(value),
        }
    }
}

/// f32 diagnostic datapath
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Raw;

impl Datapath for Raw {
    type Elem = f32;
    type Weight = f32;
    type Acc = f32;

    const MODE: ExecMode = ExecMode::Raw;
    const WEIGHT_BYTES: usize = 4;

    fn mac(psum: f32, x: f32, w: f32) -> f32 {
        psum + x * w
    }

    fn accumulate(stored: f32, incoming: f32) -> f32 {
        stored + incoming
    }

    fn activate(function: Activation, value: f32, _sigmoid: &SigmoidTable) -> f32 {
        match function {
            Activation::Identity => value,
            Activation::Relu => value.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-value).exp()),
        }
    }
}
