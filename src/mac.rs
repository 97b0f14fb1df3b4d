//! Multiply-accumulate cell
//!
//! Each cell holds two weight registers. `active` feeds the multiplier;
//! `staged` is filled from the weight FIFO and promoted when a switching
//! input token reaches the cell, so a new tile takes effect along the same
//! diagonal wavefront as the data that needs it.

use crate::datapath::Datapath;

/// Activation element travelling right along a row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowToken<E> {
    pub value: E,
    /// Position of the owning vector within its pass
    pub tag: usize,
    /// First vector of a pass that switched weights
    pub switch: bool,
}

/// Partial sum travelling down a column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Psum<A> {
    pub value: A,
    pub tag: usize,
}

/// One cell of the systolic grid
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MacUnit<D: Datapath> {
    pub active: D::Weight,
    pub staged: D::Weight,
    /// `staged` holds a tile that has not been promoted yet
    pub pending_switch: bool,
    /// Input token latched this cycle, passed to the right neighbour next cycle
    pub input: Option<RowToken<D::Elem>>,
    /// Partial sum latched this cycle, passed to the cell below next cycle
    pub psum: Option<Psum<D::Acc>>,
}

impl<D: Datapath> MacUnit<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the staged weight register
    pub fn stage(&mut self, weight: D::Weight) {
        self.staged = weight;
        self.pending_switch = true;
    }

    /// Next state from this state and the cycle's inputs
    ///
    /// `psum_in` is `None` for the top row, which starts from zero.
    pub fn cycle(&self, input: Option<RowToken<D::Elem>>, psum_in: Option<Psum<D::Acc>>) -> Self {
        let mut next = *self;

        let token = match input {
            Some(token) => token,
            None => {
                next.input = None;
                next.psum = None;
                return next;
            }
        };

        if token.switch {
            next.active = next.staged;
            next.pending_switch = false;
        }

        let base = psum_in.map(|p| p.value).unwrap_or_default();
        next.input = Some(token);
        next.psum = Some(Psum {
            value: D::mac(base, token.value, next.active),
            tag: token.tag,
        });
        next
    }

    /// No token or partial sum is held
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.psum.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::{Quantized, Raw};

    fn token(value: i8, switch: bool) -> Option<RowToken<i8>> {
        Some(RowToken { value, tag: 0, switch })
    }

    #[test]
    fn test_cycle_accumulates_from_above() {
        let mut mac = MacUnit::<Quantized>::new();
        mac.active = 3;
        let next = mac.cycle(token(-4, false), Some(Psum { value: 100, tag: 0 }));
        assert_eq!(next.psum, Some(Psum { value: 88, tag: 0 }));
        assert_eq!(next.input, token(-4, false));
        // Pure: the original is untouched
        assert!(mac.is_empty());
    }

    #[test]
    fn test_top_row_starts_from_zero() {
        let mut mac = MacUnit::<Quantized>::new();
        mac.active = -128;
        let next = mac.cycle(token(-128, false), None);
        assert_eq!(next.psum.map(|p| p.value), Some(16384));
    }

    #[test]
    fn test_switch_promotes_before_multiply() {
        let mut mac = MacUnit::<Quantized>::new();
        mac.active = 1;
        mac.stage(5);
        assert!(mac.pending_switch);

        let same = mac.cycle(token(2, false), None);
        assert_eq!(same.psum.map(|p| p.value), Some(2));
        assert!(same.pending_switch);

        let switched = same.cycle(token(2, true), None);
        assert_eq!(switched.psum.map(|p| p.value), Some(10));
        assert_eq!(switched.active, 5);
        assert!(!switched.pending_switch);
    }

    #[test]
    fn test_bubble_clears_registers() {
        let mut mac = MacUnit::<Quantized>::new();
        mac.active = 7;
        let busy = mac.cycle(token(1, false), None);
        let idle = busy.cycle(None, busy.psum);
        assert!(idle.is_empty());
        assert_eq!(idle.active, 7);
    }

    #[test]
    fn test_accumulator_saturates() {
        let mut mac = MacUnit::<Quantized>::new();
        mac.active = 127;
        let next = mac.cycle(token(127, false), Some(Psum { value: i32::MAX, tag: 0 }));
        assert_eq!(next.psum.map(|p| p.value), Some(i32::MAX));
    }

    #[test]
    fn test_raw_cell() {
        let mut mac = MacUnit::<Raw>::new();
        mac.stage(0.5);
        let next = mac.cycle(
            Some(RowToken { value: 3.0, tag: 2, switch: true }),
            Some(Psum { value: 1.0, tag: 2 }),
        );
        assert_eq!(next.psum, Some(Psum { value: 2.5, tag: 2 }));
    }
}
