//! Systolic array with input skew and output de-skew
//!
//! ```text
//!   x0 ──────────────▶ MAC(0,0) ─▶ MAC(0,1) ─▶ ...
//!   x1 ─[1]──────────▶ MAC(1,0) ─▶ MAC(1,1) ─▶ ...
//!   x2 ─[2]──────────▶ MAC(2,0) ─▶ ...
//!                          │           │
//!                        [S-1]       [S-2]   ...  de-skew
//!                          └─────┬─────┘
//!                           write-back ─▶ accumulator
//! ```
//!
//! Element `i` of a vector is delayed `i` cycles so that the partial sum
//! moving down column `j` meets `x_i` at row `i`. The bottom of column `j`
//! is delayed another `S-1-j` cycles so every lane of a vector leaves at
//! once. A vector fed at pass step `v` is emitted at step `v + 2S`.
//!
//! The grid is double-buffered: every cell's next state is computed from
//! the previous cycle's snapshot and the two buffers are swapped.

use std::collections::VecDeque;

use crate::datapath::Datapath;
use crate::error::{Fault, HazardError, Memory};
use crate::mac::{MacUnit, Psum, RowToken};
use crate::weights::WeightTile;

/// One vector entering the array
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInput<E> {
    pub values: Vec<E>,
    pub tag: usize,
    /// Promote the staged weights along this vector's wavefront
    pub switch: bool,
}

/// One aligned result vector leaving the write-back register
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayOutput<A> {
    pub tag: usize,
    pub values: Vec<A>,
}

/// `S x S` grid of MAC cells
#[derive(Debug, Clone)]
pub struct SystolicArray<D: Datapath> {
    size: usize,
    /// Row-major, `i * size + j`
    cells: Vec<MacUnit<D>>,
    shadow: Vec<MacUnit<D>>,
    skew: Vec<VecDeque<Option<RowToken<D::Elem>>>>,
    deskew: Vec<VecDeque<Option<Psum<D::Acc>>>>,
    writeback: Option<ArrayOutput<D::Acc>>,
}

impl<D: Datapath> SystolicArray<D> {
    pub fn new(size: usize) -> Self {
        let skew = (0..size).map(|i| VecDeque::from(vec![None; i])).collect();
        let deskew = (0..size)
            .map(|j| VecDeque::from(vec![None; size - 1 - j]))
            .collect();
        Self {
            size,
            cells: vec![MacUnit::new(); size * size],
            shadow: vec![MacUnit::new(); size * size],
            skew,
            deskew,
            writeback: None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cell(&self, row: usize, col: usize) -> &MacUnit<D> {
        &self.cells[row * self.size + col]
    }

    /// A staged tile is still waiting for its switch wavefront
    pub fn switch_in_flight(&self) -> bool {
        self.cells.iter().any(|c| c.pending_switch)
    }

    /// Copy a tile into every cell's staged register
    pub fn load_staged(&mut self, tile: &WeightTile<D::Weight>) -> Result<(), Fault> {
        if tile.size() != self.size {
            return Err(Fault::width(Memory::WeightStore, self.size, tile.size()));
        }
        if self.switch_in_flight() {
            return Err(HazardError::SwitchInFlight.into());
        }
        for (idx, cell) in self.cells.iter_mut().enumerate() {
            cell.stage(tile.get(idx / self.size, idx % self.size));
        }
        Ok(())
    }

    /// Advance the array by one cycle
    pub fn step(
        &mut self,
        input: Option<ArrayInput<D::Elem>>,
    ) -> Result<Option<ArrayOutput<D::Acc>>, Fault> {
        let s = self.size;
        if let Some(inp) = &input {
            if inp.values.len() != s {
                return Err(Fault::width(Memory::UnifiedBuffer, s, inp.values.len()));
            }
        }

        // Skew registers feed column 0
        let mut entering = Vec::with_capacity(s);
        for (i, line) in self.skew.iter_mut().enumerate() {
            let token = input.as_ref().map(|inp| RowToken {
                value: inp.values[i],
                tag: inp.tag,
                switch: inp.switch,
            });
            line.push_back(token);
            entering.push(line.pop_front().flatten());
        }

        // Bottom row of the old snapshot enters the de-skew registers
        let mut aligned = Vec::with_capacity(s);
        for (j, line) in self.deskew.iter_mut().enumerate() {
            line.push_back(self.cells[(s - 1) * s + j].psum);
            aligned.push(line.pop_front().flatten());
        }

        for idx in 0..s * s {
            let (i, j) = (idx / s, idx % s);
            let token = if j == 0 { entering[i] } else { self.cells[idx - 1].input };
            let psum_in = if i == 0 { None } else { self.cells[idx - s].psum };
            self.shadow[idx] = self.cells[idx].cycle(token, psum_in);
        }
        std::mem::swap(&mut self.cells, &mut self.shadow);

        let emitted = self.writeback.take();
        self.writeback = aligned
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .map(|lanes| {
                debug_assert!(lanes.iter().all(|p| p.tag == lanes[0].tag));
                ArrayOutput {
                    tag: lanes[0].tag,
                    values: lanes.into_iter().map(|p| p.value).collect(),
                }
            });
        Ok(emitted)
    }

    /// No vector is anywhere in the pipeline
    pub fn is_drained(&self) -> bool {
        self.cells.iter().all(MacUnit::is_empty)
            && self.skew.iter().flatten().all(Option::is_none)
            && self.deskew.iter().flatten().all(Option::is_none)
            && self.writeback.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::{Quantized, Raw};

    fn tile(rows: Vec<Vec<i8>>) -> WeightTile<i8> {
        WeightTile::from_rows(rows).unwrap()
    }

    fn x_times_w(x: &[i8], w: &WeightTile<i8>) -> Vec<i32> {
        (0..w.size())
            .map(|j| (0..w.size()).map(|i| x[i] as i32 * w.get(i, j) as i32).sum())
            .collect()
    }

    /// Feed `vectors` as one pass and collect `(step, output)` pairs
    fn run_pass(
        array: &mut SystolicArray<Quantized>,
        vectors: &[Vec<i8>],
        switch: bool,
    ) -> Vec<(usize, ArrayOutput<i32>)> {
        let steps = vectors.len() + 2 * array.size();
        let mut out = Vec::new();
        for step in 0..steps {
            let input = vectors.get(step).map(|v| ArrayInput {
                values: v.clone(),
                tag: step,
                switch: switch && step == 0,
            });
            if let Some(o) = array.step(input).unwrap() {
                out.push((step, o));
            }
        }
        out
    }

    #[test]
    fn test_exact_product_and_timing() {
        let w = tile(vec![
            vec![1, -2, 3, 0],
            vec![4, 5, -6, 7],
            vec![-8, 9, 10, -11],
            vec![12, -13, 14, 15],
        ]);
        let mut array = SystolicArray::<Quantized>::new(4);
        array.load_staged(&w).unwrap();

        let vectors = vec![
            vec![1, 2, 3, 4],
            vec![-1, 0, 5, -7],
            vec![127, -128, 127, -128],
        ];
        let out = run_pass(&mut array, &vectors, true);

        assert_eq!(out.len(), 3);
        for (v, (step, o)) in out.iter().enumerate() {
            assert_eq!(*step, v + 8, "vector {} emitted at step {}", v, step);
            assert_eq!(o.tag, v);
            assert_eq!(o.values, x_times_w(&vectors[v], &w));
        }
        assert!(array.is_drained());
        assert!(!array.switch_in_flight());
    }

    #[test]
    fn test_single_cell_array() {
        let mut array = SystolicArray::<Quantized>::new(1);
        array.load_staged(&tile(vec![vec![-3]])).unwrap();
        let out = run_pass(&mut array, &[vec![5], vec![6]], true);
        assert_eq!(out[0], (2, ArrayOutput { tag: 0, values: vec![-15] }));
        assert_eq!(out[1], (3, ArrayOutput { tag: 1, values: vec![-18] }));
    }

    #[test]
    fn test_switch_mid_flight_keeps_old_results() {
        let a = tile(vec![vec![1, 0, 0], vec![0, 1, 0], vec![0, 0, 1]]);
        let b = tile(vec![vec![2, 0, 0], vec![0, 2, 0], vec![0, 0, 2]]);
        let mut array = SystolicArray::<Quantized>::new(3);

        array.load_staged(&a).unwrap();
        assert_eq!(array.cell(1, 1).staged, 1);
        assert_eq!(array.cell(1, 1).active, 0);
        let x = vec![3, 4, 5];
        let mut outputs = Vec::new();

        // Pass A: two vectors, switching to A on the first
        for step in 0..2 {
            let input = ArrayInput { values: x.clone(), tag: step, switch: step == 0 };
            outputs.extend(array.step(Some(input)).unwrap());
        }
        // Staging B while A's wavefront has not reached the last cell
        assert_eq!(
            array.load_staged(&b),
            Err(Fault::Hazard(HazardError::SwitchInFlight))
        );
        // Let the A wavefront pass the bottom-right cell (step 2S-2 = 4)
        for _ in 2..5 {
            outputs.extend(array.step(None).unwrap());
        }
        assert!(!array.switch_in_flight());
        assert_eq!(array.cell(2, 2).active, 1);
        array.load_staged(&b).unwrap();

        // Pass B starts while pass A is still draining
        let input = ArrayInput { values: x.clone(), tag: 2, switch: true };
        outputs.extend(array.step(Some(input)).unwrap());
        while !array.is_drained() {
            outputs.extend(array.step(None).unwrap());
        }

        assert_eq!(array.cell(2, 2).active, 2);
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].values, vec![3, 4, 5]);
        assert_eq!(outputs[1].values, vec![3, 4, 5]);
        assert_eq!(outputs[2], ArrayOutput { tag: 2, values: vec![6, 8, 10] });
    }

    #[test]
    fn test_pass_without_switch_reuses_active_weights() {
        let w = tile(vec![vec![1, 2], vec![3, 4]]);
        let mut array = SystolicArray::<Quantized>::new(2);
        array.load_staged(&w).unwrap();
        let first = run_pass(&mut array, &[vec![1, 1]], true);
        let second = run_pass(&mut array, &[vec![1, 1]], false);
        assert_eq!(first[0].1.values, vec![4, 6]);
        assert_eq!(second[0].1.values, vec![4, 6]);
    }

    #[test]
    fn test_width_mismatch_is_a_fault() {
        let mut array = SystolicArray::<Quantized>::new(2);
        let err = array
            .step(Some(ArrayInput { values: vec![1, 2, 3], tag: 0, switch: false }))
            .unwrap_err();
        assert_eq!(err, Fault::width(Memory::UnifiedBuffer, 2, 3));
        assert!(array.load_staged(&tile(vec![vec![1]])).is_err());
    }

    #[test]
    fn test_raw_array_product() {
        let w = WeightTile::from_rows(vec![vec![0.5f32, 1.0], vec![-1.0, 2.0]]).unwrap();
        let mut array = SystolicArray::<Raw>::new(2);
        array.load_staged(&w).unwrap();
        let mut out = None;
        for step in 0..5 {
            let input = (step == 0).then(|| ArrayInput { values: vec![2.0, 3.0], tag: 0, switch: true });
            if let Some(o) = array.step(input).unwrap() {
                out = Some((step, o));
            }
        }
        let (step, o) = out.unwrap();
        assert_eq!(step, 4);
        assert_eq!(o.values, vec![-2.0, 8.0]);
    }
}
