//! On-chip vector memories
//!
//! Reads observe the state committed at the end of the previous cycle.
//! Writes are staged and become visible only after [`VectorMemory::commit`],
//! which the scheduler calls once per cycle.

use crate::datapath::Datapath;
use crate::error::{Fault, Memory};

/// How a matrix-multiply result lands in the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    /// Element-wise saturating add onto the stored vector
    Accumulate,
}

/// Fixed-capacity array of width-`S` vectors
#[derive(Debug, Clone)]
pub struct VectorMemory<T> {
    kind: Memory,
    width: usize,
    capacity: usize,
    data: Vec<T>,
    pending: Vec<(usize, Vec<T>)>,
}

impl<T: Copy + Default> VectorMemory<T> {
    pub fn new(kind: Memory, capacity: usize, width: usize) -> Self {
        Self {
            kind,
            width,
            capacity,
            data: vec![T::default(); capacity * width],
            pending: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn check(&self, addr: usize, count: usize) -> Result<(), Fault> {
        match addr.checked_add(count) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(Fault::out_of_range(self.kind, addr as u64, count, self.capacity)),
        }
    }

    /// Committed vector at `addr`
    pub fn read(&self, addr: usize) -> Result<&[T], Fault> {
        self.check(addr, 1)?;
        Ok(&self.data[addr * self.width..(addr + 1) * self.width])
    }

    /// Copy of `count` committed vectors starting at `addr`
    pub fn read_range(&self, addr: usize, count: usize) -> Result<Vec<Vec<T>>, Fault> {
        self.check(addr, count)?;
        Ok(self.data[addr * self.width..(addr + count) * self.width]
            .chunks(self.width)
            .map(<[T]>::to_vec)
            .collect())
    }

    /// Queue a write for the end of the cycle
    pub fn stage(&mut self, addr: usize, values: Vec<T>) -> Result<(), Fault> {
        self.check(addr, 1)?;
        if values.len() != self.width {
            return Err(Fault::width(self.kind, self.width, values.len()));
        }
        self.pending.push((addr, values));
        Ok(())
    }

    /// Apply staged writes in issue order
    pub fn commit(&mut self) {
        for (addr, values) in self.pending.drain(..) {
            self.data[addr * self.width..(addr + 1) * self.width].copy_from_slice(&values);
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Unified buffer of activation vectors
pub type UnifiedBuffer<E> = VectorMemory<E>;

impl<E: Copy + Default> UnifiedBuffer<E> {
    pub fn unified(capacity: usize, width: usize) -> Self {
        Self::new(Memory::UnifiedBuffer, capacity, width)
    }
}

/// Accumulator memory holding matrix-multiply results
#[derive(Debug, Clone)]
pub struct AccumulatorBuffer<D: Datapath> {
    memory: VectorMemory<D::Acc>,
}

impl<D: Datapath> AccumulatorBuffer<D> {
    pub fn new(capacity: usize, width: usize) -> Self {
        Self {
            memory: VectorMemory::new(Memory::Accumulator, capacity, width),
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn read(&self, addr: usize) -> Result<&[D::Acc], Fault> {
        self.memory.read(addr)
    }

    pub fn read_range(&self, addr: usize, count: usize) -> Result<Vec<Vec<D::Acc>>, Fault> {
        self.memory.read_range(addr, count)
    }

    /// Stage a result vector; accumulation is against the committed value
    pub fn write(&mut self, addr: usize, values: Vec<D::Acc>, mode: WriteMode) -> Result<(), Fault> {
        let values = match mode {
            WriteMode::Overwrite => values,
            WriteMode::Accumulate => {
                let stored = self.memory.read(addr)?;
                if values.len() != stored.len() {
                    return Err(Fault::width(Memory::Accumulator, stored.len(), values.len()));
                }
                stored
                    .iter()
                    .zip(values)
                    .map(|(&s, v)| D::accumulate(s, v))
                    .collect()
            }
        };
        self.memory.stage(addr, values)
    }

    pub fn commit(&mut self) {
        self.memory.commit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapath::Quantized;

    #[test]
    fn test_writes_invisible_until_commit() {
        let mut ub = UnifiedBuffer::<i8>::unified(4, 2);
        ub.stage(1, vec![5, -5]).unwrap();
        assert_eq!(ub.read(1).unwrap(), &[0, 0]);
        assert!(ub.has_pending());
        ub.commit();
        assert_eq!(ub.read(1).unwrap(), &[5, -5]);
        assert!(!ub.has_pending());
    }

    #[test]
    fn test_bounds_and_width() {
        let mut ub = UnifiedBuffer::<i8>::unified(4, 2);
        assert_eq!(
            ub.read(4).unwrap_err(),
            Fault::out_of_range(Memory::UnifiedBuffer, 4, 1, 4)
        );
        assert!(ub.read_range(3, 2).is_err());
        assert!(ub.read_range(usize::MAX, 2).is_err());
        assert_eq!(
            ub.stage(0, vec![1]).unwrap_err(),
            Fault::width(Memory::UnifiedBuffer, 2, 1)
        );
    }

    #[test]
    fn test_accumulate_mode_saturates() {
        let mut acc = AccumulatorBuffer::<Quantized>::new(2, 2);
        acc.write(0, vec![i32::MAX - 1, -3], WriteMode::Overwrite).unwrap();
        acc.commit();
        acc.write(0, vec![10, 5], WriteMode::Accumulate).unwrap();
        acc.commit();
        assert_eq!(acc.read(0).unwrap(), &[i32::MAX, 2]);

        acc.write(0, vec![1, 1], WriteMode::Overwrite).unwrap();
        acc.commit();
        assert_eq!(acc.read_range(0, 2).unwrap(), vec![vec![1, 1], vec![0, 0]]);
    }
}
