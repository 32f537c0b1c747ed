use num_traits::Float;
use serde_derive::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Reduction applied over the samples of a [`SlidingWindow`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Min,
    Max,
    Sum,
    Mean,
    Variance,
    /// Standard deviation over the absolute mean.
    VarCoeff,
}

/// Fixed-capacity window over the most recent samples of a scalar metric.
///
/// The criterion is undefined until the window has been filled once.
pub struct SlidingWindow<F> {
    deque: VecDeque<F>,
    capacity: usize,
}

impl<F: Clone> Clone for SlidingWindow<F> {
    fn clone(&self) -> Self {
        Self {
            deque: self.deque.clone(),
            capacity: self.capacity,
        }
    }
}

impl<F: fmt::Debug> fmt::Debug for SlidingWindow<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("capacity", &self.capacity)
            .field("samples", &self.deque)
            .finish()
    }
}

impl<F: Float> SlidingWindow<F> {
    #[inline]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            deque: VecDeque::with_capacity(cap),
            capacity: cap,
        }
    }

    /// Empty window with the same capacity.
    #[inline]
    pub fn fresh(&self) -> Self {
        Self::with_capacity(self.capacity)
    }

    /// Appends a sample, returning the evicted one once the window is full.
    #[inline]
    pub fn push(&mut self, sample: F) -> Option<F> {
        let evicted = if self.is_full() {
            self.deque.pop_front()
        } else {
            None
        };

        self.deque.push_back(sample);

        evicted
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.deque.len() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn clear(&mut self) {
        self.deque.clear()
    }

    /// Oldest sample first.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ F> {
        self.deque.iter()
    }

    pub fn criterion(&self, op: Operation) -> Option<F> {
        if !self.is_full() || self.deque.is_empty() {
            return None;
        }

        let n = F::from(self.deque.len())?;
        let sum = self.deque.iter().fold(F::zero(), |acc, &x| acc + x);
        let mean = sum / n;
        let variance = || {
            self.deque
                .iter()
                .fold(F::zero(), |acc, &x| acc + (x - mean) * (x - mean))
                / n
        };

        let value = match op {
            Operation::Min => self.deque.iter().fold(F::infinity(), |a, &b| a.min(b)),
            Operation::Max => self.deque.iter().fold(F::neg_infinity(), |a, &b| a.max(b)),
            Operation::Sum => sum,
            Operation::Mean => mean,
            Operation::Variance => variance(),
            Operation::VarCoeff => {
                let std = variance().sqrt();

                if std == F::zero() {
                    F::zero()
                } else if mean == F::zero() {
                    F::infinity()
                } else {
                    std / mean.abs()
                }
            }
        };

        Some(value)
    }
}
