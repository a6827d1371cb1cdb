//! Slot storage for data nodes: parallel key/payload arrays plus an occupancy
//! bitmap.
//!
//! ASSUMPTIONS:
//! - Keys are unique
//! - Gap slots carry the key of the next filled slot to the right (the end
//!   sentinel when there is none), so the key array is non-decreasing across
//!   every position and bound searches never consult the bitmap

use crate::error::{Error, Result};
use crate::kv::{Key, Payload, END_SENTINEL};
use std::ops::Range;

pub struct GappedArray<P> {
    pub keys: Box<[Key]>,
    pub payloads: Box<[P]>,
    pub bitmap: Box<[bool]>,
}

impl<P: Payload> GappedArray<P> {
    /// Creates an empty gapped array with the given capacity; every slot is a
    /// gap carrying the end sentinel.
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: vec![END_SENTINEL; capacity].into_boxed_slice(),
            payloads: vec![P::default(); capacity].into_boxed_slice(),
            bitmap: vec![false; capacity].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_filled(&self, pos: usize) -> bool {
        self.bitmap[pos]
    }

    /// Marks `pos` filled and stores the entry. Does not touch neighboring
    /// gap slots; see `DataNode::insert_element_at` for the back-fill step.
    #[inline]
    pub fn fill(&mut self, pos: usize, key: Key, payload: P) {
        self.keys[pos] = key;
        self.payloads[pos] = payload;
        self.bitmap[pos] = true;
    }

    /// First filled position at or after `pos` (after, if `exclusive`).
    /// Returns the capacity when there is none.
    pub fn next_filled_position(&self, pos: usize, exclusive: bool) -> usize {
        let mut pos = if exclusive { pos + 1 } else { pos };
        while pos < self.capacity() && !self.bitmap[pos] {
            pos += 1;
        }
        pos.min(self.capacity())
    }

    /// Position of the gap closest to `pos`, scanning both directions.
    ///
    /// Never returns `pos` itself; callers test it first. `NoGapFound` is
    /// unreachable while occupancy stays below capacity.
    pub fn closest_gap(&self, pos: usize) -> Result<usize> {
        let capacity = self.capacity() as isize;
        let pos = pos as isize;
        let max_left_offset = pos;
        let max_right_offset = capacity - pos - 1;
        let max_bidirectional_offset = max_left_offset.min(max_right_offset);

        let mut distance = 1;
        while distance <= max_bidirectional_offset {
            if !self.bitmap[(pos - distance) as usize] {
                return Ok((pos - distance) as usize);
            }
            if !self.bitmap[(pos + distance) as usize] {
                return Ok((pos + distance) as usize);
            }
            distance += 1;
        }

        if max_left_offset > max_right_offset {
            let mut i = pos - distance;
            while i >= 0 {
                if !self.bitmap[i as usize] {
                    return Ok(i as usize);
                }
                i -= 1;
            }
        } else {
            let mut i = pos + distance;
            while i < capacity {
                if !self.bitmap[i as usize] {
                    return Ok(i as usize);
                }
                i += 1;
            }
        }
        Err(Error::NoGapFound)
    }

    /// Number of filled positions in `[left, right)`.
    pub fn num_keys_in_range(&self, left: usize, right: usize) -> usize {
        self.bitmap[left..right.min(self.capacity())]
            .iter()
            .filter(|&&filled| filled)
            .count()
    }

    /// Iterates filled positions in `range`, yielding `(position, key, payload)`.
    pub fn filled(&self, range: Range<usize>) -> impl Iterator<Item = (usize, Key, P)> + '_ {
        let start = range.start.min(self.capacity());
        let end = range.end.min(self.capacity());
        (start..end)
            .filter(move |&i| self.bitmap[i])
            .map(move |i| (i, self.keys[i], self.payloads[i]))
    }
}
