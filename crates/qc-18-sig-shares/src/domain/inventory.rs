//! Share availability bitsets exchanged in `qsigsinv` and `qgetsigs`.

use bitvec::prelude::*;
use std::fmt;

/// One bit per quorum member, tagged with the session id it refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharesInventory {
    pub session_id: u32,
    inv: BitVec<u8, Lsb0>,
}

impl SharesInventory {
    /// All bits cleared.
    pub fn new(session_id: u32, size: usize) -> Self {
        Self {
            session_id,
            inv: bitvec![u8, Lsb0; 0; size],
        }
    }

    /// Unpacks an LSB-first bitset of `size` bits. Bytes beyond what `size`
    /// needs, and padding bits in the last byte, are ignored.
    pub fn from_packed(session_id: u32, size: usize, packed: &[u8]) -> Self {
        let mut inventory = Self::new(session_id, size);
        for i in 0..size {
            if packed.get(i / 8).is_some_and(|byte| (byte >> (i % 8)) & 1 == 1) {
                inventory.inv.set(i, true);
            }
        }
        inventory
    }

    /// LSB-first packing into `ceil(len / 8)` bytes.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut packed = vec![0u8; self.inv.len().div_ceil(8)];
        for i in self.inv.iter_ones() {
            packed[i / 8] |= 1 << (i % 8);
        }
        packed
    }

    /// Resets to `size` cleared bits.
    pub fn init(&mut self, size: usize) {
        self.inv = bitvec![u8, Lsb0; 0; size];
    }

    pub fn len(&self) -> usize {
        self.inv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inv.is_empty()
    }

    pub fn is_set(&self, member: u16) -> bool {
        self.inv
            .get(usize::from(member))
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// Out-of-range members are ignored.
    pub fn set(&mut self, member: u16, value: bool) {
        let index = usize::from(member);
        if index < self.inv.len() {
            self.inv.set(index, value);
        }
    }

    pub fn set_all(&mut self, value: bool) {
        self.inv.fill(value);
    }

    /// Bitwise OR of `other` into `self`. Bits past our length are dropped.
    pub fn merge(&mut self, other: &SharesInventory) {
        let len = self.inv.len();
        for i in other.inv.iter_ones().take_while(|i| *i < len) {
            self.inv.set(i, true);
        }
    }

    pub fn count_set(&self) -> usize {
        self.inv.count_ones()
    }

    pub fn iter_set(&self) -> impl Iterator<Item = u16> + '_ {
        self.inv.iter_ones().filter_map(|i| u16::try_from(i).ok())
    }
}

impl fmt::Display for SharesInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.inv.iter_ones().map(|i| i.to_string()).collect();
        write!(f, "({})", members.join(","))
    }
}
