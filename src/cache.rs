//! Direct-mapped cache of decompressed blocks
//!
//! Block index modulo capacity picks the slot; a collision evicts the
//! previous occupant. Sequential runs inside a reset interval never
//! collide, and random jumps miss under any policy, so anything fancier
//! buys nothing here.

/// Hard upper bound on cache capacity.
pub const MAX_CACHE_BLOCKS: usize = 64;

/// Capacity installed by [`Archive::open`](crate::Archive::open).
pub const DEFAULT_CACHE_BLOCKS: usize = 5;

struct Slot {
    block: u64,
    data: Vec<u8>,
}

/// Fixed-capacity direct-mapped block cache.
pub(crate) struct BlockCache {
    slots: Vec<Option<Slot>>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_CACHE_BLOCKS);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Decompressed contents of `block`, if cached.
    pub fn lookup(&self, block: u64) -> Option<&[u8]> {
        let capacity = self.slots.len() as u64;
        if capacity == 0 {
            return None;
        }
        let slot = self.slots[(block % capacity) as usize].as_ref()?;
        (slot.block == block).then(|| slot.data.as_slice())
    }

    /// Store a copy of `data` as the contents of `block`, evicting the
    /// slot's previous occupant. The slot's allocation is reused.
    pub fn install(&mut self, block: u64, data: &[u8]) {
        let capacity = self.slots.len() as u64;
        if capacity == 0 {
            return;
        }
        let idx = (block % capacity) as usize;
        match &mut self.slots[idx] {
            Some(slot) => {
                slot.block = block;
                slot.data.clear();
                slot.data.extend_from_slice(data);
            }
            empty => {
                *empty = Some(Slot {
                    block,
                    data: data.to_vec(),
                })
            }
        }
    }

    /// Rehash into a table of `capacity` slots (clamped to
    /// [`MAX_CACHE_BLOCKS`]). When two old entries land in the same new
    /// slot the one encountered first stays; zero capacity frees
    /// everything.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.min(MAX_CACHE_BLOCKS);
        if capacity == self.slots.len() {
            return;
        }

        let mut slots: Vec<Option<Slot>> = (0..capacity).map(|_| None).collect();
        for slot in self.slots.drain(..).flatten() {
            if capacity == 0 {
                continue;
            }
            let idx = (slot.block % capacity as u64) as usize;
            if slots[idx].is_none() {
                slots[idx] = Some(slot);
            }
        }
        self.slots = slots;
    }
}
