//! Address-keyed lookup used by [`super::Cfg`] to answer
//! "is this address already part of some block" in better than linear time.
//!
//! The original engine (`original_source/src/cfg/cfg-gen.c`) tracks visited
//! addresses with a raw bitmap sized to the image. A `BTreeMap` keyed by RVA
//! is the idiomatic equivalent here: PE images are sparse relative to their
//! virtual size, so a dense bitmap would mostly store zeroes.

use std::collections::BTreeMap;

use crate::addr::Rva;

#[derive(Debug, Clone)]
pub struct AddressMap<V> {
    inner: BTreeMap<u64, V>,
}

impl<V> Default for AddressMap<V> {
    fn default() -> Self {
        Self { inner: BTreeMap::new() }
    }
}

impl<V> AddressMap<V> {
    pub fn insert(&mut self, addr: Rva, value: V) -> Option<V> {
        self.inner.insert(addr.value(), value)
    }

    pub fn get(&self, addr: Rva) -> Option<&V> {
        self.inner.get(&addr.value())
    }

    pub fn contains(&self, addr: Rva) -> bool {
        self.inner.contains_key(&addr.value())
    }

    /// The entry with the greatest address `<= addr`, for locating the block
    /// that would contain `addr` if it isn't itself a block start.
    pub fn floor(&self, addr: Rva) -> Option<(Rva, &V)> {
        self.inner
            .range(..=addr.value())
            .next_back()
            .map(|(&k, v)| (Rva::new(k), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_returns_greatest_key_at_or_below() {
        let mut m = AddressMap::default();
        m.insert(Rva::new(0x1000), "a");
        m.insert(Rva::new(0x2000), "b");
        let (k, v) = m.floor(Rva::new(0x1500)).unwrap();
        assert_eq!(k, Rva::new(0x1000));
        assert_eq!(*v, "a");
    }
}
