//! Relative virtual addresses.
//!
//! The core never stores virtual addresses directly; every address that
//! crosses a component boundary is image-base-subtracted first.

use std::fmt;
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rva(pub u64);

impl Rva {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn contains(self, size: u64, addr: Rva) -> bool {
        self.0 <= addr.0 && addr.0 < self.0 + size
    }
}

impl fmt::Display for Rva {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<u64> for Rva {
    type Output = Rva;

    fn add(self, rhs: u64) -> Rva {
        Rva(self.0 + rhs)
    }
}

impl Sub<Rva> for Rva {
    type Output = u64;

    fn sub(self, rhs: Rva) -> u64 {
        self.0 - rhs.0
    }
}

impl From<u64> for Rva {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
