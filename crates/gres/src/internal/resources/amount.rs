use derive_more::{Add, AddAssign, Sub, SubAssign, Sum};
use serde::{Deserialize, Serialize};

/// Number of device units (devices, or shares of a shared device type)
pub type DeviceCount = u64;

pub type NumOfCpus = u32;

/// Memory in megabytes
#[derive(
    Debug,
    Default,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    AddAssign,
    SubAssign,
    Sub,
    Add,
    Sum,
)]
#[serde(transparent)]
pub struct MemAmount(u64);

impl MemAmount {
    pub const ZERO: MemAmount = MemAmount(0);

    pub const fn from_mb(mb: u64) -> Self {
        MemAmount(mb)
    }

    pub fn as_mb(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Memory needed by `count` devices with `self` per device
    pub fn times(&self, count: DeviceCount) -> MemAmount {
        MemAmount(self.0.saturating_mul(count))
    }

    /// How many devices of `self` size fit into `available`
    pub fn fits_into(&self, available: MemAmount) -> DeviceCount {
        if self.0 == 0 {
            DeviceCount::MAX
        } else {
            available.0 / self.0
        }
    }

    pub fn saturating_sub(&self, other: MemAmount) -> MemAmount {
        MemAmount(self.0.saturating_sub(other.0))
    }
}

impl From<u64> for MemAmount {
    fn from(mb: u64) -> Self {
        MemAmount(mb)
    }
}

impl std::fmt::Display for MemAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}M", self.0)
    }
}
