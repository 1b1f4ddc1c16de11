use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The controller lock that protects node inventories and job/step claims.
///
/// The lock does not own the protected records, it only hands out access guards.
/// Mutating entry points of the allocation engine take `&ExclusiveAccess`, read-only entry points
/// take anything implementing `ReadAccess`, so a call without holding the lock does not compile.
#[derive(Default)]
pub struct ResourceLock {
    lock: RwLock<()>,
}

pub struct ExclusiveAccess<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

pub struct SharedAccess<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Proof of holding the resource lock in any mode
pub trait ReadAccess {}

impl ReadAccess for ExclusiveAccess<'_> {}
impl ReadAccess for SharedAccess<'_> {}

impl ResourceLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self) -> ExclusiveAccess<'_> {
        ExclusiveAccess {
            _guard: self.lock.write(),
        }
    }

    pub fn read(&self) -> SharedAccess<'_> {
        SharedAccess {
            _guard: self.lock.read(),
        }
    }

    pub fn try_write(&self) -> Option<ExclusiveAccess<'_>> {
        self.lock
            .try_write()
            .map(|guard| ExclusiveAccess { _guard: guard })
    }
}
