use parking_lot::RwLock;
use std::sync::Arc;

/// Shared, lock-protected value. Clones point at the same slot.
pub type Atomic<T> = Arc<RwLock<T>>;

#[inline]
pub fn atomic<T>(t: T) -> Atomic<T> {
    Arc::new(RwLock::new(t))
}

/// Runs a closure under the read lock.
pub trait ReadExecutor<T: ?Sized> {
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R;
}

impl<T> ReadExecutor<T> for Atomic<T> {
    #[inline]
    fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.read();
        f(&*guard)
    }
}

/// Runs a closure under the write lock.
pub trait WriteExecutor<T: ?Sized> {
    fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

impl<T> WriteExecutor<T> for Atomic<T> {
    #[inline]
    fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.write();
        f(&mut *guard)
    }
}

/// Whole-value access for small `Copy` settings such as durations.
pub trait CopyExecutor<T: Copy> {
    /// Current value.
    fn get(&self) -> T;

    /// Stores `value` and returns the previous one.
    fn replace(&self, value: T) -> T;
}

impl<T: Copy> CopyExecutor<T> for Atomic<T> {
    #[inline]
    fn get(&self) -> T {
        *self.read()
    }

    #[inline]
    fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.write(), value)
    }
}
