use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Statically reserved storage that can be borrowed mutably exactly once.
///
/// Descriptor tables and stacks must stay at a fixed address for as long as
/// the CPU may reference them, so they live in statics. `take` builds the
/// single owner of that storage; every later call yields `None`.
pub struct StaticCell<T> {
    taken: AtomicBool,
    value: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Returns the one mutable reference to the stored value.
    #[allow(clippy::mut_from_ref)]
    pub fn take(&'static self) -> Option<&'static mut T> {
        if self
            .taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        // SAFETY: the flag flips exactly once, so no other reference exists.
        Some(unsafe { &mut *self.value.get() })
    }

    /// Whether the value was already handed out.
    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::Acquire)
    }
}

// Safety: access to the value is gated by the one-shot flag.
unsafe impl<T: Send> Sync for StaticCell<T> {}
