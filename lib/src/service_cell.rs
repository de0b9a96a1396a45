//! Late-bound `'static` service, registered at most once.

use core::sync::atomic::{AtomicPtr, Ordering};

pub struct ServiceCell<T> {
    ptr: AtomicPtr<T>,
}

// SAFETY: the cell only ever holds a `&'static T`; sharing it across cores
// is sound when `T` itself is `Sync`.
unsafe impl<T: Sync> Sync for ServiceCell<T> {}

impl<T> ServiceCell<T> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// First registration wins; later ones return `false`.
    #[inline]
    pub fn try_register(&self, service: &'static T) -> bool {
        self.ptr
            .compare_exchange(
                core::ptr::null_mut(),
                service as *const T as *mut T,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    pub fn try_get(&self) -> Option<&'static T> {
        let ptr = self.ptr.load(Ordering::Acquire);
        // SAFETY: non-null pointers in the cell came from a `&'static T`.
        (!ptr.is_null()).then(|| unsafe { &*ptr })
    }
}

impl<T> Default for ServiceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
