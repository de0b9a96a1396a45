use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::cpu;

/// Bare claim/release lock for short critical sections around data the
/// caller keeps in its own cell.
pub struct Spinlock {
    locked: AtomicBool,
}

/// Mutex that disables interrupts while held.
/// Used for state touched from both SWI handlers and interrupt dispatch.
pub struct IrqMutex<T> {
    lock: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: IrqMutex provides exclusive access through atomic locking with
// interrupts disabled, making it safe to share across contexts.
unsafe impl<T: Send> Send for IrqMutex<T> {}
unsafe impl<T: Send> Sync for IrqMutex<T> {}

pub struct IrqMutexGuard<'a, T> {
    mutex: &'a IrqMutex<T>,
    interrupts_were_enabled: bool,
}

impl<T> IrqMutex<T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let interrupts_were_enabled = cpu::save_and_disable();

        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }

        IrqMutexGuard {
            mutex: self,
            interrupts_were_enabled,
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<IrqMutexGuard<'_, T>> {
        let interrupts_were_enabled = cpu::save_and_disable();

        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(IrqMutexGuard {
                mutex: self,
                interrupts_were_enabled,
            })
        } else {
            cpu::restore(interrupts_were_enabled);
            None
        }
    }
}

impl<'a, T> Deref for IrqMutexGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the guard holds the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for IrqMutexGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the lock exclusively.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for IrqMutexGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.lock.store(false, Ordering::Release);
        cpu::restore(self.interrupts_were_enabled);
    }
}

impl Spinlock {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    #[inline(always)]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    #[inline(always)]
    pub fn lock_irqsave(&self) -> bool {
        let flags = cpu::save_and_disable();
        self.lock();
        flags
    }

    #[inline(always)]
    pub fn unlock_irqrestore(&self, flags: bool) {
        self.locked.store(false, Ordering::Release);
        cpu::restore(flags);
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_mutex_try_lock_fails_while_held() {
        let m = IrqMutex::new(5u32);
        let mut g = m.lock();
        *g += 1;
        assert!(m.try_lock().is_none());
        drop(g);
        assert_eq!(*m.lock(), 6);
    }

    #[test]
    fn spinlock_counts_across_threads() {
        struct Shared {
            lock: Spinlock,
            value: UnsafeCell<u64>,
        }
        unsafe impl Sync for Shared {}

        let shared = Shared {
            lock: Spinlock::new(),
            value: UnsafeCell::new(0),
        };
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let shared = &shared;
                    for _ in 0..1000 {
                        let flags = shared.lock.lock_irqsave();
                        unsafe { *shared.value.get() += 1 };
                        shared.lock.unlock_irqrestore(flags);
                    }
                });
            }
        });
        assert_eq!(unsafe { *shared.value.get() }, 4000);
    }
}
