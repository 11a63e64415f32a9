//! Thin wrappers around POSIX unnamed, process-shared semaphores embedded
//! directly in the shared-memory region. These are raw
//! pointers into mapped memory, not owned values — callers are responsible
//! for the memory outliving every process that touches it.

use std::io;
use std::time::Duration;

use crate::error::{PerfError, PerfResult};

/// Initialise a semaphore in place with the given starting value, shared
/// between processes (`pshared = 1`).
///
/// # Safety
/// `sem` must point to valid, writable, shared memory large enough for a
/// `libc::sem_t`, and must not already be initialised.
pub unsafe fn init(sem: *mut libc::sem_t, value: u32) -> PerfResult<()> {
    if libc::sem_init(sem, 1, value) != 0 {
        return Err(PerfError::ShmFailure {
            reason: format!("sem_init: {}", io::Error::last_os_error()),
        });
    }
    Ok(())
}

/// Block until the semaphore can be decremented, retrying on EINTR.
///
/// # Safety
/// `sem` must point to a live, initialised `libc::sem_t`.
pub unsafe fn wait(sem: *mut libc::sem_t) -> PerfResult<()> {
    loop {
        if libc::sem_wait(sem) == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(PerfError::ShmFailure {
            reason: format!("sem_wait: {err}"),
        });
    }
}

/// Increment the semaphore, waking one waiter if any.
///
/// # Safety
/// `sem` must point to a live, initialised `libc::sem_t`.
pub unsafe fn post(sem: *mut libc::sem_t) -> PerfResult<()> {
    if libc::sem_post(sem) != 0 {
        return Err(PerfError::ShmFailure {
            reason: format!("sem_post: {}", io::Error::last_os_error()),
        });
    }
    Ok(())
}

/// Destroy the semaphore, retrying while the kernel reports it still has
/// waiters.
/// Gives up and logs after a bounded number of attempts rather than
/// spinning forever during shutdown.
///
/// # Safety
/// `sem` must point to a live, initialised `libc::sem_t` with no
/// outstanding waiters expected to arrive after this call begins.
pub unsafe fn destroy(sem: *mut libc::sem_t) {
    for attempt in 0..50 {
        if libc::sem_destroy(sem) == 0 {
            return;
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EBUSY) {
            std::thread::sleep(Duration::from_millis(20));
            continue;
        }
        tracing::warn!(attempt, %err, "sem_destroy failed");
        return;
    }
    tracing::warn!("sem_destroy: still busy after repeated retries, giving up");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    #[test]
    fn wait_and_post_round_trip() {
        let mut raw = MaybeUninit::<libc::sem_t>::uninit();
        let ptr = raw.as_mut_ptr();
        unsafe {
            init(ptr, 1).unwrap();
            wait(ptr).unwrap();
            post(ptr).unwrap();
            wait(ptr).unwrap();
            destroy(ptr);
        }
    }
}
