// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX shared memory segments and in-place process-shared pthread
// primitives.
//
// Unlike named-mutex designs that give every primitive its own segment,
// the transport keeps one mutex and two condition variables inside the
// data segment's header, so everything tears down with a single unlink.
//
// macOS note: pthread primitives there store internal state relative to
// the mapped virtual address, so two mappings of the same segment within
// one process do not share them reliably, and robust mutexes do not exist
// at all. The robust attribute is compiled out on macOS; cross-process use
// on that platform matches the plain PROCESS_SHARED behavior.

use std::ffi::CString;
use std::io;
use std::ptr;

use crate::shm_name;

// ---------------------------------------------------------------------------
// Robust mutex symbols — not exposed by the `libc` crate on all platforms.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
pub(crate) const EOWNERDEAD: i32 = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

// ---------------------------------------------------------------------------
// ShmSegment — a named, mapped POSIX shared memory region
// ---------------------------------------------------------------------------

/// A mapped `shm_open` region. Dropping unmaps; removal of the backing
/// object is explicit via [`ShmSegment::unlink`], because the creator and
/// the attachers have different teardown duties.
pub(crate) struct ShmSegment {
    mem: *mut u8,
    len: usize,
    name: String, // POSIX name (with leading '/')
}

// The region is process-shared by design; all mutation happens behind the
// in-segment mutex or atomics.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a fresh segment of `size` bytes, replacing any stale object
    /// with the same name, and map it read-write.
    pub fn create(name: &str, size: usize) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let perms: libc::mode_t = 0o666;

        // A previous incarnation may have died without unlinking.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        Self::map(fd, size, posix_name)
    }

    /// Attach to an existing segment, taking its size from `fstat`.
    pub fn attach(name: &str) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }

        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666 as libc::c_uint) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let len = st.st_size as usize;
        if len == 0 {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment has zero size",
            ));
        }

        Self::map(fd, len, posix_name)
    }

    fn map(fd: i32, len: usize, name: String) -> io::Result<Self> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            mem: mem as *mut u8,
            len,
            name,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Remove the backing object. The mapping stays valid until drop.
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if !self.mem.is_null() {
            unsafe { libc::munmap(self.mem as *mut libc::c_void, self.len) };
        }
    }
}

// ---------------------------------------------------------------------------
// In-place process-shared mutex
// ---------------------------------------------------------------------------

/// Outcome of locking a robust mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockState {
    Acquired,
    /// The previous owner died while holding the lock. The caller now holds
    /// the mutex and decides whether to make it consistent or abandon the
    /// protected state.
    OwnerDead,
}

/// Initialize a `pthread_mutex_t` in place with PROCESS_SHARED (and, where
/// available, ROBUST) attributes.
///
/// # Safety
/// `mtx` must point into a writable mapping with room for the mutex, and
/// no other thread or process may be using it yet.
pub(crate) unsafe fn init_shared_mutex(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    ptr::write_bytes(mtx, 0, 1);

    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    let mut eno = libc::pthread_mutexattr_init(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }

    eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno != 0 {
        libc::pthread_mutexattr_destroy(&mut attr);
        return Err(io::Error::from_raw_os_error(eno));
    }

    #[cfg(not(target_os = "macos"))]
    {
        eno = pthread_mutexattr_setrobust(&mut attr, PTHREAD_MUTEX_ROBUST);
        if eno != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(eno));
        }
    }

    eno = libc::pthread_mutex_init(mtx, &attr);
    libc::pthread_mutexattr_destroy(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// Lock, surfacing a dead previous owner to the caller.
///
/// # Safety
/// `mtx` must point to a mutex initialized by [`init_shared_mutex`] in a
/// live mapping.
pub(crate) unsafe fn lock_mutex(mtx: *mut libc::pthread_mutex_t) -> io::Result<LockState> {
    let eno = libc::pthread_mutex_lock(mtx);
    match eno {
        0 => Ok(LockState::Acquired),
        #[cfg(not(target_os = "macos"))]
        EOWNERDEAD => Ok(LockState::OwnerDead),
        _ => Err(io::Error::from_raw_os_error(eno)),
    }
}

/// Lock for the segment owner: a dead previous owner is recovered by
/// marking the mutex consistent, since the owner knows its own state.
///
/// # Safety
/// Same as [`lock_mutex`].
pub(crate) unsafe fn lock_mutex_recover(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    match lock_mutex(mtx)? {
        LockState::Acquired => Ok(()),
        LockState::OwnerDead => {
            #[cfg(not(target_os = "macos"))]
            {
                let eno = pthread_mutex_consistent(mtx);
                if eno != 0 {
                    return Err(io::Error::from_raw_os_error(eno));
                }
            }
            Ok(())
        }
    }
}

/// # Safety
/// `mtx` must be a locked mutex owned by the calling thread.
pub(crate) unsafe fn unlock_mutex(mtx: *mut libc::pthread_mutex_t) -> io::Result<()> {
    let eno = libc::pthread_mutex_unlock(mtx);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// # Safety
/// `mtx` must point to an initialized, unlocked mutex no other process is
/// about to use.
pub(crate) unsafe fn destroy_mutex(mtx: *mut libc::pthread_mutex_t) {
    libc::pthread_mutex_destroy(mtx);
}

// ---------------------------------------------------------------------------
// In-place process-shared condition variable
// ---------------------------------------------------------------------------

/// Initialize a `pthread_cond_t` in place with the PROCESS_SHARED attribute.
///
/// # Safety
/// `cond` must point into a writable mapping with room for the condition
/// variable, and no other thread or process may be using it yet.
pub(crate) unsafe fn init_shared_cond(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    ptr::write_bytes(cond, 0, 1);

    let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
    let mut eno = libc::pthread_condattr_init(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }

    eno = libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if eno != 0 {
        libc::pthread_condattr_destroy(&mut attr);
        return Err(io::Error::from_raw_os_error(eno));
    }

    eno = libc::pthread_cond_init(cond, &attr);
    libc::pthread_condattr_destroy(&mut attr);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// Wait on `cond` with `mtx` held, for at most `timeout_ms`.
/// Returns `Ok(true)` when signalled, `Ok(false)` on timeout; any other
/// errno (EINVAL on a destroyed or torn-down primitive) becomes an error.
///
/// # Safety
/// `cond` and `mtx` must be initialized primitives in a live mapping, and
/// the calling thread must hold `mtx`.
pub(crate) unsafe fn timed_wait(
    cond: *mut libc::pthread_cond_t,
    mtx: *mut libc::pthread_mutex_t,
    timeout_ms: u64,
) -> io::Result<bool> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let deadline = now + std::time::Duration::from_millis(timeout_ms);
    let ts = libc::timespec {
        tv_sec: deadline.as_secs() as libc::time_t,
        tv_nsec: deadline.subsec_nanos() as libc::c_long,
    };

    let eno = libc::pthread_cond_timedwait(cond, mtx, &ts);
    match eno {
        0 => Ok(true),
        libc::ETIMEDOUT => Ok(false),
        _ => Err(io::Error::from_raw_os_error(eno)),
    }
}

/// # Safety
/// `cond` must be an initialized condition variable in a live mapping.
pub(crate) unsafe fn signal_cond(cond: *mut libc::pthread_cond_t) -> io::Result<()> {
    let eno = libc::pthread_cond_signal(cond);
    if eno != 0 {
        return Err(io::Error::from_raw_os_error(eno));
    }
    Ok(())
}

/// # Safety
/// `cond` must point to an initialized condition variable no other process
/// is about to use.
pub(crate) unsafe fn destroy_cond(cond: *mut libc::pthread_cond_t) {
    libc::pthread_cond_destroy(cond);
}
