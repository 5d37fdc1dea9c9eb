//! Raises the process's open-file-descriptor limit at startup.
//!
//! Generalizes a fixed `ulimit(4, 1000000)` call into reading the
//! kernel's actual hard ceiling, expressed as a direct `libc` FFI call.

use std::io;
use std::mem::MaybeUninit;

/// Raises `RLIMIT_NOFILE` (soft limit) to the process's hard limit.
///
/// Returns the new soft limit. A failure here is fatal at startup; the
/// caller is expected to map this to a nonzero process exit.
pub fn raise_nofile_limit() -> io::Result<u64> {
    unsafe {
        let mut limit = MaybeUninit::<libc::rlimit>::uninit();
        if libc::getrlimit(libc::RLIMIT_NOFILE, limit.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut limit = limit.assume_init();

        if limit.rlim_cur >= limit.rlim_max {
            return Ok(limit.rlim_cur as u64);
        }

        limit.rlim_cur = limit.rlim_max;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &limit) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(limit.rlim_cur as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_without_error() {
        // The exact resulting limit is platform/container dependent; we
        // only assert that the call succeeds and returns something sane.
        let limit = raise_nofile_limit().expect("raising RLIMIT_NOFILE should succeed in test");
        assert!(limit > 0);
    }
}
