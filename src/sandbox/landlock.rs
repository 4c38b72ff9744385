//! Restricts filesystem access of the current process via the Landlock
//! Linux API (<https://docs.kernel.org/userspace-api/landlock.html>).
//!
//! On non-Linux hosts every operation is a successful no-op and
//! [`is_supported`] returns `false`; callers advertise the degradation
//! out-of-band.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LandlockError {
    #[error("landlock is not supported by the kernel")]
    KernelUnsupported,

    #[error("landlock is supported by the kernel but disabled at boot time")]
    KernelDisabledAtBoot,

    #[error("opening {path:?} for sandbox inspection failed: {err}")]
    OpenPath { path: PathBuf, err: io::Error },

    #[error("landlock syscall failed: {0}")]
    Sys(io::Error),
}

/// Rights granted to an allowed path. Read-write additionally grants the v1
/// write and create rights, which tasks need on their declared output
/// directories.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(target_os = "linux")]
mod linux {
    use super::{AccessMode, LandlockError};
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::io::RawFd;
    use std::path::Path;

    // The `libc` crate does not expose the Landlock UAPI, so the fixed
    // kernel ABI v1 constants and structs (from `linux/landlock.h`) are
    // declared here directly.
    const LANDLOCK_ACCESS_FS_WRITE_FILE: u64 = 1 << 1;
    const LANDLOCK_ACCESS_FS_READ_FILE: u64 = 1 << 2;
    const LANDLOCK_ACCESS_FS_READ_DIR: u64 = 1 << 3;
    const LANDLOCK_ACCESS_FS_REMOVE_DIR: u64 = 1 << 4;
    const LANDLOCK_ACCESS_FS_REMOVE_FILE: u64 = 1 << 5;
    const LANDLOCK_ACCESS_FS_MAKE_DIR: u64 = 1 << 7;
    const LANDLOCK_ACCESS_FS_MAKE_REG: u64 = 1 << 8;

    #[repr(C)]
    struct landlock_ruleset_attr {
        handled_access_fs: u64,
    }

    #[repr(C, packed)]
    struct landlock_path_beneath_attr {
        allowed_access: u64,
        parent_fd: libc::c_int,
    }

    // Only Landlock ABI v1 rights are used.
    const READ_RIGHTS: u64 = LANDLOCK_ACCESS_FS_READ_DIR | LANDLOCK_ACCESS_FS_READ_FILE;

    const WRITE_RIGHTS: u64 = LANDLOCK_ACCESS_FS_WRITE_FILE
        | LANDLOCK_ACCESS_FS_MAKE_REG
        | LANDLOCK_ACCESS_FS_MAKE_DIR
        | LANDLOCK_ACCESS_FS_REMOVE_FILE
        | LANDLOCK_ACCESS_FS_REMOVE_DIR;

    /// Rights that only make sense on directories; stripped for file
    /// targets.
    const DIR_ONLY_RIGHTS: u64 =
        LANDLOCK_ACCESS_FS_READ_DIR | LANDLOCK_ACCESS_FS_MAKE_DIR | LANDLOCK_ACCESS_FS_REMOVE_DIR;

    const LANDLOCK_RULE_PATH_BENEATH: libc::c_uint = 1;
    const LANDLOCK_CREATE_RULESET_VERSION: u32 = 1;

    /// The Landlock ABI version supported by the running kernel.
    pub fn abi_version() -> Result<i32, LandlockError> {
        let r = unsafe {
            libc::syscall(
                libc::SYS_landlock_create_ruleset,
                std::ptr::null::<libc::c_void>(),
                0usize,
                LANDLOCK_CREATE_RULESET_VERSION,
            )
        };
        if r < 0 {
            return Err(last_errno_error());
        }
        Ok(r as i32)
    }

    pub fn is_supported() -> bool {
        abi_version().is_ok()
    }

    /// A kernel ruleset accumulating path rules prior to self-restriction.
    /// Strictly per-process; destroyed with the owning file descriptor.
    #[derive(Debug)]
    pub struct FsRuleset {
        fd: RawFd,
    }

    impl FsRuleset {
        pub fn new() -> Result<Self, LandlockError> {
            let attr = landlock_ruleset_attr {
                handled_access_fs: READ_RIGHTS | WRITE_RIGHTS,
            };

            let fd = unsafe {
                libc::syscall(
                    libc::SYS_landlock_create_ruleset,
                    &attr as *const landlock_ruleset_attr as *const libc::c_void,
                    std::mem::size_of::<landlock_ruleset_attr>(),
                    0u32,
                )
            };
            if fd < 0 {
                return Err(last_errno_error());
            }

            Ok(Self { fd: fd as RawFd })
        }

        /// Adds a rule allowing access to `path`. A directory rule applies
        /// to everything beneath it.
        pub fn allow(&self, path: &Path, mode: AccessMode) -> Result<(), LandlockError> {
            let rights = access_rights(path, mode)?;

            let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                LandlockError::OpenPath {
                    path: path.to_path_buf(),
                    err: io::Error::from(io::ErrorKind::InvalidInput),
                }
            })?;

            // O_PATH: inspection only, no data descriptor.
            let parent_fd = unsafe { libc::open(c_path.as_ptr(), libc::O_PATH | libc::O_CLOEXEC) };
            if parent_fd < 0 {
                return Err(LandlockError::OpenPath {
                    path: path.to_path_buf(),
                    err: io::Error::last_os_error(),
                });
            }

            let attr = landlock_path_beneath_attr {
                allowed_access: rights,
                parent_fd,
            };

            let res = unsafe {
                libc::syscall(
                    libc::SYS_landlock_add_rule,
                    self.fd,
                    LANDLOCK_RULE_PATH_BENEATH,
                    &attr as *const landlock_path_beneath_attr as *const libc::c_void,
                    0u32,
                )
            };
            unsafe { libc::close(parent_fd) };

            if res != 0 {
                return Err(last_errno_error());
            }
            Ok(())
        }

        /// Limits the calling process (and everything it execs) to the
        /// accumulated rules. Irreversible.
        pub fn restrict(self) -> Result<(), LandlockError> {
            let res = unsafe {
                libc::prctl(
                    libc::PR_SET_NO_NEW_PRIVS,
                    1 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                    0 as libc::c_ulong,
                )
            };
            if res != 0 {
                return Err(LandlockError::Sys(io::Error::last_os_error()));
            }

            let res = unsafe { libc::syscall(libc::SYS_landlock_restrict_self, self.fd, 0u32) };
            if res != 0 {
                return Err(last_errno_error());
            }
            Ok(())
        }
    }

    impl Drop for FsRuleset {
        fn drop(&mut self) {
            unsafe { libc::close(self.fd) };
        }
    }

    fn access_rights(path: &Path, mode: AccessMode) -> Result<u64, LandlockError> {
        let metadata = std::fs::metadata(path).map_err(|err| LandlockError::OpenPath {
            path: path.to_path_buf(),
            err,
        })?;

        let rights = match mode {
            AccessMode::ReadOnly => READ_RIGHTS,
            AccessMode::ReadWrite => READ_RIGHTS | WRITE_RIGHTS,
        };

        if metadata.is_dir() {
            Ok(rights)
        } else {
            Ok(rights & !DIR_ONLY_RIGHTS)
        }
    }

    fn last_errno_error() -> LandlockError {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ENOSYS) => LandlockError::KernelUnsupported,
            Some(libc::EOPNOTSUPP) => LandlockError::KernelDisabledAtBoot,
            _ => LandlockError::Sys(err),
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use self::fallback::*;

#[cfg(not(target_os = "linux"))]
mod fallback {
    use super::{AccessMode, LandlockError};
    use std::path::Path;

    pub fn is_supported() -> bool {
        false
    }

    /// No-op stand-in on hosts without Landlock: commands run unsandboxed
    /// and callers must surface that.
    #[derive(Debug)]
    pub struct FsRuleset;

    impl FsRuleset {
        pub fn new() -> Result<Self, LandlockError> {
            Ok(Self)
        }

        pub fn allow(&self, _path: &Path, _mode: AccessMode) -> Result<(), LandlockError> {
            Ok(())
        }

        pub fn restrict(self) -> Result<(), LandlockError> {
            Ok(())
        }
    }
}
