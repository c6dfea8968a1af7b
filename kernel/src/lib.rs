//! # Kernel base for the user-program boundary.
//!
//! This crate collects the kernel-side abstractions that the system call
//! boundary ([`userprog`]) is written against. None of them carry policy of
//! their own; they describe *what* the surrounding kernel offers:
//!
//! - [`addressing`]: virtual addresses, the page size and the user/kernel
//!   split.
//! - [`syscall`]: the trapped register frame of a user thread.
//! - [`mm`]: page frames and their permissions.
//! - [`fs`]: the filesystem contract and the single filesystem lock.
//! - [`teletype`]: the console device.
//! - [`task`]: the hook through which a thread hands a trap to its process.
//! - [`sync`]: spin locks.
//! - [`kprint`]: the kernel print and log macros.
//!
//! The crate is `no_std` and only requires `alloc`, so the same code links
//! into a kernel image and into a host test binary.
//!
//! [`userprog`]: ../userprog/index.html
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

#[macro_use]
pub mod kprint;

pub mod addressing;
pub mod fs;
pub mod mm;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod teletype;

pub use kprint::QUITE;

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel operation.
/// Each variant corresponds to a specific type of error that might
/// occur during the handling of a kernel operation. Collaborators (the
/// filesystem, the pager and the process manager) report their failures with
/// it; the system call boundary decides how each one is surfaced to the user.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    NoSuchEntry,
    /// No such process. (ESRCH)
    NoSuchProcess,
    /// IO Error. (EIO)
    IOError,
    /// Exec format error. (ENOEXEC)
    NoExec,
    /// BAD file descriptor. (EBADF)
    BadFileDescriptor,
    /// No child processes. (ECHILD)
    NoChild,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// File exists. (EEXIST)
    FileExist,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// Too many open files. (EMFILE)
    TooManyOpenFile,
    /// No space left on device. (ENOSPC)
    NoSpace,
    /// File name too long. (ENAMETOOLONG)
    NameTooLong,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::NoSuchProcess => -3,
            KernelError::IOError => -5,
            KernelError::NoExec => -8,
            KernelError::BadFileDescriptor => -9,
            KernelError::NoChild => -10,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::FileExist => -17,
            KernelError::InvalidArgument => -22,
            KernelError::TooManyOpenFile => -24,
            KernelError::NoSpace => -28,
            KernelError::NameTooLong => -36,
            KernelError::NoSuchSyscall => -38,
            KernelError::NotSupportedOperation => -524,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -3 => Ok(Self::NoSuchProcess),
            -5 => Ok(Self::IOError),
            -8 => Ok(Self::NoExec),
            -9 => Ok(Self::BadFileDescriptor),
            -10 => Ok(Self::NoChild),
            -12 => Ok(Self::NoMemory),
            -13 => Ok(Self::InvalidAccess),
            -14 => Ok(Self::BadAddress),
            -17 => Ok(Self::FileExist),
            -22 => Ok(Self::InvalidArgument),
            -24 => Ok(Self::TooManyOpenFile),
            -28 => Ok(Self::NoSpace),
            -36 => Ok(Self::NameTooLong),
            -38 => Ok(Self::NoSuchSyscall),
            -524 => Ok(Self::NotSupportedOperation),
            e => Err(TryFromError { e }),
        }
    }
}
