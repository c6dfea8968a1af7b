//! # The user-program system call boundary.
//!
//! This crate is the trusted entry point through which a user program asks
//! the kernel for service. Every argument a program passes is untrusted: a
//! pointer may be null, point into the kernel or name unmapped memory; a
//! descriptor may be stale or forged; a mapping request may overlap memory the
//! program already owns. The boundary validates all of it before a single
//! side effect happens, then delegates to the filesystem, the pager and the
//! process manager.
//!
//! ## Outline
//! - [`syscall`]: decoding the trapped frame into a [`SyscallAbi`].
//! - [`uaccess`]: the user-address validator and the only copy path to and
//!   from user memory.
//! - [`file_struct`]: the per-process file descriptor table and the file
//!   system calls.
//! - [`mm_struct`]: the mapping gate in front of the pager.
//! - [`pager`] and [`lazy_pager`]: the virtual memory contract and its
//!   reference implementation.
//! - [`process`]: the process control block and the lifecycle shims.
//!
//! ## Failure modes
//!
//! A request fails in one of two ways:
//!
//! - **Recoverable**: a missing file, a bad descriptor, a rejected mapping.
//!   The program gets the sentinel of the call (`-1`, `0` or `NULL`) and
//!   keeps running.
//! - **Fatal**: an invalid pointer or an unknown system call number. The
//!   handler returns [`NoReturn::Exit`]`(-1)`, which every caller propagates
//!   with `?`. Only [`Task::syscall`] turns it into a teardown of the process,
//!   so the termination notice is printed once.
//!
//! [`Task::syscall`]: kernel::task::Task::syscall
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;
#[allow(unused_imports)]
#[macro_use]
extern crate kernel;

pub mod file_struct;
pub mod lazy_pager;
pub mod mm_struct;
pub mod pager;
pub mod process;
pub mod syscall;
pub mod uaccess;

use file_struct::FileDescriptor;
use kernel::{
    syscall::Registers,
    task::{Continuation, Task},
};
use num_enum::TryFromPrimitive;
use pager::Pager;
use syscall::SyscallAbi;
use uaccess::{UserCString, UserU8SliceRO, UserU8SliceWO, kernel_buffer};

pub use process::{Lifecycle, Pid, Process, ProcessBuilder};

/// Represents system call numbers.
///
/// Each variant corresponds to a specific system call that can be invoked
/// using the system call interface. The numeric values align with the
/// syscall table of the user library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(usize)]
pub enum SyscallNumber {
    /// Powers off the machine.
    Halt = 0,
    /// Terminates the current process.
    Exit = 1,
    /// Clones the current process.
    Fork = 2,
    /// Replaces the image of the current process.
    Exec = 3,
    /// Waits for a child process to exit.
    Wait = 4,
    /// Creates a file.
    Create = 5,
    /// Deletes a file.
    Remove = 6,
    /// Opens a file and returns a file descriptor.
    Open = 7,
    /// Returns the length of an open file.
    Filesize = 8,
    /// Reads data from a file descriptor.
    Read = 9,
    /// Writes data to a file descriptor.
    Write = 10,
    /// Moves the file offset of an open file.
    Seek = 11,
    /// Retrieves the current file offset.
    Tell = 12,
    /// Closes an open file descriptor.
    Close = 13,
    /// Maps a file into memory.
    Mmap = 14,
    /// Unmaps a file mapping.
    Munmap = 15,
}

/// An outcome of a system call after which the calling program does not
/// resume where it trapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoReturn {
    /// Terminate the process with the status.
    Exit(i32),
    /// Power off the machine.
    Halt,
    /// The image was replaced; resume on this frame.
    Exec(Registers),
}

impl<P: Pager> Task for Process<P> {
    /// Handles a system call request from a user program.
    ///
    /// Decodes the frame, validates the arguments of the requested call and
    /// runs its handler. A value returned by the handler is written to `%rax`;
    /// a [`NoReturn`] is carried out here and nowhere else.
    fn syscall(&mut self, regs: &mut Registers) -> Continuation {
        self.user_rsp = regs.rsp;
        let abi = SyscallAbi::from_registers(regs);
        let return_val = match SyscallNumber::try_from(abi.sysno) {
            Ok(no) => self.dispatch(no, &abi),
            Err(_) => {
                warning!("{}: unknown system call {:#x}", self.name, abi.sysno);
                Err(NoReturn::Exit(-1))
            }
        };
        match return_val {
            Ok(v) => {
                abi.set_return_value(v);
                Continuation::ReturnToUser
            }
            Err(NoReturn::Exec(frame)) => {
                *abi.regs = frame;
                Continuation::ReturnToUser
            }
            Err(NoReturn::Exit(status)) => {
                self.exit(status);
                Continuation::Exited(status)
            }
            Err(NoReturn::Halt) => Continuation::PowerOff,
        }
    }
}

impl<P: Pager> Process<P> {
    fn dispatch(&mut self, no: SyscallNumber, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        match no {
            SyscallNumber::Halt => Err(NoReturn::Halt),
            SyscallNumber::Exit => Err(NoReturn::Exit(abi.arg1 as i32)),
            SyscallNumber::Fork => self.fork(abi),
            SyscallNumber::Exec => self.exec(abi),
            SyscallNumber::Wait => self.wait(abi),
            SyscallNumber::Create => self.create(abi),
            SyscallNumber::Remove => self.remove(abi),
            SyscallNumber::Open => self.open(abi),
            SyscallNumber::Filesize => self.filesize(abi),
            SyscallNumber::Read => {
                let buf = UserU8SliceWO::new(&self.mm_struct, abi.arg2, abi.arg3 as u32 as usize)?;
                self.read(abi, buf)
            }
            SyscallNumber::Write => {
                let buf = UserU8SliceRO::new(&self.mm_struct, abi.arg2, abi.arg3 as u32 as usize)?;
                self.write(abi, buf)
            }
            SyscallNumber::Seek => self.seek(abi),
            SyscallNumber::Tell => self.tell(abi),
            SyscallNumber::Close => self.close(abi),
            SyscallNumber::Mmap => Ok(self
                .mm_struct
                .mmap(&self.file_struct, abi)
                .unwrap_or(0)),
            SyscallNumber::Munmap => {
                if let Err(e) = self.mm_struct.munmap(abi) {
                    debug!("munmap({:#x}) failed: {:?}", abi.arg1, e);
                }
                Ok(0)
            }
        }
    }

    /// ```c
    /// bool create(const char *file, unsigned initial_size);
    /// ```
    fn create(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let path = UserCString::new(abi.arg1).read(&mut self.mm_struct)?;
        Ok(self.fs.create(&path, abi.arg2 as u32 as usize).is_ok() as usize)
    }

    /// ```c
    /// bool remove(const char *file);
    /// ```
    fn remove(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let path = UserCString::new(abi.arg1).read(&mut self.mm_struct)?;
        Ok(self.fs.remove(&path).is_ok() as usize)
    }

    /// ```c
    /// int open(const char *file);
    /// ```
    fn open(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let path = UserCString::new(abi.arg1).read(&mut self.mm_struct)?;
        let executable = path == self.name;
        Ok(self
            .file_struct
            .open(&self.fs, &path, executable)
            .map_or(SyscallAbi::ERROR, |fd| SyscallAbi::encode_int(fd.0)))
    }

    /// ```c
    /// int filesize(int fd);
    /// ```
    fn filesize(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let fd = FileDescriptor(abi.arg1 as i32);
        Ok(self.file_struct.filesize(fd).unwrap_or(SyscallAbi::ERROR))
    }

    /// ```c
    /// int read(int fd, void *buffer, unsigned size);
    /// ```
    fn read(&mut self, abi: &SyscallAbi, buf: UserU8SliceWO) -> Result<usize, NoReturn> {
        let fd = FileDescriptor(abi.arg1 as i32);
        let mut data = match kernel_buffer(buf.len()) {
            Ok(data) => data,
            Err(_) => return Ok(SyscallAbi::ERROR),
        };
        let n = match self.file_struct.read(fd, &mut data, &self.console) {
            Ok(n) => n,
            Err(_) => return Ok(SyscallAbi::ERROR),
        };
        Ok(buf
            .put(&mut self.mm_struct, &data[..n])
            .unwrap_or(SyscallAbi::ERROR))
    }

    /// ```c
    /// int write(int fd, const void *buffer, unsigned size);
    /// ```
    fn write(&mut self, abi: &SyscallAbi, buf: UserU8SliceRO) -> Result<usize, NoReturn> {
        let fd = FileDescriptor(abi.arg1 as i32);
        let data = match buf.get(&mut self.mm_struct) {
            Ok(data) => data,
            Err(_) => return Ok(0),
        };
        Ok(self
            .file_struct
            .write(fd, &data, &self.console)
            .unwrap_or(0))
    }

    /// ```c
    /// void seek(int fd, unsigned position);
    /// ```
    fn seek(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let fd = FileDescriptor(abi.arg1 as i32);
        let _ = self.file_struct.seek(fd, abi.arg2 as u32 as usize);
        Ok(0)
    }

    /// ```c
    /// unsigned tell(int fd);
    /// ```
    fn tell(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let fd = FileDescriptor(abi.arg1 as i32);
        Ok(self.file_struct.tell(fd).unwrap_or(SyscallAbi::ERROR))
    }

    /// ```c
    /// void close(int fd);
    /// ```
    fn close(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let fd = FileDescriptor(abi.arg1 as i32);
        let _ = self.file_struct.close(fd);
        Ok(0)
    }
}
