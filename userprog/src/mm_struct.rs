//! # Memory State of a process
//!
//! The state of a process's memory is represented by the [`MmStruct`]
//! structure, similar to the Linux kernel's `struct mm_struct`. It owns the
//! process's [`Pager`] and serves the memory mapping system calls, **mmap**
//! and **munmap**.
//!
//! ## The mapping gate
//!
//! A user program may pass anything as `mmap` arguments, but a [`Pager`] is
//! only ever asked to map a request that is structurally sound.
//! [`MmStruct::mmap`] checks, in this order, and rejects the request with no
//! side effect at the first failure:
//!
//! 1. the file offset is non-negative and a multiple of [`PAGE_SIZE`];
//! 2. the address is non-null and page-aligned;
//! 3. the address lies in user space;
//! 4. the descriptor is not one of the console descriptors;
//! 5. the length, read as a signed quantity, is strictly positive;
//! 6. the end of the range does not wrap and stays in user space;
//! 7. no page of the range is already owned by the process;
//! 8. the descriptor names an open file.
//!
//! The mapping is then made with an independent handle to the file, so
//! closing the descriptor afterwards leaves the mapping intact.
//!
//! `munmap` forwards the address to the pager unchanged; the pager rejects an
//! address that is not the base of a mapping.
use crate::{
    file_struct::{FileDescriptor, FileStruct, STDIN, STDOUT},
    pager::{PageDescription, Pager},
    syscall::SyscallAbi,
};
use kernel::{
    KernelError,
    addressing::{KERN_BASE, PAGE_SIZE, Va},
    fs::RegularFile,
    mm::{Page, Permission},
};

/// The [`MmStruct`] represents the memory state for a specific process.
pub struct MmStruct<P: Pager> {
    /// The pager that owns the supplemental page table.
    pub pager: P,
}

impl<P: Pager> Default for MmStruct<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pager> MmStruct<P> {
    /// Creates a new [`MmStruct`] with an empty address space.
    pub fn new() -> Self {
        Self { pager: P::new() }
    }

    /// Looks up the page covering `va` without loading it.
    #[inline]
    pub fn find_page(&self, va: Va) -> Option<PageDescription> {
        self.pager.find_page(va)
    }

    /// Runs `f` on the frame behind the page covering `va`, loading the page
    /// first if needed.
    ///
    /// Fails with [`KernelError::BadAddress`] if the page is not owned or
    /// cannot be loaded.
    pub fn get_user_page_and<R>(
        &mut self,
        va: Va,
        is_write: bool,
        f: impl FnOnce(&mut Page, Permission) -> R,
    ) -> Result<R, KernelError> {
        self.pager
            .get_user_page(va, is_write)
            .map(|(page, permission)| f(page, permission))
            .ok_or(KernelError::BadAddress)
    }

    /// Hands a request that passed the mapping gate to the pager.
    pub fn do_mmap(
        &mut self,
        addr: Va,
        size: usize,
        writable: bool,
        file: RegularFile,
        offset: usize,
    ) -> Result<usize, KernelError> {
        self.pager.mmap(addr, size, writable, file, offset)
    }

    /// Maps a file into the process's virtual address space.
    ///
    /// ```c
    /// void *mmap(void *addr, size_t length, int writable, int fd, off_t offset);
    /// ```
    ///
    /// # Returns
    /// - `Ok(addr)`: the base of the new mapping.
    /// - `Err([KernelError])`: the request was rejected and nothing changed.
    ///   The caller reports this as `NULL`.
    pub fn mmap(&mut self, fstate: &FileStruct, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let addr = abi.arg1;
        let length = abi.arg2;
        let writable = abi.arg3 as i32 != 0;
        let fd = FileDescriptor(abi.arg4 as i32);
        let offset = abi.arg5 as i32;

        if offset < 0 || offset as usize % PAGE_SIZE != 0 {
            debug!("mmap: misaligned offset {:#x}", offset);
            return Err(KernelError::InvalidArgument);
        }
        let base = Va::new(addr).ok_or(KernelError::BadAddress)?;
        if base.is_null() || !base.is_page_aligned() {
            debug!("mmap: bad address {:#x}", addr);
            return Err(KernelError::InvalidArgument);
        }
        if base.is_kernel() {
            debug!("mmap: kernel address {:#x}", addr);
            return Err(KernelError::BadAddress);
        }
        if fd == STDIN || fd == STDOUT {
            debug!("mmap: console descriptor {}", fd.0);
            return Err(KernelError::BadFileDescriptor);
        }
        if length as isize <= 0 {
            debug!("mmap: bad length {:#x}", length);
            return Err(KernelError::InvalidArgument);
        }
        let end = base
            .checked_add(length)
            .filter(|end| end.into_usize() <= KERN_BASE)
            .ok_or(KernelError::BadAddress)?;
        if self.pager.overlaps(base..end) {
            debug!("mmap: {:#x}..{:#x} overlaps", addr, end.into_usize());
            return Err(KernelError::InvalidArgument);
        }
        let file = fstate
            .get_file(fd)
            .ok_or(KernelError::BadFileDescriptor)?
            .reopen();

        self.do_mmap(base, length, writable, file, offset as usize)
    }

    /// Unmaps the mapping whose base is `abi.arg1`.
    ///
    /// ```c
    /// void munmap(void *addr);
    /// ```
    pub fn munmap(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let addr = Va::new(abi.arg1).ok_or(KernelError::InvalidArgument)?;
        self.pager.munmap(addr)
    }

    /// Creates a copy of the memory state for a forked child.
    pub fn duplicate(&self) -> Result<Self, KernelError> {
        Ok(Self {
            pager: self.pager.duplicate()?,
        })
    }
}
