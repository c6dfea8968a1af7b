//! # User memory access.
//!
//! Kernel **MUST NOT** believe the user input. Any pointer a user program
//! passes in a system call argument may be null, may point into the kernel,
//! or may name memory the program never mapped. This module is the only path
//! by which the boundary touches user memory, and it validates before it
//! touches.
//!
//! A user address is **valid** if it is non-null, below [`KERN_BASE`], and
//! covered by an entry of the process's supplemental page table. Residency
//! does not matter: a lazily mapped page that was never touched is valid.
//!
//! An invalid pointer is a fatal error for the program. The validators return
//! [`NoReturn::Exit`]`(-1)` and every caller propagates it with `?`, so no
//! side effect of the system call happens after a failed check.
//!
//! - [`check_address`]: validates a single address.
//! - [`check_buffer`]: validates every page of a range, and for buffers the
//!   kernel writes into, that every page is writable.
//! - [`UserU8SliceRO`] / [`UserU8SliceWO`]: a buffer that passed
//!   [`check_buffer`], and the only way to copy bytes from or to it.
//! - [`UserCString`]: a NUL-terminated string, validated page by page while it
//!   is read.
//!
//! [`KERN_BASE`]: kernel::addressing::KERN_BASE
use crate::{
    NoReturn,
    mm_struct::MmStruct,
    pager::{PageDescription, Pager},
};
use alloc::{ffi::CString, string::String, vec::Vec};
use kernel::{
    KernelError,
    addressing::{PAGE_MASK, PAGE_SIZE, Va},
};

fn fault(addr: usize, reason: &str) -> NoReturn {
    warning!("uaccess: {} at {:#x}", reason, addr);
    NoReturn::Exit(-1)
}

/// Validates a single user address.
///
/// Returns the description of the page covering `addr`.
pub fn check_address<P: Pager>(
    mm: &MmStruct<P>,
    addr: usize,
) -> Result<PageDescription, NoReturn> {
    let va = Va::new(addr)
        .filter(|va| va.is_user())
        .ok_or_else(|| fault(addr, "not a user address"))?;
    mm.find_page(va).ok_or_else(|| fault(addr, "unmapped address"))
}

/// Validates the `len`-byte range starting at `addr`.
///
/// Checks one address per page the range touches (the first byte, then the
/// start of every following page up to the last byte). With `to_write`, each
/// of those pages must also be writable. An empty range is always valid.
pub fn check_buffer<P: Pager>(
    mm: &MmStruct<P>,
    addr: usize,
    len: usize,
    to_write: bool,
) -> Result<(), NoReturn> {
    if len == 0 {
        return Ok(());
    }
    let last = addr
        .checked_add(len - 1)
        .ok_or_else(|| fault(addr, "buffer wraps around"))?;
    let mut cursor = addr;
    loop {
        let page = check_address(mm, cursor)?;
        if to_write && !page.is_writable() {
            return Err(fault(cursor, "read-only page"));
        }
        // `cursor` is below KERN_BASE here, so this cannot overflow.
        let next = (cursor & !PAGE_MASK) + PAGE_SIZE;
        if next > last {
            return Ok(());
        }
        cursor = next;
    }
}

/// Copies between a validated user range and a kernel buffer, one page at a
/// time.
fn copy_pages<P: Pager>(
    mm: &mut MmStruct<P>,
    addr: usize,
    len: usize,
    is_write: bool,
    mut f: impl FnMut(&mut [u8], usize),
) -> Result<(), KernelError> {
    let mut done = 0;
    while done < len {
        let va = Va::new(addr + done).ok_or(KernelError::BadAddress)?;
        let offset = va.offset();
        let n = (PAGE_SIZE - offset).min(len - done);
        mm.get_user_page_and(va, is_write, |page, _| {
            f(&mut page.inner_mut()[offset..offset + n], done)
        })?;
        done += n;
    }
    Ok(())
}

/// Allocates a zeroed kernel buffer of `len` bytes, failing instead of
/// aborting when memory is exhausted.
pub fn kernel_buffer(len: usize) -> Result<Vec<u8>, KernelError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| KernelError::NoMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// A one-time, read-only view of a user buffer that passed validation.
#[derive(Debug)]
pub struct UserU8SliceRO {
    addr: usize,
    len: usize,
}

impl UserU8SliceRO {
    /// Validates `len` readable bytes at `addr`.
    pub fn new<P: Pager>(mm: &MmStruct<P>, addr: usize, len: usize) -> Result<Self, NoReturn> {
        check_buffer(mm, addr, len, false)?;
        Ok(Self { addr, len })
    }

    /// Length of the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the buffer into kernel memory.
    pub fn get<P: Pager>(self, mm: &mut MmStruct<P>) -> Result<Vec<u8>, KernelError> {
        let mut buf = kernel_buffer(self.len)?;
        copy_pages(mm, self.addr, self.len, false, |user, at| {
            buf[at..at + user.len()].copy_from_slice(user)
        })?;
        Ok(buf)
    }
}

/// A one-time, write-only view of a user buffer that passed validation,
/// including the writability check.
#[derive(Debug)]
pub struct UserU8SliceWO {
    addr: usize,
    len: usize,
}

impl UserU8SliceWO {
    /// Validates `len` writable bytes at `addr`.
    pub fn new<P: Pager>(mm: &MmStruct<P>, addr: usize, len: usize) -> Result<Self, NoReturn> {
        check_buffer(mm, addr, len, true)?;
        Ok(Self { addr, len })
    }

    /// Length of the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty buffer.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies `data` to the start of the buffer, truncated to its length.
    ///
    /// Returns the number of bytes copied.
    pub fn put<P: Pager>(self, mm: &mut MmStruct<P>, data: &[u8]) -> Result<usize, KernelError> {
        let len = self.len.min(data.len());
        copy_pages(mm, self.addr, len, true, |user, at| {
            user.copy_from_slice(&data[at..at + user.len()])
        })?;
        Ok(len)
    }
}

/// A NUL-terminated string in user memory.
#[derive(Debug)]
pub struct UserCString {
    addr: usize,
}

impl UserCString {
    /// Names the string starting at `addr`. Nothing is checked yet.
    pub fn new(addr: usize) -> Self {
        Self { addr }
    }

    /// Reads the bytes of the string, without the terminator.
    ///
    /// The first byte and every page boundary crossed before the terminator
    /// are checked with [`check_address`]. Running out of memory for the copy
    /// is fatal, like an invalid pointer.
    fn bytes<P: Pager>(self, mm: &mut MmStruct<P>) -> Result<Vec<u8>, NoReturn> {
        let mut bytes = Vec::new();
        let mut cursor = self.addr;
        loop {
            check_address(mm, cursor)?;
            let va = Va::new(cursor).ok_or_else(|| fault(cursor, "not a user address"))?;
            let offset = va.offset();
            let copied = mm
                .get_user_page_and(va, false, |page, _| {
                    let tail = &page.inner()[offset..];
                    let (chunk, terminated) = match tail.iter().position(|b| *b == 0) {
                        Some(nul) => (&tail[..nul], true),
                        None => (tail, false),
                    };
                    bytes.try_reserve(chunk.len()).ok()?;
                    bytes.extend_from_slice(chunk);
                    Some(terminated)
                })
                .map_err(|_| fault(cursor, "page could not be loaded"))?;
            let terminated = copied.ok_or_else(|| fault(cursor, "out of memory copying string"))?;
            if terminated {
                return Ok(bytes);
            }
            cursor = (cursor & !PAGE_MASK) + PAGE_SIZE;
        }
    }

    /// Reads the string as a file name.
    ///
    /// Bytes that are not UTF-8 are replaced with `U+FFFD`.
    pub fn read<P: Pager>(self, mm: &mut MmStruct<P>) -> Result<String, NoReturn> {
        let bytes = self.bytes(mm)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Copies the string, terminator included, into a private kernel buffer
    /// of exactly `strlen + 1` bytes.
    ///
    /// Running out of memory for the copy is fatal for the caller.
    pub fn read_cstring<P: Pager>(self, mm: &mut MmStruct<P>) -> Result<CString, NoReturn> {
        let addr = self.addr;
        let bytes = self.bytes(mm)?;
        let mut private = Vec::new();
        if private.try_reserve_exact(bytes.len() + 1).is_err() {
            return Err(fault(addr, "out of memory copying string"));
        }
        private.extend_from_slice(&bytes);
        private.push(0);
        CString::from_vec_with_nul(private).map_err(|_| fault(addr, "malformed string"))
    }
}
