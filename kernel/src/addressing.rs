//! Virtual addressing.
//!
//! The address space of every process is split at [`KERN_BASE`]: addresses
//! below it belong to the user program, addresses at or above it belong to
//! the kernel. A user program may name any address in a system call argument,
//! so the split is the first thing the kernel checks before trusting a
//! pointer.
//!
//! [`Va`] wraps a canonical x86-64 virtual address and supports the usual
//! page arithmetic (`page_down`, `page_up`, `offset`) and `+`/`-` with byte
//! counts.
use core::ops::{Add, AddAssign, Sub};

/// The size of a single page in memory, in bytes.
pub const PAGE_SIZE: usize = 0x1000;

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// The lowest kernel virtual address.
///
/// Every address at or above this value belongs to the kernel.
pub const KERN_BASE: usize = 0x80_0400_0000;

/// A virtual address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address is canonical.
    ///
    /// Returns `None` when the upper 17 bits are neither all zero nor all one.
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            m if m == 0xffff_8000_0000_0000 || m == 0 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Returns the raw `usize` representation of the virtual address.
    #[inline(always)]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Returns `true` for the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the address lies in kernel space.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= KERN_BASE
    }

    /// Returns `true` if a user program may legally name this address:
    /// non-null and below [`KERN_BASE`].
    #[inline]
    pub const fn is_user(self) -> bool {
        !self.is_null() && !self.is_kernel()
    }

    /// Rounds the address down to its page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Rounds the address up to the next page boundary.
    ///
    /// Returns `None` on overflow.
    #[inline]
    pub const fn page_up(self) -> Option<Self> {
        match self.0.checked_add(PAGE_MASK) {
            Some(v) => Va::new(v & !PAGE_MASK),
            None => None,
        }
    }

    /// Returns the offset of the address within its page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Returns `true` if the address is on a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.offset() == 0
    }

    /// Adds `bytes`, returning `None` on overflow or if the result is not
    /// canonical.
    #[inline]
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Va::new(v),
            None => None,
        }
    }
}

impl Add<usize> for Va {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Va(self.0 + rhs)
    }
}

impl AddAssign<usize> for Va {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub<usize> for Va {
    type Output = Self;

    fn sub(self, rhs: usize) -> Self {
        Va(self.0 - rhs)
    }
}

impl Sub<Va> for Va {
    type Output = usize;

    fn sub(self, rhs: Va) -> usize {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_kernel_split() {
        assert!(!Va::new(0).unwrap().is_user(), "null is never a user address");
        assert!(Va::new(0x1000).unwrap().is_user());
        assert!(Va::new(KERN_BASE - 1).unwrap().is_user());
        assert!(Va::new(KERN_BASE).unwrap().is_kernel());
        assert!(Va::new(0xffff_8000_0000_0000).unwrap().is_kernel());
        assert!(Va::new(0x0000_8000_0000_0000).is_none(), "non-canonical");
    }

    #[test]
    fn page_arithmetic() {
        let va = Va::new(0x4000_1234).unwrap();
        assert_eq!(va.page_down().into_usize(), 0x4000_1000);
        assert_eq!(va.page_up().unwrap().into_usize(), 0x4000_2000);
        assert_eq!(va.offset(), 0x234);
        assert!(!va.is_page_aligned());
        assert!(va.page_down().is_page_aligned());
        assert_eq!(va.page_down().page_up(), Some(va.page_down()));
        assert_eq!(va - va.page_down(), 0x234);
        assert!(Va::new(usize::MAX).unwrap().checked_add(1).is_none());
    }
}
