//! Page frames and page permissions.
use crate::addressing::PAGE_SIZE;
use alloc::boxed::Box;

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    ///
    /// The [`Permission`] allows you to specify memory access permissions such as:
    /// - Whether a page is readable.
    /// - Whether a page is writable.
    /// - Whether a page is executable.
    /// - Whether a page can be accessed by user applications.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}

impl Permission {
    /// Readable user page, optionally writable.
    pub fn user(writable: bool) -> Self {
        if writable {
            Permission::READ | Permission::WRITE | Permission::USER
        } else {
            Permission::READ | Permission::USER
        }
    }
}

/// A single page-sized, page-aligned frame of memory owned by the kernel.
pub struct Page {
    inner: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Allocates a zero-filled page.
    pub fn new() -> Self {
        Self {
            inner: Box::new([0; PAGE_SIZE]),
        }
    }

    /// Returns the contents of the page.
    pub fn inner(&self) -> &[u8; PAGE_SIZE] {
        &self.inner
    }

    /// Returns the contents of the page for modification.
    pub fn inner_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.inner
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Page {
    fn clone(&self) -> Self {
        let mut page = Page::new();
        page.inner_mut().copy_from_slice(self.inner());
        page
    }
}
