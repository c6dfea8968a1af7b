//! # Virtual memory contract.
//!
//! The system call boundary never walks a page table. It asks a [`Pager`],
//! which owns the process's **supplemental page table**: the record of every
//! virtual page the process legally owns and how to produce its contents on
//! first touch (zero-fill, or read from a file at an offset). A page is
//! described there whether or not it is currently resident.
//!
//! The boundary relies on the pager for three things:
//! - [`Pager::find_page`]: is this page owned by the process, and with what
//!   permission? Used by the user-address validator and the mmap overlap
//!   check. It never loads the page.
//! - [`Pager::get_user_page`]: the frame behind an owned page, loading it if
//!   needed. Used to copy bytes to and from validated user buffers.
//! - [`Pager::mmap`] / [`Pager::munmap`]: install and tear down file-backed
//!   mappings once the mapping gate has accepted the request.
use core::ops::Range;
use kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::{InodeNumber, RegularFile},
    mm::{Page, Permission},
};

/// How the contents of a page are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Zero-filled on first touch.
    Anonymous,
    /// Read from a file on first touch, and part of the mapping region that
    /// starts at `mapping`.
    FileBacked {
        /// Inode backing the page.
        ino: InodeNumber,
        /// Offset in the file of the first byte of the page.
        offset: usize,
        /// Base address of the mapping region the page belongs to.
        mapping: Va,
    },
}

/// An entry of the supplemental page table, as seen by the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescription {
    /// Page-aligned address of the page.
    pub va: Va,
    /// Permission the process has on the page.
    pub permission: Permission,
    /// Where the page's contents come from.
    pub kind: PageKind,
    /// Whether a frame currently backs the page.
    pub resident: bool,
}

impl PageDescription {
    /// Returns `true` if the process may write to the page.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.permission.contains(Permission::WRITE)
    }
}

/// The [`Pager`] trait defines the interface for memory paging operations
/// the system call boundary depends on.
pub trait Pager {
    /// Creates an empty address space.
    fn new() -> Self
    where
        Self: Sized;

    /// Looks up the supplemental page table entry covering `va`.
    ///
    /// Returns `None` if the process does not own the page. Never loads the
    /// page.
    fn find_page(&self, va: Va) -> Option<PageDescription>;

    /// Returns `true` if any page in `range` is owned by the process.
    fn overlaps(&self, range: Range<Va>) -> bool {
        let mut va = range.start.page_down();
        while va < range.end {
            if self.find_page(va).is_some() {
                return true;
            }
            va += PAGE_SIZE;
        }
        false
    }

    /// Returns the frame behind the page covering `va`, loading it first if
    /// it is not resident.
    ///
    /// `is_write` reports that the caller is about to modify the frame, which
    /// marks a writable page dirty.
    ///
    /// Returns `None` if the process does not own the page or the page could
    /// not be loaded.
    fn get_user_page(&mut self, va: Va, is_write: bool) -> Option<(&mut Page, Permission)>;

    /// Installs a lazily loaded mapping of `size` bytes of `file`, starting at
    /// `offset`, at `addr`.
    ///
    /// Bytes of the last page past the end of the file read as zero.
    ///
    /// # Returns
    /// - `Ok(addr)`: the base of the new mapping region.
    /// - `Err([KernelError])`: nothing was mapped.
    fn mmap(
        &mut self,
        addr: Va,
        size: usize,
        writable: bool,
        file: RegularFile,
        offset: usize,
    ) -> Result<usize, KernelError>;

    /// Tears down the mapping region whose base is `addr`, writing dirty
    /// writable pages back to the file.
    ///
    /// An `addr` that is not the base of a live region is rejected without
    /// side effects.
    fn munmap(&mut self, addr: Va) -> Result<usize, KernelError>;

    /// Tears down every page of the address space, unmapping all mapping
    /// regions as [`Pager::munmap`] does.
    fn destroy(&mut self);

    /// Creates a copy of the address space for a forked child.
    fn duplicate(&self) -> Result<Self, KernelError>
    where
        Self: Sized;
}
