//! # Lazy Paging
//!
//! [`LazyPager`] is the reference [`Pager`]. It defers frame allocation until
//! a page is first touched, recording only **metadata** when a region is
//! mapped. Mapping a region records one [`VmAreaStruct`]; whatever its length,
//! no per-page state exists until a page is touched. The supplemental page
//! table then gains one [`SptEntry`] holding the frame.
//!
//! Each [`VmAreaStruct`] carries an [`MmLoader`], which knows how to produce
//! the contents of a page of its region ([`AnonLoader`] zero-fills,
//! [`FileBackedLoader`] reads from a file) and how to persist a modified page
//! when the region is torn down.
//!
//! File-backed regions are only created through [`Pager::mmap`]; anonymous
//! regions (the user stack, data segments) through
//! [`LazyPager::map_anonymous`], which the program loader calls.
use crate::pager::{PageDescription, PageKind, Pager};
use alloc::{collections::BTreeMap, sync::Arc};
use core::ops::Range;
use kernel::{
    KernelError,
    addressing::{KERN_BASE, PAGE_SIZE, Va},
    fs::{self, RegularFile},
    mm::{Page, Permission},
};

/// A trait for loading the contents of a virtual memory page on demand.
pub trait MmLoader
where
    Self: Send + Sync,
{
    /// Loads and returns the content for the page at `addr`.
    ///
    /// `addr` is page-aligned and guaranteed to lie within the area associated
    /// with this loader.
    fn load(&self, addr: Va) -> Result<Page, KernelError>;

    /// Persists a modified page at `addr` when its area is torn down.
    fn write_back(&self, _addr: Va, _page: &Page) -> Result<(), KernelError> {
        Ok(())
    }

    /// Describes where the page at `addr` comes from.
    fn kind(&self, addr: Va) -> PageKind;
}

/// A loader for anonymous memory regions.
pub struct AnonLoader {}

impl MmLoader for AnonLoader {
    fn load(&self, _addr: Va) -> Result<Page, KernelError> {
        Ok(Page::new())
    }

    fn kind(&self, _addr: Va) -> PageKind {
        PageKind::Anonymous
    }
}

/// A loader for file-backed memory regions.
///
/// Page `i` of the region holds the bytes of `file` starting at
/// `offset + i * PAGE_SIZE`. Bytes past `file_end` (the length of the file
/// when the region was mapped) read as zero, and are never written back.
pub struct FileBackedLoader {
    file: RegularFile,
    base: Va,
    offset: usize,
    file_end: usize,
}

impl FileBackedLoader {
    fn position(&self, addr: Va) -> usize {
        self.offset + (addr - self.base)
    }

    /// Number of bytes of the page at `addr` that come from the file.
    fn read_bytes(&self, addr: Va) -> usize {
        self.file_end
            .saturating_sub(self.position(addr))
            .min(PAGE_SIZE)
    }
}

impl MmLoader for FileBackedLoader {
    fn load(&self, addr: Va) -> Result<Page, KernelError> {
        let mut page = Page::new();
        let len = self.read_bytes(addr);
        if len != 0 {
            let position = self.position(addr);
            fs::with_lock(|| self.file.read(position, &mut page.inner_mut()[..len]))?;
        }
        Ok(page)
    }

    fn write_back(&self, addr: Va, page: &Page) -> Result<(), KernelError> {
        let len = self.read_bytes(addr);
        if len != 0 {
            let position = self.position(addr);
            fs::with_lock(|| self.file.write(position, &page.inner()[..len]))?;
        }
        Ok(())
    }

    fn kind(&self, addr: Va) -> PageKind {
        PageKind::FileBacked {
            ino: self.file.ino(),
            offset: self.position(addr),
            mapping: self.base,
        }
    }
}

/// A contiguous range of pages that share a permission and a loader,
/// corresponding to the Linux kernel's `struct vm_area_struct`.
#[derive(Clone)]
pub struct VmAreaStruct {
    /// How pages of the area are populated.
    pub loader: Arc<dyn MmLoader>,
    /// Pages covered by the area.
    pub range: Range<Va>,
    /// Permission of every page of the area.
    pub permission: Permission,
    /// Whether the area was created by `mmap` and may be unmapped by
    /// `munmap`.
    pub mmapped: bool,
}

/// A touched page of the supplemental page table.
#[derive(Clone)]
pub struct SptEntry {
    /// The frame loaded on first touch.
    frame: Page,
    /// Whether the frame was handed out for writing.
    dirty: bool,
}

/// The [`LazyPager`] structure implements lazy paging, where pages are
/// populated when first accessed instead of during `mmap` calls.
///
/// `areas` is keyed by the base of each area and the areas never overlap.
/// `spt` only holds pages that were touched, each inside one of the areas.
#[derive(Clone, Default)]
pub struct LazyPager {
    spt: BTreeMap<Va, SptEntry>,
    areas: BTreeMap<Va, VmAreaStruct>,
}

impl LazyPager {
    /// Returns the area covering `va`.
    fn area_of(&self, va: Va) -> Option<&VmAreaStruct> {
        self.areas
            .range(..=va)
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.range.contains(&va))
    }

    /// Records a new area covering `range`.
    ///
    /// Fails without side effects when any page is already owned.
    fn insert_area(
        &mut self,
        range: Range<Va>,
        permission: Permission,
        loader: Arc<dyn MmLoader>,
        mmapped: bool,
    ) -> Result<(), KernelError> {
        if range.start >= range.end || !range.start.is_page_aligned() {
            return Err(KernelError::InvalidArgument);
        }
        if self.overlaps(range.clone()) {
            return Err(KernelError::InvalidArgument);
        }
        self.areas.insert(
            range.start,
            VmAreaStruct {
                loader,
                range,
                permission,
                mmapped,
            },
        );
        Ok(())
    }

    /// Removes the area starting at `base` and its touched pages, writing
    /// back dirty pages of a writable area.
    fn remove_area(&mut self, base: Va) -> Option<VmAreaStruct> {
        let area = self.areas.remove(&base)?;
        let mut touched = self.spt.split_off(&area.range.start);
        let mut rest = touched.split_off(&area.range.end);
        self.spt.append(&mut rest);
        if area.permission.contains(Permission::WRITE) {
            for (va, entry) in touched.iter().filter(|(_, entry)| entry.dirty) {
                if let Err(e) = area.loader.write_back(*va, &entry.frame) {
                    warning!("munmap: write-back of {:#x} failed: {:?}", va.into_usize(), e);
                }
            }
        }
        Some(area)
    }

    /// Maps `pages` zero-filled pages at `addr`.
    ///
    /// Used by the program loader for the user stack and for segments with
    /// no file contents.
    pub fn map_anonymous(
        &mut self,
        addr: Va,
        pages: usize,
        writable: bool,
    ) -> Result<(), KernelError> {
        let end = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|len| addr.checked_add(len))
            .ok_or(KernelError::InvalidArgument)?;
        if end.into_usize() > KERN_BASE {
            return Err(KernelError::BadAddress);
        }
        self.insert_area(
            addr..end,
            Permission::user(writable),
            Arc::new(AnonLoader {}),
            false,
        )
    }

    /// Returns the mapping regions created by `mmap`.
    pub fn mappings(&self) -> impl Iterator<Item = &VmAreaStruct> {
        self.areas.values().filter(|area| area.mmapped)
    }

    /// Number of pages that have a frame.
    pub fn resident_pages(&self) -> usize {
        self.spt.len()
    }
}

impl Pager for LazyPager {
    fn new() -> Self {
        Self::default()
    }

    fn find_page(&self, va: Va) -> Option<PageDescription> {
        let va = va.page_down();
        let area = self.area_of(va)?;
        Some(PageDescription {
            va,
            permission: area.permission,
            kind: area.loader.kind(va),
            resident: self.spt.contains_key(&va),
        })
    }

    fn overlaps(&self, range: Range<Va>) -> bool {
        let start = range.start.page_down();
        self.areas
            .range(..range.end)
            .next_back()
            .is_some_and(|(_, area)| area.range.end > start)
    }

    fn get_user_page(&mut self, va: Va, is_write: bool) -> Option<(&mut Page, Permission)> {
        let va = va.page_down();
        let area = self.area_of(va)?;
        let permission = area.permission;
        if !self.spt.contains_key(&va) {
            let frame = match area.loader.load(va) {
                Ok(frame) => frame,
                Err(e) => {
                    warning!("lazy load of {:#x} failed: {:?}", va.into_usize(), e);
                    return None;
                }
            };
            self.spt.insert(va, SptEntry { frame, dirty: false });
        }
        let entry = self.spt.get_mut(&va)?;
        if is_write && permission.contains(Permission::WRITE) {
            entry.dirty = true;
        }
        Some((&mut entry.frame, permission))
    }

    fn mmap(
        &mut self,
        addr: Va,
        size: usize,
        writable: bool,
        file: RegularFile,
        offset: usize,
    ) -> Result<usize, KernelError> {
        let file_end = file.size();
        if size == 0 || file_end == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let end = addr
            .checked_add(size)
            .and_then(Va::page_up)
            .ok_or(KernelError::InvalidArgument)?;
        let loader = FileBackedLoader {
            file,
            base: addr,
            offset,
            file_end,
        };
        self.insert_area(
            addr..end,
            Permission::user(writable),
            Arc::new(loader),
            true,
        )?;
        Ok(addr.into_usize())
    }

    fn munmap(&mut self, addr: Va) -> Result<usize, KernelError> {
        match self.areas.get(&addr) {
            Some(area) if area.mmapped => {
                // The area may hold the last handle to its file.
                let area = self.remove_area(addr);
                fs::with_lock(|| drop(area));
                Ok(0)
            }
            _ => Err(KernelError::InvalidArgument),
        }
    }

    fn destroy(&mut self) {
        while let Some(base) = self.areas.keys().next().copied() {
            let area = self.remove_area(base);
            fs::with_lock(|| drop(area));
        }
        self.spt.clear();
    }

    fn duplicate(&self) -> Result<Self, KernelError> {
        Ok(self.clone())
    }
}
