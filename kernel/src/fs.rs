//! Filesystem contract.
//!
//! The filesystem behind the system call boundary is a single resource shared
//! by every process, and it is not safe for concurrent mutation. Every call
//! that reads, writes, opens, creates, removes or closes a file must run
//! inside [`with_lock`], which holds [`FILESYS_LOCK`] for exactly the
//! duration of the closure. Reading the length of an already-open file is the
//! one documented exception: implementations of
//! [`traits::RegularFile::size`] must be safe to call without the lock.
//!
//! The kernel talks to a filesystem through two handles:
//! - [`FileSystem`]: the mounted filesystem (create, open, remove by name).
//! - [`RegularFile`]: a reference-counted handle to one file's inode.
use crate::{KernelError, sync::SpinLock};
use alloc::sync::Arc;

/// Traits implemented by a concrete filesystem.
pub mod traits {
    use super::InodeNumber;
    use crate::KernelError;

    /// A mounted filesystem with a flat namespace.
    pub trait FileSystem
    where
        Self: Sync + Send,
    {
        /// Creates a file named `name` of `initial_size` zero bytes.
        fn create(&self, name: &str, initial_size: usize) -> Result<(), KernelError>;

        /// Opens the file named `name`.
        fn open(&self, name: &str) -> Result<super::RegularFile, KernelError>;

        /// Removes the file named `name`. Open handles stay usable.
        fn remove(&self, name: &str) -> Result<(), KernelError>;
    }

    /// An inode of a regular file.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Inode number of the file.
        fn ino(&self) -> InodeNumber;

        /// Current length of the file in bytes. Must be safe to call without
        /// the filesystem lock.
        fn size(&self) -> usize;

        /// Reads from `position` into `buf`, returning the number of bytes
        /// read. Reading at or past the end returns `0`.
        fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes `buf` at `position`, returning the number of bytes written.
        /// Returns `0` while writes to the inode are denied.
        fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError>;

        /// Denies writes to the inode until a matching [`allow_write`].
        ///
        /// [`allow_write`]: RegularFile::allow_write
        fn deny_write(&self);

        /// Lifts one [`deny_write`].
        ///
        /// [`deny_write`]: RegularFile::deny_write
        fn allow_write(&self);
    }
}

/// The inode number of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeNumber(pub u32);

/// The lock that serializes every mutating filesystem call.
pub static FILESYS_LOCK: SpinLock<()> = SpinLock::new(());

/// Runs `f` while holding [`FILESYS_LOCK`].
///
/// The lock is released when `f` returns, whatever path it returns by.
/// Calls must not nest.
pub fn with_lock<R>(f: impl FnOnce() -> R) -> R {
    let guard = FILESYS_LOCK.lock();
    let r = f();
    guard.unlock();
    r
}

/// A handle to a mounted filesystem.
#[derive(Clone)]
pub struct FileSystem(pub Arc<dyn traits::FileSystem>);

impl FileSystem {
    /// Wraps a concrete filesystem.
    pub fn new(fs: impl traits::FileSystem + 'static) -> Self {
        Self(Arc::new(fs))
    }

    /// Creates a file. Takes the filesystem lock.
    pub fn create(&self, name: &str, initial_size: usize) -> Result<(), KernelError> {
        with_lock(|| self.0.create(name, initial_size))
    }

    /// Opens a file. Takes the filesystem lock.
    pub fn open(&self, name: &str) -> Result<RegularFile, KernelError> {
        with_lock(|| self.0.open(name))
    }

    /// Removes a file. Takes the filesystem lock.
    pub fn remove(&self, name: &str) -> Result<(), KernelError> {
        with_lock(|| self.0.remove(name))
    }
}

/// A handle to a regular file's inode.
///
/// Cloning the handle shares the inode. The methods here do not take the
/// filesystem lock; callers wrap them in [`with_lock`].
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Wraps a concrete inode.
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Inode number of the file.
    #[inline]
    pub fn ino(&self) -> InodeNumber {
        self.0.ino()
    }

    /// Length of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Reads from `position` into `buf`.
    #[inline]
    pub fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.read(position, buf)
    }

    /// Writes `buf` at `position`.
    #[inline]
    pub fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.write(position, buf)
    }

    /// Denies writes to the inode.
    #[inline]
    pub fn deny_write(&self) {
        self.0.deny_write()
    }

    /// Lifts one write denial.
    #[inline]
    pub fn allow_write(&self) {
        self.0.allow_write()
    }
}

impl core::fmt::Debug for RegularFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("RegularFile").field(&self.ino()).finish()
    }
}
