//! # File state of a process.
//!
//! Processes interact with files through **file descriptors**, small integers
//! that index the process's file descriptor table. The open file objects
//! themselves live in kernel memory and are never reachable from user space;
//! a descriptor is an opaque reference to one of them.
//!
//! Two descriptors are reserved and never name a table slot:
//! - **Standard Input ([`STDIN`], descriptor 0)**: reads come from the
//!   process console, writes are ignored.
//! - **Standard Output ([`STDOUT`], descriptor 1)**: writes go to the process
//!   console, reads fail.
//!
//! Every other descriptor below [`MAX_FD`] is a slot of the table. A slot is
//! either empty or holds exactly one [`File`], and a [`File`] is held by
//! exactly one slot: it is not `Clone`, so releasing a slot hands the handle
//! back to the caller, which closes it once.
//!
//! New descriptors are allocated by scanning upward from a low-water cursor;
//! releasing a descriptor below the cursor lowers it, so the lowest free
//! descriptor is always reused first.
//!
//! Every filesystem call made on behalf of these handlers (open, read, write,
//! close) runs under [`fs::with_lock`]. Reading the length of an open file is
//! the one call made without it.
use alloc::boxed::Box;
use kernel::{
    KernelError,
    fs::{self, FileSystem, RegularFile},
    teletype::Console,
};

/// Number of descriptors of a process, including the reserved ones.
pub const MAX_FD: usize = 128;

/// Standard input.
pub const STDIN: FileDescriptor = FileDescriptor(0);

/// Standard output.
pub const STDOUT: FileDescriptor = FileDescriptor(1);

/// Represents an index into a process's file descriptor table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct FileDescriptor(pub i32);

impl FileDescriptor {
    /// Returns the table slot the descriptor names, if any.
    fn slot(self) -> Option<usize> {
        match usize::try_from(self.0) {
            Ok(slot) if slot > STDOUT.0 as usize && slot < MAX_FD => Some(slot),
            _ => None,
        }
    }
}

/// An open file: a handle to the inode plus the process's position in it.
pub struct File {
    file: RegularFile,
    position: usize,
    deny_write: bool,
}

impl File {
    /// Wraps a freshly opened inode, positioned at the start.
    pub fn new(file: RegularFile) -> Self {
        Self {
            file,
            position: 0,
            deny_write: false,
        }
    }

    /// Denies writes to the inode for as long as this handle is open.
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.file.deny_write();
        }
    }

    /// Returns `true` if this handle holds a write denial.
    pub fn denies_write(&self) -> bool {
        self.deny_write
    }

    /// Reads at the current position and advances it. Callers hold the
    /// filesystem lock.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        let n = self.file.read(self.position, buf)?;
        self.position += n;
        Ok(n)
    }

    /// Writes at the current position and advances it. Callers hold the
    /// filesystem lock.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        let n = self.file.write(self.position, buf)?;
        self.position += n;
        Ok(n)
    }

    /// Moves the position. Positions past the end are allowed.
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Returns the position.
    pub fn tell(&self) -> usize {
        self.position
    }

    /// Returns the length of the file.
    pub fn size(&self) -> usize {
        self.file.size()
    }

    /// Returns an independent handle to the same inode.
    pub fn reopen(&self) -> RegularFile {
        self.file.clone()
    }

    /// Creates a handle to the same inode with the same position and write
    /// denial, for a forked child.
    pub fn duplicate(&self) -> Self {
        let mut file = File::new(self.reopen());
        file.position = self.position;
        if self.deny_write {
            file.deny_write();
        }
        file
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.deny_write {
            self.file.allow_write();
        }
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("file", &self.file)
            .field("position", &self.position)
            .field("deny_write", &self.deny_write)
            .finish()
    }
}

/// Returned by [`FileStruct::install_file`] when every slot is occupied.
///
/// Carries the handle back so the caller can close it.
#[derive(Debug)]
pub struct TableFull(pub File);

/// The [`FileStruct`] represents the filesystem state for a specific process,
/// corresponding to the Linux kernel's `struct files_struct`.
pub struct FileStruct {
    files: Box<[Option<File>; MAX_FD]>,
    next_fd: usize,
}

impl Default for FileStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStruct {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            files: Box::new(core::array::from_fn(|_| None)),
            next_fd: STDOUT.0 as usize + 1,
        }
    }

    /// Installs `file` in the lowest free slot.
    pub fn install_file(&mut self, file: File) -> Result<FileDescriptor, TableFull> {
        match (self.next_fd..MAX_FD).find(|fd| self.files[*fd].is_none()) {
            Some(fd) => {
                self.files[fd] = Some(file);
                self.next_fd = fd + 1;
                Ok(FileDescriptor(fd as i32))
            }
            None => Err(TableFull(file)),
        }
    }

    /// Resolves `fd` to its handle.
    ///
    /// Reserved descriptors, out-of-range descriptors and empty slots all
    /// resolve to `None`.
    pub fn get_file(&self, fd: FileDescriptor) -> Option<&File> {
        self.files[fd.slot()?].as_ref()
    }

    /// Resolves `fd` to its handle, for modification.
    pub fn get_file_mut(&mut self, fd: FileDescriptor) -> Option<&mut File> {
        self.files[fd.slot()?].as_mut()
    }

    /// Clears the slot of `fd`, handing its handle to the caller.
    pub fn remove_file(&mut self, fd: FileDescriptor) -> Option<File> {
        let slot = fd.slot()?;
        let file = self.files[slot].take()?;
        self.next_fd = self.next_fd.min(slot);
        Some(file)
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.files.iter().filter(|f| f.is_some()).count()
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every occupied slot and closes the handles.
    pub fn close_all(&mut self) {
        for slot in self.files.iter_mut() {
            if let Some(file) = slot.take() {
                fs::with_lock(|| drop(file));
            }
        }
        self.next_fd = STDOUT.0 as usize + 1;
    }

    /// Creates a copy of the table for a forked child. Every handle is
    /// reopened with the same position and write denial.
    pub fn duplicate(&self) -> Self {
        Self {
            files: Box::new(core::array::from_fn(|fd| {
                self.files[fd].as_ref().map(File::duplicate)
            })),
            next_fd: self.next_fd,
        }
    }

    /// Opens the file named `path`.
    ///
    /// ```c
    /// int open(const char *file);
    /// ```
    ///
    /// With `deny_write`, the new handle denies writes to the file until it
    /// is closed; the program loader's executable is opened this way.
    pub fn open(
        &mut self,
        fs: &FileSystem,
        path: &str,
        deny_write: bool,
    ) -> Result<FileDescriptor, KernelError> {
        let mut file = File::new(fs.open(path)?);
        if deny_write {
            file.deny_write();
        }
        self.install_file(file).map_err(|TableFull(file)| {
            debug!("open: descriptor table is full");
            fs::with_lock(|| drop(file));
            KernelError::TooManyOpenFile
        })
    }

    /// Reads from `fd` into `buf`.
    ///
    /// ```c
    /// int read(int fd, void *buffer, unsigned size);
    /// ```
    pub fn read(
        &mut self,
        fd: FileDescriptor,
        buf: &mut [u8],
        console: &Console,
    ) -> Result<usize, KernelError> {
        match fd {
            STDIN => console.read(buf),
            STDOUT => Err(KernelError::BadFileDescriptor),
            fd => {
                let file = self.get_file_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
                fs::with_lock(|| file.read(buf))
            }
        }
    }

    /// Writes `buf` to `fd`.
    ///
    /// ```c
    /// int write(int fd, const void *buffer, unsigned size);
    /// ```
    pub fn write(
        &mut self,
        fd: FileDescriptor,
        buf: &[u8],
        console: &Console,
    ) -> Result<usize, KernelError> {
        match fd {
            STDIN => Ok(0),
            STDOUT => console.write(buf),
            fd => {
                let file = self.get_file_mut(fd).ok_or(KernelError::BadFileDescriptor)?;
                fs::with_lock(|| file.write(buf))
            }
        }
    }

    /// Moves the position of `fd`.
    ///
    /// ```c
    /// void seek(int fd, unsigned position);
    /// ```
    pub fn seek(&mut self, fd: FileDescriptor, position: usize) -> Result<(), KernelError> {
        self.get_file_mut(fd)
            .ok_or(KernelError::BadFileDescriptor)?
            .seek(position);
        Ok(())
    }

    /// Returns the position of `fd`.
    ///
    /// ```c
    /// unsigned tell(int fd);
    /// ```
    pub fn tell(&self, fd: FileDescriptor) -> Result<usize, KernelError> {
        self.get_file(fd)
            .map(File::tell)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Returns the length of the file behind `fd`.
    ///
    /// ```c
    /// int filesize(int fd);
    /// ```
    pub fn filesize(&self, fd: FileDescriptor) -> Result<usize, KernelError> {
        self.get_file(fd)
            .map(File::size)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Closes `fd`.
    ///
    /// ```c
    /// void close(int fd);
    /// ```
    pub fn close(&mut self, fd: FileDescriptor) -> Result<(), KernelError> {
        let file = self.remove_file(fd).ok_or(KernelError::BadFileDescriptor)?;
        fs::with_lock(|| drop(file));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::{sync::Arc, vec::Vec};
    use core::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
    use kernel::{fs::InodeNumber, teletype::Null};

    #[derive(Default)]
    struct Inode {
        denials: AtomicIsize,
        closes: Arc<AtomicUsize>,
    }

    struct Handle(Arc<Inode>);

    impl Drop for Handle {
        fn drop(&mut self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl fs::traits::RegularFile for Handle {
        fn ino(&self) -> InodeNumber {
            InodeNumber(1)
        }
        fn size(&self) -> usize {
            42
        }
        fn read(&self, _position: usize, _buf: &mut [u8]) -> Result<usize, KernelError> {
            Ok(0)
        }
        fn write(&self, _position: usize, buf: &[u8]) -> Result<usize, KernelError> {
            Ok(buf.len())
        }
        fn deny_write(&self) {
            self.0.denials.fetch_add(1, Ordering::SeqCst);
        }
        fn allow_write(&self) {
            self.0.denials.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn open(inode: &Arc<Inode>) -> File {
        File::new(RegularFile::new(Handle(inode.clone())))
    }

    #[test]
    fn lowest_free_descriptor_is_reused() {
        let inode = Arc::new(Inode::default());
        let mut table = FileStruct::new();
        let fds: Vec<_> = (0..4)
            .map(|_| table.install_file(open(&inode)).unwrap())
            .collect();
        assert_eq!(fds, [2, 3, 4, 5].map(FileDescriptor));

        assert!(table.close(FileDescriptor(3)).is_ok());
        assert!(table.close(FileDescriptor(2)).is_ok());
        assert_eq!(table.install_file(open(&inode)).unwrap(), FileDescriptor(2));
        assert_eq!(table.install_file(open(&inode)).unwrap(), FileDescriptor(3));
        assert_eq!(table.install_file(open(&inode)).unwrap(), FileDescriptor(6));
        assert_eq!(inode.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reserved_and_out_of_range_descriptors_never_resolve() {
        let inode = Arc::new(Inode::default());
        let mut table = FileStruct::new();
        table.install_file(open(&inode)).unwrap();
        for fd in [-1, 0, 1, MAX_FD as i32, i32::MIN, i32::MAX] {
            assert!(table.get_file(FileDescriptor(fd)).is_none(), "fd {fd}");
            assert_eq!(table.close(FileDescriptor(fd)), Err(KernelError::BadFileDescriptor));
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.tell(FileDescriptor(2)), Ok(0));
        assert_eq!(table.filesize(FileDescriptor(2)), Ok(42));
    }

    #[test]
    fn full_table_returns_the_handle() {
        let inode = Arc::new(Inode::default());
        let mut table = FileStruct::new();
        for _ in 2..MAX_FD {
            table.install_file(open(&inode)).unwrap();
        }
        let TableFull(file) = table.install_file(open(&inode)).unwrap_err();
        fs::with_lock(|| drop(file));
        assert_eq!(inode.closes.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), MAX_FD - 2);

        table.close_all();
        assert!(table.is_empty());
        assert_eq!(inode.closes.load(Ordering::SeqCst), MAX_FD - 1);
    }

    #[test]
    fn write_denial_follows_the_handle() {
        let inode = Arc::new(Inode::default());
        let mut table = FileStruct::new();
        let mut file = open(&inode);
        file.deny_write();
        file.deny_write();
        let fd = table.install_file(file).unwrap();
        assert_eq!(inode.denials.load(Ordering::SeqCst), 1);

        let mut child = table.duplicate();
        assert_eq!(inode.denials.load(Ordering::SeqCst), 2);
        assert!(child.get_file(fd).unwrap().denies_write());

        table.close(fd).unwrap();
        assert_eq!(inode.denials.load(Ordering::SeqCst), 1);
        child.close_all();
        assert_eq!(inode.denials.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn console_descriptors() {
        let console = Console::new(Null);
        let mut table = FileStruct::new();
        let mut buf = [0u8; 4];
        assert_eq!(table.read(STDOUT, &mut buf, &console), Err(KernelError::BadFileDescriptor));
        assert_eq!(table.read(STDIN, &mut buf, &console), Ok(0));
        assert_eq!(table.write(STDIN, b"abc", &console), Ok(0));
        assert_eq!(table.write(STDOUT, b"abc", &console), Ok(3));
        assert_eq!(table.write(FileDescriptor(7), b"abc", &console), Err(KernelError::BadFileDescriptor));
    }
}
