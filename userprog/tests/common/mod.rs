//! Shared harness for the system call scenarios.
//!
//! Provides an in-memory filesystem, a console that records what the program
//! prints, a process manager that records what it is asked to do, and the
//! [`syscall!`] macro that traps into a [`Process`] the way the entry stub
//! does.
#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    ffi::CStr,
    sync::{
        Arc,
        atomic::{AtomicIsize, AtomicU32, AtomicUsize, Ordering},
    },
};

use kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::{self, FILESYS_LOCK, FileSystem, InodeNumber, RegularFile},
    sync::SpinLock,
    syscall::Registers,
    task::{Continuation, Task},
    teletype::{Console, Teletype},
};
use userprog::{
    Lifecycle, Pid, Process, ProcessBuilder, lazy_pager::LazyPager, mm_struct::MmStruct,
};

/// Top of the user stack.
pub const USER_STACK: usize = 0x4748_0000;
/// Number of writable stack pages mapped below [`USER_STACK`].
pub const STACK_PAGES: usize = 4;
/// Start of the read-only code page.
pub const CODE: usize = 0x40_0000;
/// A user buffer in the stack area, far from the strings the tests place.
pub const BUF: usize = USER_STACK - 2 * PAGE_SIZE;
/// Where the tests place path strings.
pub const PATH: usize = USER_STACK - PAGE_SIZE;

/// Counts a filesystem call that ran without the filesystem lock held.
fn expect_locked(unlocked: &AtomicUsize) {
    if !FILESYS_LOCK.is_locked() {
        unlocked.fetch_add(1, Ordering::SeqCst);
    }
}

/// An inode of [`RamFs`].
pub struct Inode {
    ino: InodeNumber,
    data: SpinLock<Vec<u8>>,
    denials: AtomicIsize,
    handles: AtomicUsize,
    unlocked: Arc<AtomicUsize>,
}

impl Inode {
    /// Snapshot of the contents.
    pub fn contents(&self) -> Vec<u8> {
        let guard = self.data.lock();
        let v = guard.to_vec();
        guard.unlock();
        v
    }

    /// Number of outstanding write denials.
    pub fn denials(&self) -> isize {
        self.denials.load(Ordering::SeqCst)
    }

    /// Number of open handles to the inode.
    pub fn handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }
}

/// An open handle to an [`Inode`].
struct RamFile(Arc<Inode>);

impl Drop for RamFile {
    fn drop(&mut self) {
        expect_locked(&self.0.unlocked);
        self.0.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fs::traits::RegularFile for RamFile {
    fn ino(&self) -> InodeNumber {
        self.0.ino
    }

    fn size(&self) -> usize {
        let guard = self.0.data.lock();
        let len = guard.len();
        guard.unlock();
        len
    }

    fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        expect_locked(&self.0.unlocked);
        let guard = self.0.data.lock();
        let n = guard.len().saturating_sub(position).min(buf.len());
        if n != 0 {
            buf[..n].copy_from_slice(&guard[position..position + n]);
        }
        guard.unlock();
        Ok(n)
    }

    fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        expect_locked(&self.0.unlocked);
        if self.0.denials() > 0 {
            return Ok(0);
        }
        let mut guard = self.0.data.lock();
        if guard.len() < position + buf.len() {
            guard.resize(position + buf.len(), 0);
        }
        guard[position..position + buf.len()].copy_from_slice(buf);
        guard.unlock();
        Ok(buf.len())
    }

    fn deny_write(&self) {
        self.0.denials.fetch_add(1, Ordering::SeqCst);
    }

    fn allow_write(&self) {
        self.0.denials.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A flat in-memory filesystem.
#[derive(Clone, Default)]
pub struct RamFs {
    files: Arc<SpinLock<BTreeMap<String, Arc<Inode>>>>,
    next_ino: Arc<AtomicU32>,
    unlocked: Arc<AtomicUsize>,
}

impl RamFs {
    /// Adds a file directly, bypassing the system call path.
    pub fn insert(&self, name: &str, contents: &[u8]) -> Arc<Inode> {
        let inode = Arc::new(Inode {
            ino: InodeNumber(self.next_ino.fetch_add(1, Ordering::SeqCst) + 1),
            data: SpinLock::new(contents.to_vec()),
            denials: AtomicIsize::new(0),
            handles: AtomicUsize::new(0),
            unlocked: self.unlocked.clone(),
        });
        let mut guard = self.files.lock();
        guard.insert(name.to_string(), inode.clone());
        guard.unlock();
        inode
    }

    /// Number of calls into this filesystem, or into a file opened from it,
    /// that ran without the filesystem lock. Closing the last handle to a
    /// file counts as a call.
    pub fn unlocked_calls(&self) -> usize {
        self.unlocked.load(Ordering::SeqCst)
    }

    /// Looks up a file directly.
    pub fn get(&self, name: &str) -> Option<Arc<Inode>> {
        let guard = self.files.lock();
        let inode = guard.get(name).cloned();
        guard.unlock();
        inode
    }
}

impl fs::traits::FileSystem for RamFs {
    fn create(&self, name: &str, initial_size: usize) -> Result<(), KernelError> {
        expect_locked(&self.unlocked);
        if name.is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        if self.get(name).is_some() {
            return Err(KernelError::FileExist);
        }
        self.insert(name, &vec![0; initial_size]);
        Ok(())
    }

    fn open(&self, name: &str) -> Result<RegularFile, KernelError> {
        expect_locked(&self.unlocked);
        let inode = self.get(name).ok_or(KernelError::NoSuchEntry)?;
        inode.handles.fetch_add(1, Ordering::SeqCst);
        Ok(RegularFile::new(RamFile(inode)))
    }

    fn remove(&self, name: &str) -> Result<(), KernelError> {
        expect_locked(&self.unlocked);
        let mut guard = self.files.lock();
        let removed = guard.remove(name);
        guard.unlock();
        removed.map(|_| ()).ok_or(KernelError::NoSuchEntry)
    }
}

/// A console that records output and serves preset input.
#[derive(Clone, Default)]
pub struct Capture {
    output: Arc<SpinLock<Vec<u8>>>,
    input: Arc<SpinLock<Vec<u8>>>,
}

impl Capture {
    /// Everything written so far.
    pub fn output(&self) -> String {
        let guard = self.output.lock();
        let s = String::from_utf8_lossy(&guard).into_owned();
        guard.unlock();
        s
    }

    /// Queues bytes for the program to read from standard input.
    pub fn feed(&self, data: &[u8]) {
        let mut guard = self.input.lock();
        guard.extend_from_slice(data);
        guard.unlock();
    }
}

impl Teletype for Capture {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        let mut guard = self.output.lock();
        guard.extend_from_slice(data);
        guard.unlock();
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError> {
        let mut guard = self.input.lock();
        let n = guard.len().min(data.len());
        data[..n].copy_from_slice(&guard[..n]);
        guard.drain(..n);
        guard.unlock();
        Ok(n)
    }
}

/// What the process manager was asked to do.
#[derive(Default)]
pub struct Record {
    pub forks: Vec<(String, Registers)>,
    pub children: Vec<Process<LazyPager>>,
    pub execs: Vec<String>,
    pub waits: Vec<(Pid, Pid)>,
    pub exits: Vec<(Pid, i32)>,
}

/// A process manager that records every request.
///
/// `fork` duplicates the parent, `exec` succeeds for commands starting with
/// `ok` and returns [`Recorder::EXEC_RIP`] as the new entry point, `wait`
/// returns the status set with [`Recorder::set_status`].
pub struct Recorder {
    pub record: SpinLock<Record>,
    statuses: SpinLock<BTreeMap<i32, i32>>,
    next_pid: AtomicU32,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            record: SpinLock::new(Record::default()),
            statuses: SpinLock::new(BTreeMap::new()),
            next_pid: AtomicU32::new(0),
        }
    }
}

impl Recorder {
    pub const EXEC_RIP: usize = 0x40_1000;

    /// Makes `wait(pid)` return `status`.
    pub fn set_status(&self, pid: i32, status: i32) {
        let mut guard = self.statuses.lock();
        guard.insert(pid, status);
        guard.unlock();
    }

    /// Runs `f` on the record.
    pub fn with<R>(&self, f: impl FnOnce(&mut Record) -> R) -> R {
        let mut guard = self.record.lock();
        let r = f(&mut guard);
        guard.unlock();
        r
    }
}

impl Lifecycle<LazyPager> for Recorder {
    fn fork(
        &self,
        parent: &Process<LazyPager>,
        name: &str,
        frame: &Registers,
    ) -> Result<Pid, KernelError> {
        let pid = Pid(self.next_pid.fetch_add(1, Ordering::SeqCst) as i32 + 2);
        let child = parent.duplicate(pid, name)?;
        self.with(|r| {
            r.forks.push((name.to_string(), *frame));
            r.children.push(child);
        });
        Ok(pid)
    }

    fn exec(
        &self,
        _process: &mut Process<LazyPager>,
        cmdline: &CStr,
    ) -> Result<Registers, KernelError> {
        let cmdline = cmdline.to_string_lossy().into_owned();
        let ok = cmdline.starts_with("ok");
        self.with(|r| r.execs.push(cmdline));
        if !ok {
            return Err(KernelError::NoSuchEntry);
        }
        let mut frame = Registers::new();
        *frame.rip() = Self::EXEC_RIP;
        *frame.rsp() = USER_STACK;
        Ok(frame)
    }

    fn wait(&self, parent: Pid, child: Pid) -> Result<i32, KernelError> {
        self.with(|r| r.waits.push((parent, child)));
        let guard = self.statuses.lock();
        let status = guard.get(&child.0).copied();
        guard.unlock();
        status.ok_or(KernelError::NoChild)
    }

    fn exit(&self, pid: Pid, status: i32) {
        self.with(|r| r.exits.push((pid, status)));
    }
}

/// A process and its collaborators.
pub struct Harness {
    pub process: Process<LazyPager>,
    pub fs: RamFs,
    pub console: Capture,
    pub lifecycle: Arc<Recorder>,
}

/// Builds a process named `name` with a writable stack and a read-only code
/// page mapped.
pub fn setup(name: &str) -> Harness {
    let fs = RamFs::default();
    let console = Capture::default();
    let lifecycle = Arc::new(Recorder::default());

    let mut mm = MmStruct::<LazyPager>::new();
    mm.pager
        .map_anonymous(
            Va::new(USER_STACK - STACK_PAGES * PAGE_SIZE).unwrap(),
            STACK_PAGES,
            true,
        )
        .unwrap();
    mm.pager
        .map_anonymous(Va::new(CODE).unwrap(), 1, false)
        .unwrap();

    let process = ProcessBuilder::new(name, FileSystem::new(fs.clone()), lifecycle.clone())
        .pid(Pid(1))
        .console(Console::new(console.clone()))
        .mm_struct(mm)
        .build();
    Harness {
        process,
        fs,
        console,
        lifecycle,
    }
}

/// Writes `data` into user memory at `addr`, bypassing validation.
pub fn poke(process: &mut Process<LazyPager>, addr: usize, data: &[u8]) {
    for (i, b) in data.iter().enumerate() {
        let va = Va::new(addr + i).unwrap();
        process
            .mm_struct
            .get_user_page_and(va, true, |page, _| page.inner_mut()[va.offset()] = *b)
            .expect("poke into unmapped memory");
    }
}

/// Reads `len` bytes of user memory at `addr`, bypassing validation.
pub fn peek(process: &mut Process<LazyPager>, addr: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let va = Va::new(addr + i).unwrap();
            process
                .mm_struct
                .get_user_page_and(va, false, |page, _| page.inner()[va.offset()])
                .expect("peek into unmapped memory")
        })
        .collect()
}

/// Places a NUL-terminated string at `addr` and returns `addr`.
pub fn cstr(process: &mut Process<LazyPager>, addr: usize, s: &str) -> usize {
    poke(process, addr, s.as_bytes());
    poke(process, addr + s.len(), &[0]);
    addr
}

/// The state of a thread after a trap.
pub struct Trap {
    pub continuation: Continuation,
    pub regs: Registers,
}

impl Trap {
    /// `%rax` as the program reads it.
    pub fn ret(&self) -> isize {
        self.regs.gprs.rax as isize
    }
}

/// Traps into `process` with `sysno` and `args`.
pub fn trap(process: &mut Process<LazyPager>, sysno: usize, args: &[usize]) -> Trap {
    let mut regs = Registers::new();
    regs.gprs.rax = sysno;
    let slots = [
        &mut regs.gprs.rdi,
        &mut regs.gprs.rsi,
        &mut regs.gprs.rdx,
        &mut regs.gprs.r10,
        &mut regs.gprs.r8,
        &mut regs.gprs.r9,
    ];
    for (slot, arg) in slots.into_iter().zip(args) {
        *slot = *arg;
    }
    *regs.rsp() = USER_STACK - 0x40;
    *regs.rip() = CODE + 0x10;
    let continuation = process.syscall(&mut regs);
    Trap { continuation, regs }
}

/// Traps into a process: `syscall!(process, SyscallNumber::Open, path)`.
macro_rules! syscall {
    ($process:expr, $no:expr $(, $arg:expr)* $(,)?) => {
        $crate::common::trap(&mut $process, $no as usize, &[$($arg as usize),*])
    };
}
