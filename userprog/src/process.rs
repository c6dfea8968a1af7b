//! # The process control block.
//!
//! A [`Process`] gathers what the system call boundary knows about a user
//! program: its name and pid, the exit status once it has one, the user stack
//! pointer saved at the last trap, its [`FileStruct`] and [`MmStruct`], and
//! the handles to the shared filesystem and console.
//!
//! ## Lifecycle
//!
//! Process creation, image loading and parent/child synchronization belong to
//! the process manager, which the boundary reaches through the [`Lifecycle`]
//! trait. The boundary's part is to validate the user arguments before
//! delegating and to surface the result:
//!
//! - **exit**: [`Process::exit`] records the status, prints
//!   `name: exit(status)` on the console, closes every descriptor, tears down
//!   the address space and reports the status to the process manager.
//! - **fork**: validates the child name and forwards the trapped frame.
//!   [`Process::duplicate`] is the building block the process manager uses to
//!   copy the descriptor table and the address space.
//! - **exec**: validates and copies the command line, then asks the process
//!   manager to replace the image. On success the call does not return to the
//!   caller; the thread resumes on the frame of the new image.
//! - **wait**: forwarded as is.
use crate::{
    NoReturn,
    file_struct::FileStruct,
    mm_struct::MmStruct,
    pager::Pager,
    syscall::SyscallAbi,
    uaccess::UserCString,
};
use alloc::{string::String, sync::Arc};
use core::ffi::CStr;
use core::fmt::Write;
use kernel::{
    KernelError,
    fs::FileSystem,
    syscall::Registers,
    teletype::{Console, Null},
};

/// A process identifier.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Pid(pub i32);

/// The process manager, as seen by the system call boundary.
pub trait Lifecycle<P: Pager>
where
    Self: Send + Sync,
{
    /// Creates a child named `name` whose initial registers mirror `frame`,
    /// and returns its pid to the parent.
    fn fork(&self, parent: &Process<P>, name: &str, frame: &Registers) -> Result<Pid, KernelError>;

    /// Replaces the image of `process` with the program and arguments in
    /// `cmdline`. Returns the frame the new image starts on.
    fn exec(&self, process: &mut Process<P>, cmdline: &CStr) -> Result<Registers, KernelError>;

    /// Waits for `child` of `parent` to exit and returns its status.
    fn wait(&self, parent: Pid, child: Pid) -> Result<i32, KernelError>;

    /// Reports that `pid` exited with `status`.
    fn exit(&self, pid: Pid, status: i32);
}

/// A process state, which contains file struct and mm struct.
pub struct Process<P: Pager> {
    /// The process identifier.
    pub pid: Pid,
    /// The name of the process, which is also the name of its executable.
    pub name: String,
    /// The exit status, once the process has exited.
    pub exit_status: Option<i32>,
    /// The user stack pointer at the most recent system call.
    pub user_rsp: usize,
    /// The file descriptor table.
    pub file_struct: FileStruct,
    /// The address space.
    pub mm_struct: MmStruct<P>,
    /// The filesystem.
    pub fs: FileSystem,
    /// The console behind the standard descriptors.
    pub console: Console,
    lifecycle: Arc<dyn Lifecycle<P>>,
}

/// Assembles a [`Process`].
pub struct ProcessBuilder<P: Pager> {
    name: String,
    pid: Pid,
    fs: FileSystem,
    console: Console,
    lifecycle: Arc<dyn Lifecycle<P>>,
    mm_struct: Option<MmStruct<P>>,
}

impl<P: Pager> ProcessBuilder<P> {
    /// Starts a process named `name`.
    pub fn new<I>(name: I, fs: FileSystem, lifecycle: Arc<dyn Lifecycle<P>>) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
            pid: Pid(1),
            fs,
            console: Console::new(Null),
            lifecycle,
            mm_struct: None,
        }
    }

    /// Sets the pid.
    pub fn pid(mut self, pid: Pid) -> Self {
        self.pid = pid;
        self
    }

    /// Wires the standard descriptors to `console`.
    pub fn console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    /// Starts from an already populated address space.
    pub fn mm_struct(mut self, mm_struct: MmStruct<P>) -> Self {
        self.mm_struct = Some(mm_struct);
        self
    }

    /// Builds the process with an empty descriptor table.
    pub fn build(self) -> Process<P> {
        Process {
            pid: self.pid,
            name: self.name,
            exit_status: None,
            user_rsp: 0,
            file_struct: FileStruct::new(),
            mm_struct: self.mm_struct.unwrap_or_default(),
            fs: self.fs,
            console: self.console,
            lifecycle: self.lifecycle,
        }
    }
}

impl<P: Pager> Process<P> {
    /// Returns the process manager.
    pub fn lifecycle(&self) -> &Arc<dyn Lifecycle<P>> {
        &self.lifecycle
    }

    /// Tears down the process with `status`.
    ///
    /// Runs at most once; later calls do nothing.
    pub fn exit(&mut self, status: i32) {
        if self.exit_status.is_some() {
            return;
        }
        self.exit_status = Some(status);
        let _ = writeln!(self.console, "{}: exit({})", self.name, status);
        self.file_struct.close_all();
        self.mm_struct.pager.destroy();
        self.lifecycle.exit(self.pid, status);
    }

    /// Creates the state of a forked child: a copy of the descriptor table
    /// and of the address space, sharing the filesystem, console and process
    /// manager.
    pub fn duplicate(&self, pid: Pid, name: &str) -> Result<Self, KernelError> {
        Ok(Self {
            pid,
            name: String::from(name),
            exit_status: None,
            user_rsp: self.user_rsp,
            file_struct: self.file_struct.duplicate(),
            mm_struct: self.mm_struct.duplicate()?,
            fs: self.fs.clone(),
            console: self.console.clone(),
            lifecycle: self.lifecycle.clone(),
        })
    }

    /// Creates a child process.
    ///
    /// ```c
    /// pid_t fork(const char *thread_name);
    /// ```
    pub fn fork(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let name = UserCString::new(abi.arg1).read(&mut self.mm_struct)?;
        let lifecycle = self.lifecycle.clone();
        match lifecycle.fork(self, &name, &*abi.regs) {
            Ok(pid) => Ok(SyscallAbi::encode_int(pid.0)),
            Err(e) => {
                debug!("fork({}) failed: {:?}", name, e);
                Ok(SyscallAbi::ERROR)
            }
        }
    }

    /// Replaces the image of the process.
    ///
    /// ```c
    /// int exec(const char *cmd_line);
    /// ```
    pub fn exec(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let cmdline = UserCString::new(abi.arg1).read_cstring(&mut self.mm_struct)?;
        let lifecycle = self.lifecycle.clone();
        match lifecycle.exec(self, &cmdline) {
            Ok(frame) => Err(NoReturn::Exec(frame)),
            Err(e) => {
                debug!("exec({:?}) failed: {:?}", cmdline, e);
                Ok(SyscallAbi::ERROR)
            }
        }
    }

    /// Waits for a child process.
    ///
    /// ```c
    /// int wait(pid_t pid);
    /// ```
    pub fn wait(&mut self, abi: &SyscallAbi) -> Result<usize, NoReturn> {
        let child = Pid(abi.arg1 as i32);
        Ok(self
            .lifecycle
            .wait(self.pid, child)
            .map_or(SyscallAbi::ERROR, SyscallAbi::encode_int))
    }
}
