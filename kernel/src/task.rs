//! Task trait for interact with user process.
use crate::syscall::Registers;

/// What the trapping thread does once the kernel is done with the trap.
#[must_use]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Continuation {
    /// Resume the user program with the (possibly updated) frame.
    ReturnToUser,
    /// The process has been torn down with the given exit status. The thread
    /// must not resume user code.
    Exited(i32),
    /// Power off the machine.
    PowerOff,
}

/// Represents a **task** executed by a thread.
///
/// This trait defines the functionality required for handling events
/// triggered by a user process, such as **system calls**.
pub trait Task {
    /// Handles a **system call** triggered by the user program.
    ///
    /// - The `registers` parameter contains the state of the CPU registers at
    ///   the time of the system call.
    /// - Implementations of this function should parse the system call
    ///   arguments, execute the corresponding operation, and store the result
    ///   back in `registers`.
    fn syscall(&mut self, registers: &mut Registers) -> Continuation;
}
