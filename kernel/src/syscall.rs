//! The trapped register frame.
//!
//! When a user program executes the `syscall` instruction, the entry stub
//! saves the user registers into a [`Registers`] frame and hands it to the
//! thread's [`Task`]. Whatever the task leaves in the frame is what the user
//! program observes when it resumes.
//!
//! [`Task`]: crate::task::Task

/// General purpose registers of x86_64 saved at the trap.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct GeneralPurposeRegisters {
    pub r15: usize,
    pub r14: usize,
    pub r13: usize,
    pub r12: usize,
    pub r11: usize,
    pub r10: usize,
    pub r9: usize,
    pub r8: usize,
    pub rsi: usize,
    pub rdi: usize,
    pub rbp: usize,
    pub rdx: usize,
    pub rcx: usize,
    pub rbx: usize,
    pub rax: usize,
}

/// x86_64 trap frame of a user thread.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    /// General purpose registers.
    pub gprs: GeneralPurposeRegisters,
    /// Instruction pointer to resume at.
    pub rip: usize,
    /// User stack pointer at the trap.
    pub rsp: usize,
}

impl Registers {
    /// Creates a zeroed register frame for a user thread.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a mutable reference to the instruction pointer (`RIP`).
    pub fn rip(&mut self) -> &mut usize {
        &mut self.rip
    }

    /// Returns a mutable reference to the stack pointer (`RSP`).
    pub fn rsp(&mut self) -> &mut usize {
        &mut self.rsp
    }
}
