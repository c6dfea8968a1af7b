//! # System call ABI for x86_64.
//!
//! A user program requests a kernel service by executing the `syscall`
//! instruction with:
//!
//! 1. The **system call number** in `%rax`.
//! 2. Up to six **arguments** in `%rdi`, `%rsi`, `%rdx`, `%r10`, `%r8` and
//!    `%r9`, in that order.
//!
//! The kernel places the **return value** in `%rax` before resuming the
//! program.
//!
//! Arguments arrive as raw 64-bit words. Each handler narrows them to the
//! C type of the corresponding user-level prototype: descriptors, pids and
//! statuses are `int` (the low 32 bits, signed), sizes of `read`/`write` and
//! positions of `seek` are `unsigned`, and pointers and `mmap` lengths use the
//! whole word.
//!
//! ## Error Handling
//!
//! Errors a user program can recover from are reported with a per-call
//! sentinel in `%rax`, usually [`SyscallAbi::ERROR`] (`-1`). Errors that
//! indicate a misbehaving program (an invalid pointer, an unknown system call
//! number) terminate the program instead; see [`NoReturn`].
//!
//! [`NoReturn`]: crate::NoReturn
use kernel::syscall::Registers;

/// A struct representing the system call ABI (Application Binary Interface).
///
/// It stores the system call number and up to six arguments that are passed
/// to the kernel during a system call, as well as a mutable reference to the
/// trapped [`Registers`].
pub struct SyscallAbi<'a> {
    /// The system call number that identifies the requested system service.
    pub sysno: usize,
    /// First argument for the system call.
    pub arg1: usize,
    /// Second argument for the system call.
    pub arg2: usize,
    /// Third argument for the system call.
    pub arg3: usize,
    /// Fourth argument for the system call.
    pub arg4: usize,
    /// Fifth argument for the system call.
    pub arg5: usize,
    /// Sixth argument for the system call.
    pub arg6: usize,
    /// A mutable reference to the [`Registers`] structure, used to write the
    /// return value and to replace the frame on `exec`.
    pub regs: &'a mut Registers,
}

impl<'a> SyscallAbi<'a> {
    /// The `-1` sentinel, as seen in `%rax`.
    pub const ERROR: usize = -1isize as usize;

    /// Constructs a [`SyscallAbi`] instance from the provided registers.
    pub fn from_registers(regs: &'a mut Registers) -> Self {
        Self {
            sysno: regs.gprs.rax,
            arg1: regs.gprs.rdi,
            arg2: regs.gprs.rsi,
            arg3: regs.gprs.rdx,
            arg4: regs.gprs.r10,
            arg5: regs.gprs.r8,
            arg6: regs.gprs.r9,
            regs,
        }
    }

    /// Sets the return value for the system call in `%rax`.
    pub fn set_return_value(self, return_val: usize) {
        self.regs.gprs.rax = return_val;
    }

    /// Encodes a C `int` result the way the user program reads it back from
    /// `%rax`.
    #[inline]
    pub fn encode_int(v: i32) -> usize {
        v as isize as usize
    }
}

#[cfg(test)]
mod tests {
    use super::SyscallAbi;
    use kernel::syscall::Registers;

    #[test]
    fn arguments_follow_register_order() {
        let mut regs = Registers::new();
        regs.gprs.rax = 9;
        regs.gprs.rdi = 1;
        regs.gprs.rsi = 2;
        regs.gprs.rdx = 3;
        regs.gprs.r10 = 4;
        regs.gprs.r8 = 5;
        regs.gprs.r9 = 6;
        regs.gprs.rcx = 0xdead;
        let abi = SyscallAbi::from_registers(&mut regs);
        assert_eq!(
            (abi.sysno, abi.arg1, abi.arg2, abi.arg3, abi.arg4, abi.arg5, abi.arg6),
            (9, 1, 2, 3, 4, 5, 6)
        );
        abi.set_return_value(SyscallAbi::encode_int(-1));
        assert_eq!(regs.gprs.rax, usize::MAX);
        assert_eq!(regs.gprs.rcx, 0xdead);
    }
}
