//! Console device.
//!
//! Descriptors 0 and 1 of every user program are wired to a console rather
//! than to the filesystem. A console is anything implementing [`Teletype`];
//! processes share it through a [`Console`] handle, which serializes access.
use crate::{KernelError, sync::SpinLock};
use alloc::sync::Arc;

/// A character device that user programs read from and write to.
pub trait Teletype
where
    Self: Send,
{
    /// Writes `data` to the device, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError>;

    /// Reads up to `data.len()` bytes from the device.
    fn read(&mut self, data: &mut [u8]) -> Result<usize, KernelError>;
}

/// A shared handle to a console device.
#[derive(Clone)]
pub struct Console(Arc<SpinLock<dyn Teletype>>);

impl Console {
    /// Wraps a device.
    pub fn new(tty: impl Teletype + 'static) -> Self {
        Self(Arc::new(SpinLock::new(tty)))
    }

    /// Writes the whole buffer to the device in one critical section, so
    /// output of concurrent processes does not interleave within a call.
    pub fn write(&self, data: &[u8]) -> Result<usize, KernelError> {
        let mut guard = self.0.lock();
        let r = guard.write(data);
        guard.unlock();
        r
    }

    /// Reads from the device.
    pub fn read(&self, data: &mut [u8]) -> Result<usize, KernelError> {
        let mut guard = self.0.lock();
        let r = guard.read(data);
        guard.unlock();
        r
    }
}

impl core::fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        Console::write(self, s.as_bytes())
            .map(|_| ())
            .map_err(|_| core::fmt::Error)
    }
}

/// A console that discards output and has no input.
#[derive(Default)]
pub struct Null;

impl Teletype for Null {
    fn write(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        Ok(data.len())
    }

    fn read(&mut self, _data: &mut [u8]) -> Result<usize, KernelError> {
        Ok(0)
    }
}
