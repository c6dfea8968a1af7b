//! Kernel print utilities.
//!
//! Kernel messages go to a single sink registered at boot with
//! [`register_sink`]. Until a sink is registered, every message is dropped.
//! The log macros ([`info!`], [`warning!`], [`debug!`]) are additionally
//! gated by [`QUITE`].
//!
//! These macros are for kernel diagnostics only. Output that belongs to a user
//! program (its stdout, its termination notice) is written to the program's
//! console through [`Teletype`].
//!
//! [`Teletype`]: crate::teletype::Teletype
use crate::sync::SpinLock;
use alloc::boxed::Box;
use core::{fmt::Write, sync::atomic::AtomicBool};

/// Mutes [`info!`], [`warning!`] and [`debug!`] while set.
///
/// Starts set when the `quiet` feature is enabled.
pub static QUITE: AtomicBool = AtomicBool::new(cfg!(feature = "quiet"));

static SINK: SpinLock<Option<Box<dyn Write + Send>>> = SpinLock::new(None);

/// Installs `sink` as the destination of kernel messages, returning the
/// previously registered one.
pub fn register_sink(sink: impl Write + Send + 'static) -> Option<Box<dyn Write + Send>> {
    let mut guard = SINK.lock();
    let prev = guard.replace(Box::new(sink));
    guard.unlock();
    prev
}

/// Removes the registered sink.
pub fn unregister_sink() -> Option<Box<dyn Write + Send>> {
    let mut guard = SINK.lock();
    let prev = guard.take();
    guard.unlock();
    prev
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let mut guard = SINK.lock();
    if let Some(sink) = guard.as_mut() {
        let _ = write!(sink, "{fmt}");
    }
    guard.unlock();
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the kernel sink.
/// This first holds the lock for the sink.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the kernel sink.
/// This first holds the lock for the sink.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
#[macro_export]
macro_rules! info {
    () => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
#[macro_export]
macro_rules! warning {
    () => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug message.
#[macro_export]
macro_rules! debug {
    () => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG]\n") });
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*))} );
}
