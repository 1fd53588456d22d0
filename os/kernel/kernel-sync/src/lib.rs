//! # Kernel synchronization primitives
//!
//! Two locks with different waiting strategies:
//!
//! * [`SpinLock`] busy-waits. It guards short critical sections (list
//!   surgery, counter updates) and must never be held across device I/O or
//!   while acquiring a [`SleepLock`].
//! * [`SleepLock`] gives the processor away while it waits, through the
//!   [`ExecContext`] capability. It guards long-held data such as a cached
//!   block's payload, and answers "does the current context hold me".
//!
//! With the `std` feature (on by default, disabled by kernel builds) the
//! [`ThreadContext`] maps execution contexts to host threads.

#![cfg_attr(not(any(test, doctest, feature = "std")), no_std)]
#![allow(unsafe_code)]

mod context;
mod sleep_lock;
mod spin_lock;

pub use context::{ContextId, ExecContext};
#[cfg(feature = "std")]
pub use context::ThreadContext;
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
