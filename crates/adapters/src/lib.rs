// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! backrest-adapters: boundaries to the outside world
//!
//! The repo driver wraps the external backup binary as a typed async
//! surface; the notifiers deliver hook messages over HTTP. Both come with
//! fake implementations so the engine is testable without a binary or a
//! network.

pub mod driver;
pub mod notify;
pub mod subprocess;

pub use driver::{
    BackupEvent, BackupSpec, DriverCtx, DriverError, LsEntry, RepoDriver, ResticDriver,
};
pub use notify::{NotifyError, NotifyMessage, Notifier, WebhookNotifier};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use driver::FakeDriver;
#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifier, NotifyCall};
