// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR EPERM epoll eventfd inotify signalfd timerfd demultiplexer

//! # Architecture Overview
//!
//! A micro event loop for Linux. One epoll instance demultiplexes readiness
//! across four kinds of watchers, each paired with a callback that runs on
//! the loop's (single) thread when its source becomes ready:
//!
//! | Watcher kind | Source                              | Backing object     |
//! | :----------- | :---------------------------------- | :----------------- |
//! | I/O          | A caller-supplied file descriptor   | The caller's fd    |
//! | Signal       | A POSIX signal                      | signalfd           |
//! | Timer        | One-shot or periodic timer          | timerfd, monotonic |
//! | Event        | User-posted wakeup                  | eventfd, semaphore |
//!
//! Timers and signals are descriptor-bearing kernel objects, so the whole
//! loop is a single multiplexed wait — no userland timer wheel, no signal
//! handler trampolines.
//!
//! ## Quick Reference
//!
//! | Item                        | Description                                        |
//! | :-------------------------- | :------------------------------------------------- |
//! | [`EventLoop`]               | The loop context; owns the epoll fd and registry   |
//! | [`EventLoop::run()`]        | Wait/dispatch cycle, with [`RunFlags`] modes       |
//! | [`WatcherHandle`]           | Opaque generational token for a registered watcher |
//! | [`Events`]                  | Readiness bits, mirroring the kernel's epoll bits  |
//! | `io_init` / `io_set` / …    | Adapter quadruple per watcher kind                 |
//! | [`EventLoop::event_post()`] | Wake the loop from a callback                      |
//!
//! ## Example
//!
//! A one-shot 50 ms timer that ends the loop from its own callback:
//!
//! ```no_run
//! use r3bl_evloop::{EventLoop, RunFlags, DEFAULT_MAX_EVENTS};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), r3bl_evloop::EventLoopError> {
//! let mut event_loop = EventLoop::new(DEFAULT_MAX_EVENTS)?;
//! event_loop.timer_init(Duration::from_millis(50), Duration::ZERO, |el, _, _| {
//!     let _ = el.exit();
//! })?;
//! event_loop.run(RunFlags::empty())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Dispatch Guarantees
//!
//! - Callbacks run synchronously on the thread calling [`EventLoop::run()`],
//!   in the order the kernel reports readiness within a cycle.
//! - A callback may stop, reconfigure, or remove any watcher — including its
//!   own — and may call [`EventLoop::exit()`]; the dispatcher touches a
//!   watcher only *before* its callback runs.
//! - I/O watchers that hang up or error are stopped before their callback
//!   fires; the callback still receives the [`Events::HUP`] /
//!   [`Events::ERROR`] bits and decides whether to re-register.
//! - `epoll_wait` interrupted by a signal is retried; an unrecoverable wait
//!   failure shuts the loop down and surfaces
//!   [`EventLoopError::WaitFailed`].
//!
//! ## The Redirected-Stdin Workaround
//!
//! epoll refuses regular files with `EPERM`, which breaks the common
//! `app < file.txt` pattern. A read-only I/O watcher on stdin that trips this
//! becomes *pseudo-registered*: the loop dispatches it by probing the
//! descriptor (zero-timeout poll plus a readable-byte-count query) once per
//! cycle and auto-removes it when the probe runs dry. The workaround is
//! deliberately limited to exactly that case.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

mod dispatcher;
mod error;
mod event;
mod event_loop;
mod events;
mod handle;
mod io;
mod registry;
mod signal;
mod timer;
mod watcher;

pub use error::EventLoopError;
pub use event_loop::{EventLoop, DEFAULT_MAX_EVENTS};
pub use events::{Events, RunFlags};
pub use handle::WatcherHandle;
pub use watcher::{WatcherCallback, WatcherKind};

/// Re-export of the signal type accepted by the signal watcher operations.
pub use nix::sys::signal::Signal;
