// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll eventfd inotify signalfd sigprocmask timerfd

//! Error type for every fallible operation in the crate.
//!
//! One variant per failure site, each carrying the OS error as its source, so
//! callers can match on *where* a call failed without string inspection.

use nix::errno::Errno;

/// Errors reported by [`EventLoop`] and the watcher adapters.
///
/// Resource-acquisition variants correspond to kernel-object creation; the
/// remaining variants cover argument validation, registration, and the
/// distinguished wait failure after which the loop has already torn itself
/// down.
///
/// [`EventLoop`]: crate::EventLoop
#[derive(Debug, thiserror::Error)]
pub enum EventLoopError {
    /// `max_events` must be at least 1.
    #[error("event capacity must be at least 1")]
    InvalidCapacity,

    /// A negative file descriptor was passed to an I/O watcher operation.
    #[error("file descriptor must be non-negative")]
    InvalidFd,

    /// The handle does not refer to a live watcher (never registered, or
    /// removed since).
    #[error("watcher handle is stale")]
    StaleHandle,

    /// The handle refers to a watcher of a different kind than the operation
    /// expects.
    #[error("operation does not match the watcher's kind")]
    KindMismatch,

    /// The event loop has been shut down; no further registrations or runs
    /// are possible.
    #[error("event loop is closed")]
    LoopClosed,

    /// `run` was called from within a callback of the same loop.
    #[error("run() re-entered from a dispatching callback")]
    ReentrantRun,

    /// Failed to create the epoll instance.
    #[error("failed to create epoll instance: {0}")]
    EpollCreation(#[source] Errno),

    /// Failed to create the reserved inotify instance.
    #[error("failed to create inotify instance: {0}")]
    InotifyCreation(#[source] Errno),

    /// Failed to create a signalfd.
    #[error("failed to create signalfd: {0}")]
    SignalFdCreation(#[source] Errno),

    /// Failed to create a timerfd.
    #[error("failed to create timerfd: {0}")]
    TimerFdCreation(#[source] Errno),

    /// Failed to create an eventfd.
    #[error("failed to create eventfd: {0}")]
    EventFdCreation(#[source] Errno),

    /// The kernel rejected an epoll add or modify for this watcher.
    #[error("failed to register watcher with epoll: {0}")]
    Registration(#[source] Errno),

    /// The kernel rejected an epoll delete for this watcher.
    #[error("failed to deregister watcher from epoll: {0}")]
    Deregistration(#[source] Errno),

    /// `sigprocmask` or the signalfd mask update failed.
    #[error("failed to update signal mask: {0}")]
    SignalMask(#[source] Errno),

    /// Arming or disarming the timerfd failed.
    #[error("failed to arm timerfd: {0}")]
    TimerArm(#[source] Errno),

    /// Writing to the eventfd failed.
    #[error("failed to post to eventfd: {0}")]
    EventPost(#[source] Errno),

    /// `epoll_wait` failed unrecoverably. The loop has already shut itself
    /// down (all watchers stopped, context fds closed) before this is
    /// returned.
    #[error("epoll_wait failed: {0}")]
    WaitFailed(#[source] Errno),
}
