// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words eventfd signalfd signo timerfd

//! The per-source watcher record stored in the registry.

use crate::{Events, EventLoop, WatcherHandle};
use nix::sys::{eventfd::EventFd, signal::Signal, signalfd::SignalFd,
               timerfd::TimerFd};
use std::{os::fd::RawFd, time::Duration};

/// Callback invoked when a watcher's source becomes ready.
///
/// Receives the owning loop (so the callback can stop, reconfigure, or remove
/// watchers — including its own — or call [`EventLoop::exit()`]), the handle
/// of the watcher that fired, and the readiness bits masked to
/// [`Events::DISPATCH_MASK`].
pub type WatcherCallback = Box<dyn FnMut(&mut EventLoop, WatcherHandle, Events)>;

/// The kind of source a watcher observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    /// A caller-supplied file descriptor.
    Io,
    /// A POSIX signal, observed through a signalfd.
    Signal,
    /// A timerfd interval or one-shot timer.
    Timer,
    /// A user-posted eventfd event.
    Event,
    /// Filesystem watcher. Enumerated for the reserved inotify descriptor;
    /// not constructible through the public API.
    Fs,
}

/// Registration state of a watcher.
///
/// `Registered` means the kernel holds an epoll registration tagged with the
/// watcher's handle. `Pseudo` means the watcher is enlisted but dispatched
/// through the unpollable-stdin workaround instead of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activation {
    Inactive,
    Registered,
    Pseudo,
}

/// Kind-specific payload. Signal, timer, and event watchers own their kernel
/// object; dropping the payload closes the descriptor.
pub(crate) enum KindState {
    Io,
    Signal {
        signo: Signal,
        signal_fd: Option<SignalFd>,
    },
    Timer {
        timeout: Duration,
        period: Duration,
        timer_fd: Option<TimerFd>,
    },
    Event {
        event_fd: Option<EventFd>,
    },
    #[allow(dead_code)]
    Fs,
}

/// One registered source: descriptor, interest set, callback, state.
///
/// For I/O watchers `fd` belongs to the caller and is never closed here. For
/// the other kinds `fd` mirrors the raw descriptor of the owned kernel object
/// and is −1 while detached.
pub(crate) struct Watcher {
    pub kind_state: KindState,
    pub fd: RawFd,
    pub events: Events,
    pub activation: Activation,
    /// Taken out of the slot for the duration of a callback invocation, so
    /// the callback can borrow the loop mutably.
    pub cb: Option<WatcherCallback>,
}

impl Watcher {
    pub(crate) fn kind(&self) -> WatcherKind {
        match self.kind_state {
            KindState::Io => WatcherKind::Io,
            KindState::Signal { .. } => WatcherKind::Signal,
            KindState::Timer { .. } => WatcherKind::Timer,
            KindState::Event { .. } => WatcherKind::Event,
            KindState::Fs => WatcherKind::Fs,
        }
    }

    /// Whether the watcher is enlisted with the loop (registered or pseudo).
    pub(crate) fn is_enlisted(&self) -> bool {
        self.activation != Activation::Inactive
    }
}
