// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words CLOEXEC EPERM NONBLOCK epoll inotify

//! The loop context: the epoll instance, the reserved inotify instance, and
//! the watcher registry, plus the registration plumbing shared by all four
//! adapters.
//!
//! # Resources Managed
//!
//! | Resource        | Responsibility                                         |
//! | :-------------- | :----------------------------------------------------- |
//! | epoll fd        | The demultiplexer every watcher registers with         |
//! | inotify fd      | Reserved for a future filesystem watcher kind          |
//! | registry        | Owns watcher storage; handles are generational tokens  |
//!
//! The loop is single-threaded: exactly one thread may call [`run()`] or any
//! watcher operation for a given [`EventLoop`], and callbacks execute
//! synchronously on that thread.
//!
//! [`run()`]: EventLoop::run

use crate::{error::EventLoopError,
            events::Events,
            handle::WatcherHandle,
            registry::WatcherRegistry,
            watcher::{Activation, Watcher, WatcherKind}};
use nix::{errno::Errno,
          sys::{epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags},
                inotify::{InitFlags, Inotify}}};
use std::os::fd::{AsRawFd, BorrowedFd};

/// Default ready-set capacity, for callers with no particular batching needs.
pub const DEFAULT_MAX_EVENTS: usize = 10;

/// A single-threaded epoll event loop dispatching watcher callbacks.
///
/// Create with [`new()`], register watchers through the `io_*` / `signal_*` /
/// `timer_*` / `event_*` operations, then drive everything with [`run()`].
/// [`exit()`] stops all watchers and releases the context descriptors; it is
/// safe to call twice, and safe to call from inside a callback to terminate
/// [`run()`].
///
/// [`exit()`]: Self::exit
/// [`new()`]: Self::new
/// [`run()`]: Self::run
#[allow(missing_debug_implementations)]
pub struct EventLoop {
    pub(crate) epoll: Option<Epoll>,
    /// Allocated up front so a filesystem watcher kind can attach to it
    /// later; closed on [`exit()`](Self::exit).
    pub(crate) inotify: Option<Inotify>,
    pub(crate) registry: WatcherRegistry,
    pub(crate) running: bool,
    /// Rejects re-entrant [`run()`](Self::run) calls from callbacks.
    pub(crate) in_dispatch: bool,
    pub(crate) max_events: usize,
    /// Sticky flag: at least one watcher is pseudo-registered and must be
    /// dispatched by probing instead of by the kernel.
    pub(crate) workaround: bool,
}

impl EventLoop {
    /// Creates an event loop whose wait cycles report at most `max_events`
    /// ready watchers each.
    ///
    /// # Errors
    ///
    /// [`EventLoopError::InvalidCapacity`] for `max_events < 1`, or a
    /// creation variant if a kernel object cannot be allocated.
    pub fn new(max_events: usize) -> Result<Self, EventLoopError> {
        if max_events < 1 {
            return Err(EventLoopError::InvalidCapacity);
        }

        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(EventLoopError::EpollCreation)?;
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(EventLoopError::InotifyCreation)?;

        Ok(Self {
            epoll: Some(epoll),
            inotify: Some(inotify),
            registry: WatcherRegistry::default(),
            running: false,
            in_dispatch: false,
            max_events,
            workaround: false,
        })
    }

    /// Stops every enlisted watcher, clears the running flag, and closes the
    /// context descriptors. Safe to call more than once.
    pub fn exit(&mut self) -> Result<(), EventLoopError> {
        for handle in self.registry.handles() {
            let kind = match self.registry.get(handle) {
                Some(watcher) if watcher.is_enlisted() => watcher.kind(),
                _ => continue,
            };
            let stopped = match kind {
                WatcherKind::Io => self.io_stop(handle),
                WatcherKind::Signal => self.signal_stop(handle),
                WatcherKind::Timer => self.timer_stop(handle),
                WatcherKind::Event => self.event_stop(handle),
                WatcherKind::Fs => self.watcher_stop(handle),
            };
            if let Err(error) = stopped {
                tracing::debug!(
                    message = "failed to stop watcher during exit",
                    error = %error
                );
            }
        }

        self.running = false;
        self.workaround = false;
        self.epoll = None;
        self.inotify = None;

        Ok(())
    }

    /// Whether the watcher behind `handle` currently holds a kernel
    /// registration. Pseudo-registered and stopped watchers report `false`,
    /// as do stale handles.
    #[must_use]
    pub fn is_active(&self, handle: WatcherHandle) -> bool {
        self.registry
            .get(handle)
            .is_some_and(|watcher| watcher.activation == Activation::Registered)
    }

    /// The kind of the watcher behind `handle`, or `None` for a stale handle.
    #[must_use]
    pub fn watcher_kind(&self, handle: WatcherHandle) -> Option<WatcherKind> {
        self.registry.get(handle).map(Watcher::kind)
    }

    /// Stops the watcher (closing any owned kernel object) and frees its
    /// slot. The handle and all copies of it become stale.
    pub fn remove(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        let kind = match self.registry.get(handle) {
            Some(watcher) => watcher.kind(),
            None => return Err(EventLoopError::StaleHandle),
        };

        let stopped = match kind {
            WatcherKind::Io => self.io_stop(handle),
            WatcherKind::Signal => self.signal_stop(handle),
            WatcherKind::Timer => self.timer_stop(handle),
            WatcherKind::Event => self.event_stop(handle),
            WatcherKind::Fs => self.watcher_stop(handle),
        };
        if let Err(error) = stopped {
            tracing::debug!(
                message = "failed to stop watcher during removal",
                error = %error
            );
        }

        // Dropping the slot closes any still-owned descriptor and bumps the
        // generation, so pending ready records for this watcher are skipped.
        self.registry.remove(handle);
        Ok(())
    }

    /// Registers the watcher with the kernel and marks it enlisted.
    ///
    /// Already-enlisted watchers are left untouched. The one tolerated
    /// rejection is `EPERM` for a read-only I/O watcher on stdin, which the
    /// kernel raises for unpollable descriptors (`app < file.txt`); that
    /// watcher becomes pseudo-registered and the workaround flag turns on.
    pub(crate) fn watcher_start(
        &mut self,
        handle: WatcherHandle,
    ) -> Result<(), EventLoopError> {
        let Some(epoll) = self.epoll.as_ref() else {
            return Err(EventLoopError::LoopClosed);
        };
        let Some(watcher) = self.registry.get_mut(handle) else {
            return Err(EventLoopError::StaleHandle);
        };
        if watcher.fd < 0 {
            return Err(EventLoopError::InvalidFd);
        }
        if watcher.is_enlisted() {
            return Ok(());
        }

        let event = EpollEvent::new(
            watcher.events.to_epoll_flags() | EpollFlags::EPOLLRDHUP,
            handle.to_epoll_data(),
        );
        let fd = unsafe { BorrowedFd::borrow_raw(watcher.fd) };
        match epoll.add(fd, event) {
            Ok(()) => {
                watcher.activation = Activation::Registered;
                Ok(())
            }
            Err(Errno::EPERM)
                if watcher.kind() == WatcherKind::Io
                    && watcher.events == Events::READ
                    && watcher.fd == libc::STDIN_FILENO =>
            {
                tracing::debug!(
                    message = "stdin rejected by epoll, switching to pseudo dispatch"
                );
                watcher.activation = Activation::Pseudo;
                self.workaround = true;
                Ok(())
            }
            Err(errno) => Err(EventLoopError::Registration(errno)),
        }
    }

    /// Deregisters the watcher and marks it inactive. Pseudo-registered
    /// watchers only leave the list; there is no kernel registration to
    /// delete.
    pub(crate) fn watcher_stop(
        &mut self,
        handle: WatcherHandle,
    ) -> Result<(), EventLoopError> {
        let epoll_fd = self.epoll.as_ref().map(|epoll| epoll.0.as_raw_fd());
        let Some(watcher) = self.registry.get_mut(handle) else {
            return Err(EventLoopError::StaleHandle);
        };

        match watcher.activation {
            Activation::Inactive => Ok(()),
            Activation::Pseudo => {
                watcher.activation = Activation::Inactive;
                Ok(())
            }
            Activation::Registered => {
                watcher.activation = Activation::Inactive;
                let fd = watcher.fd;
                let Some(epoll_fd) = epoll_fd else {
                    // The epoll fd is gone; its interest list died with it.
                    return Ok(());
                };
                // Raw EPOLL_CTL_DEL: the watched descriptor may already be
                // closed by the caller, which an owned-fd wrapper could not
                // express.
                let rc = unsafe {
                    libc::epoll_ctl(
                        epoll_fd,
                        libc::EPOLL_CTL_DEL,
                        fd,
                        std::ptr::null_mut(),
                    )
                };
                if rc < 0 {
                    return Err(EventLoopError::Deregistration(Errno::last()));
                }
                Ok(())
            }
        }
    }

    /// Rewrites the kernel registration in place (`EPOLL_CTL_MOD`). Used to
    /// rearm one-shot watchers without touching the list.
    pub(crate) fn watcher_rearm(
        &mut self,
        handle: WatcherHandle,
    ) -> Result<(), EventLoopError> {
        let Some(epoll) = self.epoll.as_ref() else {
            return Err(EventLoopError::LoopClosed);
        };
        let Some(watcher) = self.registry.get(handle) else {
            return Err(EventLoopError::StaleHandle);
        };
        if watcher.fd < 0 {
            return Err(EventLoopError::InvalidFd);
        }

        let mut event = EpollEvent::new(
            watcher.events.to_epoll_flags() | EpollFlags::EPOLLRDHUP,
            handle.to_epoll_data(),
        );
        let fd = unsafe { BorrowedFd::borrow_raw(watcher.fd) };
        epoll
            .modify(fd, &mut event)
            .map_err(EventLoopError::Registration)
    }
}
