// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words rearm oneshot

//! I/O watchers: readiness callbacks for caller-supplied file descriptors.
//!
//! The descriptor belongs to the caller and is never closed by the loop.

use crate::{error::EventLoopError,
            event_loop::EventLoop,
            events::Events,
            handle::WatcherHandle,
            watcher::{Activation, KindState, Watcher, WatcherKind}};
use std::os::fd::RawFd;

impl EventLoop {
    /// Registers an I/O watcher for `fd` and starts it immediately.
    ///
    /// `events` selects the readiness conditions to watch
    /// ([`Events::READ`], [`Events::WRITE`], optionally [`Events::EDGE`] or
    /// [`Events::ONESHOT`]).
    ///
    /// # Errors
    ///
    /// [`EventLoopError::InvalidFd`] for a negative descriptor, or a
    /// registration error from the kernel. The one rejection that is *not* an
    /// error: `EPERM` for a read-only watcher on stdin, which switches the
    /// watcher to pseudo dispatch (stdin redirected from a regular file).
    pub fn io_init(
        &mut self,
        fd: RawFd,
        events: Events,
        cb: impl FnMut(&mut EventLoop, WatcherHandle, Events) + 'static,
    ) -> Result<WatcherHandle, EventLoopError> {
        if fd < 0 {
            return Err(EventLoopError::InvalidFd);
        }
        if self.epoll.is_none() {
            return Err(EventLoopError::LoopClosed);
        }

        let handle = self.registry.insert(Watcher {
            kind_state: KindState::Io,
            fd,
            events,
            activation: Activation::Inactive,
            cb: Some(Box::new(cb)),
        });

        if let Err(error) = self.watcher_start(handle) {
            self.registry.remove(handle);
            return Err(error);
        }
        Ok(handle)
    }

    /// Reconfigures an I/O watcher with a new descriptor and interest set.
    ///
    /// With [`Events::ONESHOT`] set, an active watcher on the same descriptor
    /// is rearmed in place with a kernel modify — no deregistration, no list
    /// churn. Every other combination stops the watcher and re-registers it.
    pub fn io_set(
        &mut self,
        handle: WatcherHandle,
        fd: RawFd,
        events: Events,
    ) -> Result<(), EventLoopError> {
        if fd < 0 {
            return Err(EventLoopError::InvalidFd);
        }

        let rearm = {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            if watcher.kind() != WatcherKind::Io {
                return Err(EventLoopError::KindMismatch);
            }
            events.contains(Events::ONESHOT)
                && watcher.activation == Activation::Registered
                && watcher.fd == fd
        };

        if rearm {
            if let Some(watcher) = self.registry.get_mut(handle) {
                watcher.events = events;
            }
            return self.watcher_rearm(handle);
        }

        // Ignore any errors, only to clean up anything lingering.
        let _ = self.io_stop(handle);

        if let Some(watcher) = self.registry.get_mut(handle) {
            watcher.fd = fd;
            watcher.events = events;
        }
        self.watcher_start(handle)
    }

    /// Starts a stopped I/O watcher again with its stored descriptor and
    /// interest set.
    pub fn io_start(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        let (fd, events) = {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            if watcher.kind() != WatcherKind::Io {
                return Err(EventLoopError::KindMismatch);
            }
            (watcher.fd, watcher.events)
        };
        self.io_set(handle, fd, events)
    }

    /// Stops an I/O watcher. The descriptor remains open — it belongs to the
    /// caller.
    pub fn io_stop(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        let Some(watcher) = self.registry.get(handle) else {
            return Err(EventLoopError::StaleHandle);
        };
        if watcher.kind() != WatcherKind::Io {
            return Err(EventLoopError::KindMismatch);
        }
        self.watcher_stop(handle)
    }
}
