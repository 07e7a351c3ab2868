// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signalfd signo sigprocmask CLOEXEC NONBLOCK

//! Signal watchers: POSIX signals delivered through a signalfd.
//!
//! Watching a signal blocks it via `sigprocmask` so it is queued for the
//! signalfd instead of being handled according to its default disposition.
//! The block is never undone — stopping the watcher closes the signalfd but
//! leaves the signal blocked, matching the usual signalfd idiom.

use crate::{error::EventLoopError,
            event_loop::EventLoop,
            events::Events,
            handle::WatcherHandle,
            watcher::{Activation, KindState, Watcher, WatcherKind}};
use nix::sys::{signal::{sigprocmask, SigSet, SigmaskHow, Signal},
               signalfd::{SfdFlags, SignalFd}};
use std::os::fd::AsRawFd;

const SIGNAL_FD_FLAGS: SfdFlags = SfdFlags::SFD_NONBLOCK.union(SfdFlags::SFD_CLOEXEC);

impl EventLoop {
    /// Registers a watcher for `signo` and starts it immediately.
    ///
    /// Allocates a signalfd with an empty set, then narrows it to `{signo}`
    /// and blocks the signal process-wide.
    pub fn signal_init(
        &mut self,
        signo: Signal,
        cb: impl FnMut(&mut EventLoop, WatcherHandle, Events) + 'static,
    ) -> Result<WatcherHandle, EventLoopError> {
        if self.epoll.is_none() {
            return Err(EventLoopError::LoopClosed);
        }

        let signal_fd = SignalFd::with_flags(&SigSet::empty(), SIGNAL_FD_FLAGS)
            .map_err(EventLoopError::SignalFdCreation)?;
        let fd = signal_fd.as_raw_fd();

        let handle = self.registry.insert(Watcher {
            kind_state: KindState::Signal {
                signo,
                signal_fd: Some(signal_fd),
            },
            fd,
            events: Events::READ,
            activation: Activation::Inactive,
            cb: Some(Box::new(cb)),
        });

        if let Err(error) = self.signal_set(handle, signo) {
            let _ = self.watcher_stop(handle);
            // Dropping the slot closes the signalfd.
            self.registry.remove(handle);
            return Err(error);
        }
        Ok(handle)
    }

    /// Redirects the watcher to a different signal.
    ///
    /// Blocks the new signal and narrows the signalfd set to it. The
    /// previously watched signal stays blocked.
    pub fn signal_set(
        &mut self,
        handle: WatcherHandle,
        signo: Signal,
    ) -> Result<(), EventLoopError> {
        {
            let Some(watcher) = self.registry.get_mut(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            let KindState::Signal {
                signo: stored_signo,
                signal_fd,
            } = &mut watcher.kind_state
            else {
                return Err(EventLoopError::KindMismatch);
            };

            // Remember for callbacks and start/stop.
            *stored_signo = signo;

            let mut mask = SigSet::empty();
            mask.add(signo);

            // Block the signal so it is not handled according to its default
            // disposition.
            sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)
                .map_err(EventLoopError::SignalMask)?;

            if signal_fd.is_none() {
                // The watcher was stopped; give it a fresh signalfd.
                let fresh = SignalFd::with_flags(&SigSet::empty(), SIGNAL_FD_FLAGS)
                    .map_err(EventLoopError::SignalFdCreation)?;
                watcher.fd = fresh.as_raw_fd();
                *signal_fd = Some(fresh);
            }
            if let Some(signal_fd) = signal_fd {
                signal_fd
                    .set_mask(&mask)
                    .map_err(EventLoopError::SignalMask)?;
            }
        }

        self.watcher_start(handle)
    }

    /// Starts a stopped signal watcher again, recreating its signalfd.
    pub fn signal_start(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        let signo = {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            let KindState::Signal { signo, .. } = watcher.kind_state else {
                return Err(EventLoopError::KindMismatch);
            };
            signo
        };

        let _ = self.signal_stop(handle);
        self.signal_set(handle, signo)
    }

    /// Stops a signal watcher: deregisters it and closes its signalfd.
    /// A no-op when the watcher is already inactive.
    pub fn signal_stop(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            if watcher.kind() != WatcherKind::Signal {
                return Err(EventLoopError::KindMismatch);
            }
            if watcher.activation != Activation::Registered {
                return Ok(());
            }
        }

        self.watcher_stop(handle)?;

        if let Some(watcher) = self.registry.get_mut(handle) {
            if let KindState::Signal { signal_fd, .. } = &mut watcher.kind_state {
                // Drop closes the descriptor.
                *signal_fd = None;
            }
            watcher.fd = -1;
        }
        Ok(())
    }
}
