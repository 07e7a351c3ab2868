// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words eventfd CLOEXEC NONBLOCK

//! Event watchers: user-posted wakeups backed by a semaphore-style eventfd.
//!
//! [`event_post()`] bumps the counter, which makes the descriptor readable
//! and wakes the loop; the dispatcher drains one count per delivery, so each
//! post produces exactly one callback. Posting is a single-threaded
//! operation — the `&mut` receiver makes that structural.
//!
//! [`event_post()`]: EventLoop::event_post

use crate::{error::EventLoopError,
            event_loop::EventLoop,
            events::Events,
            handle::WatcherHandle,
            watcher::{Activation, KindState, Watcher, WatcherKind}};
use nix::sys::eventfd::{EfdFlags, EventFd};
use std::os::fd::{AsFd, AsRawFd};

const EVENT_FD_FLAGS: EfdFlags = EfdFlags::EFD_NONBLOCK
    .union(EfdFlags::EFD_CLOEXEC)
    .union(EfdFlags::EFD_SEMAPHORE);

impl EventLoop {
    /// Registers an event watcher and starts it. The callback fires once per
    /// [`event_post()`](Self::event_post), with [`Events::READ`].
    pub fn event_init(
        &mut self,
        cb: impl FnMut(&mut EventLoop, WatcherHandle, Events) + 'static,
    ) -> Result<WatcherHandle, EventLoopError> {
        if self.epoll.is_none() {
            return Err(EventLoopError::LoopClosed);
        }

        let event_fd = EventFd::from_value_and_flags(0, EVENT_FD_FLAGS)
            .map_err(EventLoopError::EventFdCreation)?;
        let fd = event_fd.as_fd().as_raw_fd();

        let handle = self.registry.insert(Watcher {
            kind_state: KindState::Event {
                event_fd: Some(event_fd),
            },
            fd,
            events: Events::READ,
            activation: Activation::Inactive,
            cb: Some(Box::new(cb)),
        });

        if let Err(error) = self.watcher_start(handle) {
            self.registry.remove(handle);
            return Err(error);
        }
        Ok(handle)
    }

    /// Posts one event, waking the loop.
    pub fn event_post(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        let Some(watcher) = self.registry.get(handle) else {
            return Err(EventLoopError::StaleHandle);
        };
        let KindState::Event { event_fd } = &watcher.kind_state else {
            return Err(EventLoopError::KindMismatch);
        };
        let Some(event_fd) = event_fd else {
            return Err(EventLoopError::InvalidFd);
        };

        event_fd.write(1).map_err(EventLoopError::EventPost)?;
        Ok(())
    }

    /// Stops an event watcher: deregisters it and closes its eventfd.
    /// A no-op when the watcher is already inactive.
    pub fn event_stop(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            if watcher.kind() != WatcherKind::Event {
                return Err(EventLoopError::KindMismatch);
            }
            if watcher.activation != Activation::Registered {
                return Ok(());
            }
        }

        self.watcher_stop(handle)?;

        if let Some(watcher) = self.registry.get_mut(handle) {
            if let KindState::Event { event_fd } = &mut watcher.kind_state {
                *event_fd = None;
            }
            watcher.fd = -1;
        }
        Ok(())
    }
}
