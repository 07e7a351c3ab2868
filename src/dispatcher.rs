// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR EPERM FIONREAD NONBLOCK epoll eventfd signalfd timerfd

//! The wait/dispatch cycle behind [`EventLoop::run()`].
//!
//! # How a Cycle Runs
//!
//! 1. **Pseudo pass** — while the workaround flag is set, pseudo-registered
//!    watchers (stdin redirected from a regular file, which epoll refuses)
//!    are dispatched by probing the descriptor instead of waiting on the
//!    kernel. A pass that fired anything skips the kernel wait for this
//!    cycle.
//! 2. **Kernel wait** — block in `epoll_wait` for up to `max_events` ready
//!    records. `EINTR` retries; any other failure tears the loop down and
//!    surfaces [`EventLoopError::WaitFailed`].
//! 3. **Dispatch** — each ready record resolves back to its watcher through
//!    the generational handle stored in the registration. Kind-specific
//!    pre-callback handling runs first (counter drains, HUP/ERR auto-stop,
//!    one-shot timer expiry), then the callback fires with the masked bits.
//!
//! The callback invocation is the last action touching the watcher in each
//! iteration: callbacks may stop, reconfigure, or remove any watcher —
//! including the one being dispatched — and may call
//! [`EventLoop::exit()`] to end the loop.
//!
//! [`EventLoop::run()`]: EventLoop::run
//! [`EventLoop::exit()`]: EventLoop::exit

use crate::{error::EventLoopError,
            event_loop::EventLoop,
            events::{Events, RunFlags},
            handle::WatcherHandle,
            watcher::{Activation, KindState, Watcher, WatcherKind}};
use nix::{errno::Errno,
          poll::{poll, PollFd, PollFlags, PollTimeout},
          sys::epoll::{EpollEvent, EpollFlags, EpollTimeout}};
use std::{os::fd::{BorrowedFd, RawFd}, time::Duration};

/// Outcome of one kernel wait, after `EINTR` retries.
enum WaitOutcome {
    Ready(usize),
    /// The running flag was cleared while the wait was blocked.
    Stopped,
    Failed(Errno),
}

impl EventLoop {
    /// Runs the loop until [`exit()`] is called, the last watcher stops, or a
    /// mode flag ends it early.
    ///
    /// On entry every registered timer is re-armed with its stored
    /// `(timeout, period)` pair, so timers created before `run` start
    /// counting from here.
    ///
    /// # Errors
    ///
    /// - [`EventLoopError::LoopClosed`] if [`exit()`] already ran.
    /// - [`EventLoopError::ReentrantRun`] when called from a callback.
    /// - [`EventLoopError::WaitFailed`] if the kernel wait fails
    ///   unrecoverably; the loop has torn itself down before returning this.
    ///
    /// [`exit()`]: Self::exit
    pub fn run(&mut self, flags: RunFlags) -> Result<(), EventLoopError> {
        if self.epoll.is_none() {
            return Err(EventLoopError::LoopClosed);
        }
        if self.in_dispatch {
            return Err(EventLoopError::ReentrantRun);
        }

        self.running = true;

        // Timers are lazily started: arm every registered timer now so a
        // timer created before `run` measures its delay from this point.
        for handle in self.registry.handles() {
            let pair = match self.registry.get(handle) {
                Some(watcher) if watcher.is_enlisted() => match watcher.kind_state {
                    KindState::Timer { timeout, period, .. } => Some((timeout, period)),
                    _ => None,
                },
                _ => None,
            };
            if let Some((timeout, period)) = pair {
                let _ = self.timer_set(handle, timeout, period);
            }
        }

        self.in_dispatch = true;
        let result = self.run_cycles(flags);
        self.in_dispatch = false;
        result
    }

    fn run_cycles(&mut self, flags: RunFlags) -> Result<(), EventLoopError> {
        let timeout = if flags.contains(RunFlags::NONBLOCK) {
            EpollTimeout::ZERO
        } else {
            EpollTimeout::NONE
        };
        let mut ready = vec![EpollEvent::empty(); self.max_events];

        while self.running && self.registry.has_enlisted() {
            if self.workaround {
                if self.dispatch_pseudo_ready() {
                    // Something fired; re-evaluate before the kernel wait.
                    continue;
                }
                self.workaround = false;
            }

            let ready_count = match self.wait_for_ready(&mut ready, timeout) {
                WaitOutcome::Ready(count) => count,
                WaitOutcome::Stopped => break,
                WaitOutcome::Failed(errno) => {
                    tracing::error!(
                        message = "epoll_wait failed, shutting the loop down",
                        errno = %errno
                    );
                    let _ = self.exit();
                    return Err(EventLoopError::WaitFailed(errno));
                }
            };

            // Copy the records out so dispatch can borrow the loop mutably.
            let records: Vec<(u64, EpollFlags)> = ready[..ready_count]
                .iter()
                .map(|record| (record.data(), record.events()))
                .collect();
            for (data, raw_flags) in records {
                if !self.running {
                    break;
                }
                self.dispatch_record(data, raw_flags);
            }

            if flags.contains(RunFlags::ONCE) {
                break;
            }
            if flags.contains(RunFlags::NONBLOCK) && ready_count == 0 {
                break;
            }
        }

        Ok(())
    }

    fn wait_for_ready(
        &self,
        ready: &mut [EpollEvent],
        timeout: EpollTimeout,
    ) -> WaitOutcome {
        loop {
            let Some(epoll) = self.epoll.as_ref() else {
                return WaitOutcome::Stopped;
            };
            match epoll.wait(ready, timeout) {
                Ok(count) => return WaitOutcome::Ready(count),
                Err(errno) => {
                    if !self.running {
                        return WaitOutcome::Stopped;
                    }
                    if errno == Errno::EINTR {
                        // Signalled, try again.
                        continue;
                    }
                    return WaitOutcome::Failed(errno);
                }
            }
        }
    }

    /// Dispatches one ready record: pre-callback handling by kind, then the
    /// callback with the masked bits.
    fn dispatch_record(&mut self, data: u64, raw_flags: EpollFlags) {
        let handle = WatcherHandle::from_epoll_data(data);
        let Some(kind) = self.registry.get(handle).map(Watcher::kind) else {
            // A callback earlier in this batch removed the watcher; its
            // generation no longer matches, so the record is safely dropped.
            tracing::trace!(message = "ready record for removed watcher", data);
            return;
        };

        let raw_events = Events::from_epoll_flags(raw_flags);
        let events = match kind {
            WatcherKind::Io => {
                if raw_events.intersects(Events::HUP | Events::ERROR) {
                    // Stopped before the callback runs; the callback still
                    // receives the bits and decides whether to restart.
                    tracing::debug!(
                        message = "stopping I/O watcher on hang-up or error",
                        events = ?raw_events
                    );
                    let _ = self.io_stop(handle);
                }
                raw_events
            }
            WatcherKind::Signal => self.drain_signal(handle, raw_events),
            WatcherKind::Timer => self.drain_timer(handle, raw_events),
            WatcherKind::Event => self.drain_event(handle, raw_events),
            WatcherKind::Fs => {
                tracing::debug!(message = "filesystem watcher kind is reserved");
                raw_events
            }
        };

        // NOTE: must be the last action for this watcher, the callback may
        // remove itself.
        self.invoke_callback(handle, events & Events::DISPATCH_MASK);
    }

    /// Reads one signal record. A short read attempts a restart with a fresh
    /// signalfd; if the restart fails too, the watcher is stopped and the
    /// callback sees an error event.
    fn drain_signal(&mut self, handle: WatcherHandle, raw_events: Events) -> Events {
        let drained = match self.registry.get_mut(handle).map(|w| &mut w.kind_state) {
            Some(KindState::Signal {
                signal_fd: Some(signal_fd),
                ..
            }) => matches!(signal_fd.read_signal(), Ok(Some(_))),
            _ => false,
        };
        if drained {
            return raw_events;
        }

        if self.signal_start(handle).is_err() {
            tracing::debug!(message = "signal watcher restart failed, stopping it");
            let _ = self.signal_stop(handle);
            return Events::ERROR;
        }
        raw_events
    }

    /// Reads the expiration counter and applies one-shot bookkeeping: a timer
    /// whose period is zero has expired, and an expired timer is stopped.
    fn drain_timer(&mut self, handle: WatcherHandle, raw_events: Events) -> Events {
        let fd = match self.registry.get(handle) {
            Some(watcher) => watcher.fd,
            None => return raw_events,
        };

        let mut events = raw_events;
        if !drain_counter(fd) {
            let _ = self.timer_stop(handle);
            events = Events::ERROR;
        }

        let expired = match self.registry.get_mut(handle).map(|w| &mut w.kind_state) {
            Some(KindState::Timer {
                timeout, period, ..
            }) => {
                if period.is_zero() {
                    *timeout = Duration::ZERO;
                }
                timeout.is_zero()
            }
            _ => false,
        };
        if expired {
            let _ = self.timer_stop(handle);
        }

        events
    }

    /// Reads the eventfd counter; a short read is surfaced as a hang-up.
    fn drain_event(&mut self, handle: WatcherHandle, raw_events: Events) -> Events {
        let fd = match self.registry.get(handle) {
            Some(watcher) => watcher.fd,
            None => return raw_events,
        };
        if drain_counter(fd) {
            raw_events
        } else {
            Events::HUP
        }
    }

    /// One pass over the pseudo-registered watchers. Each gets a READ
    /// dispatch; when the probe reports no data left, the watcher is
    /// de-listed first and the callback observes it already inactive.
    /// Returns whether anything fired.
    fn dispatch_pseudo_ready(&mut self) -> bool {
        let mut fired = false;
        for handle in self.registry.handles() {
            let probe_fd = match self.registry.get(handle) {
                Some(watcher)
                    if watcher.activation == Activation::Pseudo
                        && watcher.cb.is_some() =>
                {
                    watcher.fd
                }
                _ => continue,
            };

            if !has_readable_data(probe_fd) {
                if let Some(watcher) = self.registry.get_mut(handle) {
                    watcher.activation = Activation::Inactive;
                }
            }

            fired = true;
            self.invoke_callback(handle, Events::READ);
        }
        fired
    }

    /// Takes the callback out of the slot, invokes it with the loop borrowed
    /// mutably, and restores it afterwards — unless the callback removed its
    /// own watcher, in which case the stale handle no longer resolves and the
    /// callback is dropped with it.
    pub(crate) fn invoke_callback(&mut self, handle: WatcherHandle, events: Events) {
        let Some(mut cb) = self
            .registry
            .get_mut(handle)
            .and_then(|watcher| watcher.cb.take())
        else {
            return;
        };

        cb(self, handle, events);

        if let Some(watcher) = self.registry.get_mut(handle) {
            if watcher.cb.is_none() {
                watcher.cb = Some(cb);
            }
        }
    }
}

/// Reads the 8-byte counter a timerfd or eventfd produces. Returns whether a
/// full counter was read.
fn drain_counter(fd: RawFd) -> bool {
    let mut counter = 0u64;
    let bytes_read = unsafe {
        libc::read(
            fd,
            (&mut counter as *mut u64).cast::<libc::c_void>(),
            std::mem::size_of::<u64>(),
        )
    };
    bytes_read == std::mem::size_of::<u64>() as isize
}

/// Non-destructive readiness probe for descriptors epoll refuses: a
/// zero-timeout poll followed by a readable-byte-count query.
fn has_readable_data(fd: RawFd) -> bool {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut poll_fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    match poll(&mut poll_fds, PollTimeout::ZERO) {
        Ok(count) if count > 0 => {}
        _ => return false,
    }

    let mut pending: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut pending) };
    rc == 0 && pending > 0
}

#[cfg(test)]
mod tests_probe {
    use super::*;
    use std::os::fd::AsRawFd;

    fn pipe_pair() -> (std::os::fd::OwnedFd, std::os::fd::OwnedFd) {
        nix::unistd::pipe().expect("pipe creation failed")
    }

    #[test]
    fn probe_sees_pending_pipe_data() {
        let (reader, writer) = pipe_pair();
        nix::unistd::write(&writer, b"x").expect("write failed");
        assert!(has_readable_data(reader.as_raw_fd()));
    }

    #[test]
    fn probe_reports_empty_pipe_as_no_data() {
        let (reader, _writer) = pipe_pair();
        assert!(!has_readable_data(reader.as_raw_fd()));
    }

    #[test]
    fn counter_drain_fails_on_empty_nonblocking_eventfd() {
        use nix::sys::eventfd::{EfdFlags, EventFd};
        let event_fd = EventFd::from_value_and_flags(
            0,
            EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC,
        )
        .expect("eventfd creation failed");
        let raw = {
            use std::os::fd::AsFd;
            event_fd.as_fd().as_raw_fd()
        };
        assert!(!drain_counter(raw));

        event_fd.write(1).expect("eventfd write failed");
        assert!(drain_counter(raw));
    }
}
