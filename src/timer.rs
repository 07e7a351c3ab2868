// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words timerfd CLOEXEC NONBLOCK itimerspec

//! Timer watchers: one-shot and periodic timers backed by a monotonic
//! timerfd.
//!
//! A timer stores its `(timeout, period)` pair. The kernel timer is armed
//! only while the loop is running; timers created earlier are armed by
//! [`run()`] on entry, so their delay is measured from the start of the loop.
//!
//! A zero `period` makes the timer one-shot: after it fires, the dispatcher
//! treats it as expired and stops it. A zero `timeout` arms the timer with a
//! 1 ns initial expiration, because a literal zero would disarm the timerfd
//! instead of firing it immediately.
//!
//! [`run()`]: EventLoop::run

use crate::{error::EventLoopError,
            event_loop::EventLoop,
            events::Events,
            handle::WatcherHandle,
            watcher::{Activation, KindState, Watcher, WatcherKind}};
use nix::sys::{time::TimeSpec,
               timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags}};
use std::{os::fd::{AsFd, AsRawFd},
          time::Duration};

const TIMER_FD_FLAGS: TimerFlags =
    TimerFlags::TFD_NONBLOCK.union(TimerFlags::TFD_CLOEXEC);

fn create_timer_fd() -> Result<TimerFd, EventLoopError> {
    TimerFd::new(ClockId::CLOCK_MONOTONIC, TIMER_FD_FLAGS)
        .map_err(EventLoopError::TimerFdCreation)
}

/// Initial expiration for the kernel timer. Zero would disarm it, so an
/// immediate fire is requested as 1 ns.
fn initial_expiration(timeout: Duration) -> TimeSpec {
    if timeout.is_zero() {
        TimeSpec::new(0, 1)
    } else {
        TimeSpec::from_duration(timeout)
    }
}

impl EventLoop {
    /// Registers a timer watcher and starts it.
    ///
    /// First fires `timeout` after [`run()`] starts (or after this call, if
    /// the loop is already running), then every `period`. A zero `period`
    /// gives a one-shot timer that stops itself after firing.
    ///
    /// [`run()`]: EventLoop::run
    pub fn timer_init(
        &mut self,
        timeout: Duration,
        period: Duration,
        cb: impl FnMut(&mut EventLoop, WatcherHandle, Events) + 'static,
    ) -> Result<WatcherHandle, EventLoopError> {
        if self.epoll.is_none() {
            return Err(EventLoopError::LoopClosed);
        }

        let timer_fd = create_timer_fd()?;
        let fd = timer_fd.as_fd().as_raw_fd();

        let handle = self.registry.insert(Watcher {
            kind_state: KindState::Timer {
                timeout,
                period,
                timer_fd: Some(timer_fd),
            },
            fd,
            events: Events::READ,
            activation: Activation::Inactive,
            cb: Some(Box::new(cb)),
        });

        if let Err(error) = self.timer_set(handle, timeout, period) {
            let _ = self.watcher_stop(handle);
            self.registry.remove(handle);
            return Err(error);
        }
        Ok(handle)
    }

    /// Stores a new `(timeout, period)` pair and re-arms the kernel timer if
    /// the loop is running. Recreates the timerfd when the watcher had been
    /// stopped.
    pub fn timer_set(
        &mut self,
        handle: WatcherHandle,
        timeout: Duration,
        period: Duration,
    ) -> Result<(), EventLoopError> {
        let running = self.running;
        {
            let Some(watcher) = self.registry.get_mut(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            let KindState::Timer {
                timeout: stored_timeout,
                period: stored_period,
                timer_fd,
            } = &mut watcher.kind_state
            else {
                return Err(EventLoopError::KindMismatch);
            };

            *stored_timeout = timeout;
            *stored_period = period;

            if timer_fd.is_none() {
                // The watcher was stopped; give it a fresh timerfd.
                let fresh = create_timer_fd()?;
                watcher.fd = fresh.as_fd().as_raw_fd();
                *timer_fd = Some(fresh);
            }

            if running {
                if let Some(timer_fd) = timer_fd {
                    timer_fd
                        .set(
                            Expiration::IntervalDelayed(
                                initial_expiration(timeout),
                                TimeSpec::from_duration(period),
                            ),
                            TimerSetTimeFlags::empty(),
                        )
                        .map_err(EventLoopError::TimerArm)?;
                }
            }
        }

        self.watcher_start(handle)
    }

    /// Starts a stopped timer again with its stored pair. An active timer is
    /// stopped first, so the delay restarts from now.
    pub fn timer_start(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        let (timeout, period, has_fd) = {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            let KindState::Timer {
                timeout, period, ..
            } = watcher.kind_state
            else {
                return Err(EventLoopError::KindMismatch);
            };
            (timeout, period, watcher.fd >= 0)
        };

        if has_fd {
            let _ = self.timer_stop(handle);
        }
        self.timer_set(handle, timeout, period)
    }

    /// Stops a timer: disarms it, deregisters it, and closes its timerfd.
    /// A no-op when the watcher is already inactive.
    pub fn timer_stop(&mut self, handle: WatcherHandle) -> Result<(), EventLoopError> {
        {
            let Some(watcher) = self.registry.get(handle) else {
                return Err(EventLoopError::StaleHandle);
            };
            if watcher.kind() != WatcherKind::Timer {
                return Err(EventLoopError::KindMismatch);
            }
            if watcher.activation != Activation::Registered {
                return Ok(());
            }
            if let KindState::Timer {
                timer_fd: Some(timer_fd),
                ..
            } = &watcher.kind_state
            {
                // Best effort; closing the descriptor disarms it anyway.
                let _ = timer_fd.unset();
            }
        }

        self.watcher_stop(handle)?;

        if let Some(watcher) = self.registry.get_mut(handle) {
            if let KindState::Timer { timer_fd, .. } = &mut watcher.kind_state {
                *timer_fd = None;
            }
            watcher.fd = -1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests_expiration {
    use super::*;

    #[test]
    fn zero_timeout_arms_with_one_nanosecond() {
        let spec = initial_expiration(Duration::ZERO);
        assert_eq!(spec, TimeSpec::new(0, 1));
    }

    #[test]
    fn nonzero_timeout_is_preserved() {
        let spec = initial_expiration(Duration::from_millis(50));
        assert_eq!(spec, TimeSpec::from_duration(Duration::from_millis(50)));
    }
}
