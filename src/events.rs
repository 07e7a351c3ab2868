// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EPOLLERR EPOLLET EPOLLHUP EPOLLIN EPOLLONESHOT EPOLLOUT EPOLLPRI
// cspell:words EPOLLRDHUP bitmask oneshot rearm

//! Readiness bitmasks shared by watchers, the kernel registration layer, and
//! callbacks.
//!
//! [`Events`] mirrors the kernel's epoll event bits one-for-one, so the values
//! a callback receives are the same values `epoll_wait` reported, masked to
//! [`Events::DISPATCH_MASK`]. [`RunFlags`] selects the [`run()`] mode.
//!
//! [`run()`]: crate::EventLoop::run

use nix::sys::epoll::EpollFlags;

bitflags::bitflags! {
    /// Readiness conditions a watcher can request and a callback can receive.
    ///
    /// The empty set is the "no events" value. I/O watchers choose their
    /// interest set at registration; signal, timer, and event watchers are
    /// always registered for [`Events::READ`].
    ///
    /// Callbacks must tolerate [`Events::ERROR`], and I/O callbacks should
    /// also check [`Events::HUP`] / [`Events::RDHUP`] — whether to restart the
    /// watcher after either is an application decision.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Events: i32 {
        /// Error condition on the descriptor (`EPOLLERR`).
        const ERROR = libc::EPOLLERR;
        /// Data available to read (`EPOLLIN`).
        const READ = libc::EPOLLIN;
        /// Writing is possible (`EPOLLOUT`).
        const WRITE = libc::EPOLLOUT;
        /// Priority data available (`EPOLLPRI`).
        const PRI = libc::EPOLLPRI;
        /// Hang-up (`EPOLLHUP`).
        const HUP = libc::EPOLLHUP;
        /// Peer closed its writing half (`EPOLLRDHUP`).
        const RDHUP = libc::EPOLLRDHUP;
        /// Edge-triggered registration (`EPOLLET`).
        const EDGE = libc::EPOLLET;
        /// One-shot registration (`EPOLLONESHOT`); requires an explicit rearm
        /// via `io_set` after each delivery.
        const ONESHOT = libc::EPOLLONESHOT;
    }
}

impl Events {
    /// The set of bits a callback may observe. Raw kernel events are masked
    /// to this before dispatch.
    pub const DISPATCH_MASK: Events = Events::ERROR
        .union(Events::READ)
        .union(Events::WRITE)
        .union(Events::PRI)
        .union(Events::HUP)
        .union(Events::RDHUP)
        .union(Events::EDGE)
        .union(Events::ONESHOT);

    /// Converts to the kernel-facing flag type for `epoll_ctl`.
    pub(crate) fn to_epoll_flags(self) -> EpollFlags {
        EpollFlags::from_bits_retain(self.bits())
    }

    /// Converts from the flags `epoll_wait` reported.
    pub(crate) fn from_epoll_flags(flags: EpollFlags) -> Self {
        Events::from_bits_retain(flags.bits())
    }
}

bitflags::bitflags! {
    /// Modes for [`EventLoop::run()`].
    ///
    /// [`EventLoop::run()`]: crate::EventLoop::run
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RunFlags: u8 {
        /// Return after a single wait/dispatch cycle.
        const ONCE = 1;
        /// Use a zero wait timeout; with nothing ready, `run` returns without
        /// invoking any callback.
        const NONBLOCK = 2;
    }
}

#[cfg(test)]
mod tests_event_bits {
    use super::*;

    #[test]
    fn bits_mirror_kernel_constants() {
        assert_eq!(Events::READ.bits(), libc::EPOLLIN);
        assert_eq!(Events::WRITE.bits(), libc::EPOLLOUT);
        assert_eq!(Events::HUP.bits(), libc::EPOLLHUP);
        assert_eq!(Events::ONESHOT.bits(), libc::EPOLLONESHOT);
        assert_eq!(Events::EDGE.bits(), libc::EPOLLET);
    }

    #[test]
    fn dispatch_mask_covers_all_public_bits() {
        let all = Events::ERROR
            | Events::READ
            | Events::WRITE
            | Events::PRI
            | Events::HUP
            | Events::RDHUP
            | Events::EDGE
            | Events::ONESHOT;
        assert_eq!(Events::DISPATCH_MASK, all);
    }

    #[test]
    fn epoll_flag_round_trip_preserves_oneshot_and_edge() {
        let ev = Events::READ | Events::ONESHOT | Events::EDGE;
        let flags = ev.to_epoll_flags();
        assert_eq!(Events::from_epoll_flags(flags), ev);
    }
}
