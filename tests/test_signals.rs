// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words signalfd signo SIGURG SIGUSR SIGWINCH

//! Signal watcher behavior.
//!
//! `raise()` sends a thread-directed signal, and each watcher blocks its
//! signal in the calling thread before it is raised, so these tests are safe
//! under the default multi-threaded test runner as long as each test uses
//! its own signal number.

use r3bl_evloop::{EventLoop, Events, RunFlags, Signal};
use nix::sys::signal::raise;
use std::{cell::Cell, rc::Rc};

#[test]
fn signal_watcher_delivers_pending_signal() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();

    let handle = event_loop
        .signal_init(Signal::SIGUSR1, move |el, _, events| {
            assert!(events.contains(Events::READ));
            cb_count.set(cb_count.get() + 1);
            el.exit().unwrap();
        })
        .unwrap();
    assert!(event_loop.is_active(handle));

    // Blocked by signal_init, so this queues for the signalfd.
    raise(Signal::SIGUSR1).unwrap();

    event_loop.run(RunFlags::empty()).unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn signal_set_switches_to_a_new_signal() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();

    let handle = event_loop
        .signal_init(Signal::SIGUSR2, move |el, _, _| {
            cb_count.set(cb_count.get() + 1);
            el.exit().unwrap();
        })
        .unwrap();

    event_loop.signal_set(handle, Signal::SIGWINCH).unwrap();
    raise(Signal::SIGWINCH).unwrap();

    event_loop.run(RunFlags::empty()).unwrap();
    assert_eq!(count.get(), 1);
}

#[test]
fn stopped_signal_watcher_can_be_started_again() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();

    let handle = event_loop
        .signal_init(Signal::SIGURG, move |el, _, _| {
            cb_count.set(cb_count.get() + 1);
            el.exit().unwrap();
        })
        .unwrap();

    event_loop.signal_stop(handle).unwrap();
    assert!(!event_loop.is_active(handle));

    // Start recreates the signalfd and re-registers it.
    event_loop.signal_start(handle).unwrap();
    assert!(event_loop.is_active(handle));

    raise(Signal::SIGURG).unwrap();
    event_loop.run(RunFlags::empty()).unwrap();
    assert_eq!(count.get(), 1);
}
