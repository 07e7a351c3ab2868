// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words oneshot rearm

//! Dispatch behavior for I/O and event watchers: start/stop laws, hang-up
//! pre-stop, non-blocking runs, one-shot rearm, and callback self-removal.

use r3bl_evloop::{EventLoop, EventLoopError, Events, RunFlags};
use std::{cell::Cell, os::fd::{AsRawFd, OwnedFd}, rc::Rc};

fn pipe_pair() -> (OwnedFd, OwnedFd) {
    nix::unistd::pipe().expect("pipe creation failed")
}

fn write_all(fd: &OwnedFd, bytes: &[u8]) {
    nix::unistd::write(fd, bytes).expect("pipe write failed");
}

fn drain_fd(fd: i32) {
    let mut buf = [0u8; 64];
    unsafe {
        libc::read(fd, buf.as_mut_ptr().cast(), buf.len());
    }
}

#[test]
fn init_start_stop_leaves_watcher_inactive() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let (reader, _writer) = pipe_pair();

    let handle = event_loop
        .io_init(reader.as_raw_fd(), Events::READ, |_, _, _| {})
        .unwrap();
    assert!(event_loop.is_active(handle));

    event_loop.io_stop(handle).unwrap();
    assert!(!event_loop.is_active(handle));

    // A stopped watcher can be started again with its stored parameters.
    event_loop.io_start(handle).unwrap();
    assert!(event_loop.is_active(handle));
    event_loop.io_stop(handle).unwrap();
    assert!(!event_loop.is_active(handle));
}

#[test]
fn pipe_read_dispatches_exactly_one_callback() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let (reader, writer) = pipe_pair();
    write_all(&writer, b"hi");

    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();
    let reader_fd = reader.as_raw_fd();
    let handle = event_loop
        .io_init(reader_fd, Events::READ, move |el, handle, events| {
            assert!(events.contains(Events::READ));
            drain_fd(reader_fd);
            cb_count.set(cb_count.get() + 1);
            el.io_stop(handle).unwrap();
            el.exit().unwrap();
        })
        .unwrap();

    event_loop.run(RunFlags::empty()).unwrap();

    assert_eq!(count.get(), 1);
    assert!(!event_loop.is_active(handle));
}

#[test]
fn hang_up_stops_watcher_before_callback_runs() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let (reader, writer) = pipe_pair();
    drop(writer);

    let seen = Rc::new(Cell::new(false));
    let cb_seen = seen.clone();
    event_loop
        .io_init(reader.as_raw_fd(), Events::READ, move |el, handle, events| {
            assert!(events.contains(Events::HUP));
            // The dispatcher stopped the watcher before invoking us.
            assert!(!el.is_active(handle));
            cb_seen.set(true);
            el.exit().unwrap();
        })
        .unwrap();

    event_loop.run(RunFlags::empty()).unwrap();
    assert!(seen.get());
}

#[test]
fn nonblock_with_nothing_ready_returns_without_callbacks() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let (reader, _keep_writer) = pipe_pair();

    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();
    let handle = event_loop
        .io_init(reader.as_raw_fd(), Events::READ, move |_, _, _| {
            cb_count.set(cb_count.get() + 1);
        })
        .unwrap();

    event_loop.run(RunFlags::NONBLOCK).unwrap();

    assert_eq!(count.get(), 0);
    assert!(event_loop.is_active(handle));
}

#[test]
fn event_post_delivers_exactly_one_read() {
    let mut event_loop = EventLoop::new(8).unwrap();

    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();
    let handle = event_loop
        .event_init(move |_, _, events| {
            assert!(events.contains(Events::READ));
            cb_count.set(cb_count.get() + 1);
        })
        .unwrap();

    event_loop.event_post(handle).unwrap();
    event_loop.run(RunFlags::ONCE).unwrap();
    assert_eq!(count.get(), 1);

    // The counter was drained; a second cycle has nothing to deliver.
    event_loop
        .run(RunFlags::ONCE | RunFlags::NONBLOCK)
        .unwrap();
    assert_eq!(count.get(), 1);
    assert!(event_loop.is_active(handle));
}

#[test]
fn callback_can_remove_its_own_watcher() {
    let mut event_loop = EventLoop::new(8).unwrap();

    let handle = event_loop
        .event_init(move |el, handle, _| {
            el.remove(handle).unwrap();
            el.exit().unwrap();
        })
        .unwrap();

    event_loop.event_post(handle).unwrap();
    event_loop.run(RunFlags::ONCE).unwrap();

    // The handle is stale now; every operation on it says so.
    assert!(event_loop.watcher_kind(handle).is_none());
    assert!(matches!(
        event_loop.event_post(handle),
        Err(EventLoopError::StaleHandle)
    ));
}

#[test]
fn max_events_one_dispatches_one_event_per_cycle() {
    let mut event_loop = EventLoop::new(1).unwrap();

    let count = Rc::new(Cell::new(0usize));
    let first_count = count.clone();
    let second_count = count.clone();
    let first = event_loop
        .event_init(move |_, _, _| first_count.set(first_count.get() + 1))
        .unwrap();
    let second = event_loop
        .event_init(move |_, _, _| second_count.set(second_count.get() + 1))
        .unwrap();

    event_loop.event_post(first).unwrap();
    event_loop.event_post(second).unwrap();

    event_loop.run(RunFlags::ONCE).unwrap();
    assert_eq!(count.get(), 1);

    event_loop.run(RunFlags::ONCE).unwrap();
    assert_eq!(count.get(), 2);
}

#[test]
fn one_shot_watcher_rearms_with_kernel_modify() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let (reader, writer) = pipe_pair();
    let reader_fd = reader.as_raw_fd();

    let count = Rc::new(Cell::new(0usize));
    let cb_count = count.clone();
    let handle = event_loop
        .io_init(reader_fd, Events::READ | Events::ONESHOT, move |_, _, _| {
            drain_fd(reader_fd);
            cb_count.set(cb_count.get() + 1);
        })
        .unwrap();

    // Rearming an active one-shot watcher is a modify: it stays active
    // throughout.
    event_loop
        .io_set(handle, reader_fd, Events::READ | Events::ONESHOT)
        .unwrap();
    assert!(event_loop.is_active(handle));

    write_all(&writer, b"a");
    event_loop.run(RunFlags::ONCE).unwrap();
    assert_eq!(count.get(), 1);

    // The one-shot registration is spent; new data goes undelivered.
    write_all(&writer, b"b");
    event_loop
        .run(RunFlags::ONCE | RunFlags::NONBLOCK)
        .unwrap();
    assert_eq!(count.get(), 1);

    // After an explicit rearm the pending data is delivered.
    event_loop
        .io_set(handle, reader_fd, Events::READ | Events::ONESHOT)
        .unwrap();
    event_loop.run(RunFlags::ONCE).unwrap();
    assert_eq!(count.get(), 2);
}

#[test]
fn exit_is_idempotent_and_closes_the_loop() {
    let mut event_loop = EventLoop::new(8).unwrap();
    let (reader, _keep_writer) = pipe_pair();
    let handle = event_loop
        .io_init(reader.as_raw_fd(), Events::READ, |_, _, _| {})
        .unwrap();

    event_loop.exit().unwrap();
    event_loop.exit().unwrap();

    assert!(!event_loop.is_active(handle));
    assert!(matches!(
        event_loop.run(RunFlags::empty()),
        Err(EventLoopError::LoopClosed)
    ));
    assert!(matches!(
        event_loop.io_init(reader.as_raw_fd(), Events::READ, |_, _, _| {}),
        Err(EventLoopError::LoopClosed)
    ));
}

#[test]
fn callback_stopping_a_sibling_watcher_is_safe() {
    let mut event_loop = EventLoop::new(8).unwrap();

    // Both watchers are posted; whichever fires first removes the other.
    // The other's ready record may still be in the same batch and must be
    // dropped safely.
    let fired = Rc::new(Cell::new(0usize));

    let first_fired = fired.clone();
    let first = event_loop
        .event_init(move |_, _, _| first_fired.set(first_fired.get() + 1))
        .unwrap();
    let second_fired = fired.clone();
    let second = event_loop
        .event_init(move |el, _, _| {
            second_fired.set(second_fired.get() + 1);
            let _ = el.remove(first);
            el.exit().unwrap();
        })
        .unwrap();

    // Dispatch order within a batch follows the kernel's report order; make
    // the remover fire first by posting only it.
    event_loop.event_post(second).unwrap();
    event_loop.run(RunFlags::ONCE).unwrap();

    assert_eq!(fired.get(), 1);
    assert!(event_loop.watcher_kind(first).is_none());
    assert!(event_loop.watcher_kind(second).is_some());
}
