//! Multi-threaded use of one engine
//!
//! Two worker threads drive independent sessions against a shared,
//! advisory-locked collection while an observer samples it.

use cmdq::{Command, CommandEngine, CommandVec, SessionId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const CYCLES: usize = 100;

#[test]
fn test_two_sessions_remove_revert_redo_cycles() {
    let engine = CommandEngine::new();
    let list = CommandVec::from_vec(&engine, (0..20).collect::<Vec<u32>>());
    let initial_len = list.len();
    let done = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(3));

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let list = list.clone();
            let start = start.clone();
            thread::spawn(move || {
                let engine = list.engine().clone();
                let session = SessionId::new();
                engine.activate(session);
                start.wait();

                for _ in 0..CYCLES {
                    assert!(list.remove(worker).unwrap());
                    assert!(engine.undo_last().unwrap());
                    assert!(engine.redo_last().unwrap());
                    assert!(engine.undo_last().unwrap());
                    assert_eq!(engine.current_session(), session);
                }
                assert!(engine.can_do(session));
                assert!(!engine.can_undo(session));
                session
            })
        })
        .collect();

    let observer = {
        let list = list.clone();
        let done = done.clone();
        let start = start.clone();
        thread::spawn(move || {
            start.wait();
            let mut samples = 0usize;
            while !done.load(Ordering::Acquire) {
                let len = list.read().len();
                // Each session has at most one element removed at any instant.
                assert!(
                    (initial_len - 2..=initial_len).contains(&len),
                    "transient length {len} outside [{}, {initial_len}]",
                    initial_len - 2
                );
                samples += 1;
                thread::yield_now();
            }
            samples
        })
    };

    let sessions: Vec<SessionId> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    done.store(true, Ordering::Release);
    let samples = observer.join().unwrap();

    assert!(samples > 0);
    assert_eq!(list.len(), initial_len);
    let mut items = list.snapshot();
    items.sort_unstable();
    assert_eq!(items, (0..20).collect::<Vec<u32>>());

    // The workers never touched the built-in session.
    assert!(!engine.can_do(SessionId::DEFAULT));
    for session in sessions {
        assert_eq!(engine.history_len(session), 1);
    }
}

#[test]
fn test_command_bodies_never_overlap() {
    let engine = CommandEngine::new();
    let running = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let body = {
        let running = running.clone();
        let max_seen = max_seen.clone();
        move || {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_micros(200));
            running.fetch_sub(1, Ordering::SeqCst);
        }
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let body = body.clone();
            thread::spawn(move || {
                engine.activate(SessionId::new());
                for _ in 0..25 {
                    let (apply, revert) = (body.clone(), body.clone());
                    engine
                        .enqueue_and_run(Command::from_fn(
                            move |_| {
                                apply();
                                Ok(())
                            },
                            move |_| {
                                revert();
                                Ok(())
                            },
                        ))
                        .unwrap();
                    engine.undo_last().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_thread_without_activation_uses_default_session() {
    let engine = CommandEngine::new();
    let session = SessionId::new();
    engine.activate(session);

    let worker = engine.clone();
    thread::spawn(move || {
        assert_eq!(worker.current_session(), SessionId::DEFAULT);
        worker.enqueue_and_run(Command::apply_only(|_| Ok(()))).unwrap();
    })
    .join()
    .unwrap();

    assert!(engine.can_undo(SessionId::DEFAULT));
    assert!(!engine.can_undo(session));
    // This thread is still bound to its own session.
    assert!(!engine.undo_last().unwrap());
}

#[test]
fn test_concurrent_push_and_undo_keeps_other_session_values() {
    let engine = CommandEngine::new();
    let list: CommandVec<u32> = CommandVec::new(&engine);
    let start = Arc::new(Barrier::new(2));

    let keeper = {
        let list = list.clone();
        let start = start.clone();
        thread::spawn(move || {
            list.engine().activate(SessionId::new());
            start.wait();
            for value in 0..200 {
                list.push(value).unwrap();
            }
        })
    };
    let churner = {
        let list = list.clone();
        let start = start.clone();
        thread::spawn(move || {
            let engine = list.engine().clone();
            engine.activate(SessionId::new());
            start.wait();
            for _ in 0..200 {
                list.push(u32::MAX).unwrap();
                assert!(engine.undo_last().unwrap());
            }
        })
    };

    keeper.join().unwrap();
    churner.join().unwrap();
    // Every push landed at the end, so every undo took back its own value.
    assert_eq!(list.snapshot(), (0..200).collect::<Vec<u32>>());
}
