use std::time::Duration;

use minios::{boot, syscalls, Error, Tid};

mod common;
use common::setup;

#[test]
fn join_returns_the_exit_value() {
    setup();
    let status = boot(
        |_| {
            let tid = syscalls::create_thread(|_| 7, &[]).unwrap();
            assert_eq!(syscalls::thread_join(tid).unwrap(), 7);
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn threads_receive_their_own_arguments() {
    setup();
    let status = boot(
        |_| {
            let tid = syscalls::create_thread(
                |args| i32::from(args == b"worker-args"),
                b"worker-args",
            )
            .unwrap();
            syscalls::thread_join(tid).unwrap()
        },
        &[],
    );
    assert_eq!(status, 1);
}

#[test]
fn every_joiner_sees_the_same_value() {
    setup();
    let status = boot(
        |_| {
            let worker = syscalls::create_thread(
                |_| {
                    std::thread::sleep(Duration::from_millis(20));
                    99
                },
                &[],
            )
            .unwrap();

            let mut joiners = Vec::new();
            for _ in 0..3 {
                joiners.push(
                    syscalls::create_thread(
                        move |_| {
                            assert_eq!(syscalls::thread_join(worker).unwrap(), 99);
                            0
                        },
                        &[],
                    )
                    .unwrap(),
                );
            }
            for tid in joiners {
                // Joiners may already be gone once the worker exits; both
                // outcomes are fine as long as nobody saw a wrong value.
                let _ = syscalls::thread_join(tid);
            }
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn self_join_and_missing_threads_are_rejected() {
    setup();
    let status = boot(
        |_| {
            assert_eq!(
                syscalls::thread_join(syscalls::thread_self()),
                Err(Error::NoThread)
            );
            assert_eq!(syscalls::thread_join(Tid(555)), Err(Error::NoThread));
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn detached_threads_cannot_be_joined() {
    setup();
    let status = boot(
        |_| {
            let worker = syscalls::create_thread(
                |_| {
                    std::thread::sleep(Duration::from_millis(20));
                    0
                },
                &[],
            )
            .unwrap();
            syscalls::thread_detach(worker).unwrap();
            assert_eq!(syscalls::thread_join(worker), Err(Error::NoThread));

            // Keep the process alive until the worker is done.
            std::thread::sleep(Duration::from_millis(40));
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn detach_after_exit_fails() {
    setup();
    let status = boot(
        |_| {
            let worker = syscalls::create_thread(|_| 0, &[]).unwrap();
            // Give the worker time to finish without being joined.
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(syscalls::thread_detach(worker), Err(Error::NoThread));
            assert_eq!(syscalls::thread_join(worker), Err(Error::NoThread));
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn join_after_exit_still_returns_the_value() {
    setup();
    let status = boot(
        |_| {
            let worker = syscalls::create_thread(|_| 31, &[]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            // The control block is kept until someone joins it.
            assert_eq!(syscalls::thread_join(worker).unwrap(), 31);
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn last_thread_out_ends_the_process() {
    setup();
    let status = boot(
        |_| {
            let child = syscalls::exec(
                |_| {
                    syscalls::create_thread(
                        |_| {
                            std::thread::sleep(Duration::from_millis(30));
                            syscalls::thread_exit(9)
                        },
                        &[],
                    )
                    .unwrap();
                    // Main bows out early; the worker carries the process.
                    syscalls::thread_exit(5)
                },
                &[],
            )
            .unwrap();
            let (_, code) = syscalls::wait_child(Some(child)).unwrap();
            assert_eq!(code, 9);
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn tids_are_unique_and_main_is_one() {
    setup();
    let status = boot(
        |_| {
            assert_eq!(syscalls::thread_self(), Tid(1));
            let a = syscalls::create_thread(|_| 0, &[]).unwrap();
            let b = syscalls::create_thread(|_| 0, &[]).unwrap();
            assert_ne!(a, b);
            assert!(a.0 >= 2 && b.0 >= 2);
            syscalls::thread_join(a).unwrap();
            syscalls::thread_join(b).unwrap();
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}
