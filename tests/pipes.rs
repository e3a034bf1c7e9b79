use std::time::Duration;

use minios::{boot, syscalls, PIPE_BUFFER_SIZE};
use proptest::prelude::*;

mod common;
use common::{read_full, setup};

#[test]
fn write_then_read_round_trips() {
    setup();
    let status = boot(
        |_| {
            let pair = syscalls::pipe().unwrap();
            assert_eq!(syscalls::write(pair.write, b"hello").unwrap(), 5);

            let mut buf = [0u8; 5];
            assert_eq!(syscalls::read(pair.read, &mut buf).unwrap(), 5);
            assert_eq!(&buf, b"hello");

            // With the writer gone an empty pipe reports end of data.
            syscalls::close(pair.write).unwrap();
            assert_eq!(syscalls::read(pair.read, &mut buf).unwrap(), 0);
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn short_reads_drain_in_order() {
    setup();
    let status = boot(
        |_| {
            let pair = syscalls::pipe().unwrap();
            syscalls::write(pair.write, b"abc").unwrap();

            let mut two = [0u8; 2];
            assert_eq!(syscalls::read(pair.read, &mut two).unwrap(), 2);
            assert_eq!(&two, b"ab");
            let mut one = [0u8; 1];
            assert_eq!(syscalls::read(pair.read, &mut one).unwrap(), 1);
            assert_eq!(one[0], b'c');
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn writer_blocks_on_full_buffer() {
    setup();
    let status = boot(
        |_| {
            let pair = syscalls::pipe().unwrap();
            let fill = vec![0xA5u8; PIPE_BUFFER_SIZE];
            assert_eq!(
                syscalls::write(pair.write, &fill).unwrap(),
                PIPE_BUFFER_SIZE
            );

            // One more byte cannot fit until the reader makes room.
            let w = pair.write;
            let writer = syscalls::create_thread(
                move |_| {
                    assert_eq!(syscalls::write(w, &[0x5A]).unwrap(), 1);
                    0
                },
                &[],
            )
            .unwrap();

            std::thread::sleep(Duration::from_millis(20));
            let mut one = [0u8; 1];
            assert_eq!(syscalls::read(pair.read, &mut one).unwrap(), 1);
            assert_eq!(one[0], 0xA5);
            syscalls::thread_join(writer).unwrap();

            // The buffer is full again: the old bytes minus one, plus the
            // late byte at the very end.
            let mut rest = vec![0u8; PIPE_BUFFER_SIZE];
            read_full(pair.read, &mut rest);
            assert!(rest[..PIPE_BUFFER_SIZE - 1].iter().all(|&b| b == 0xA5));
            assert_eq!(rest[PIPE_BUFFER_SIZE - 1], 0x5A);
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn write_to_read_end_is_rejected() {
    setup();
    let status = boot(
        |_| {
            let pair = syscalls::pipe().unwrap();
            assert_eq!(
                syscalls::write(pair.read, b"x"),
                Err(minios::Error::NotSupported)
            );
            assert_eq!(
                syscalls::read(pair.write, &mut [0u8; 1]),
                Err(minios::Error::NotSupported)
            );
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

#[test]
fn write_fails_once_reader_is_gone() {
    setup();
    let status = boot(
        |_| {
            let pair = syscalls::pipe().unwrap();
            syscalls::close(pair.read).unwrap();
            assert_eq!(
                syscalls::write(pair.write, b"x"),
                Err(minios::Error::BrokenPipe)
            );
            0
        },
        &[],
    );
    assert_eq!(status, 0);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 16, ..ProptestConfig::default() })]

    /// Any payload written in chunks arrives byte-for-byte, even when it is
    /// larger than the pipe buffer and the writer has to block.
    #[test]
    fn pipe_transports_any_payload(
        payload in proptest::collection::vec(any::<u8>(), 1..20_000),
        chunk in 1usize..2048,
    ) {
        setup();
        let status = boot(
            move |_| {
                let pair = syscalls::pipe().unwrap();
                let data = payload.clone();
                let w = pair.write;
                let writer = syscalls::create_thread(
                    move |_| {
                        for piece in data.chunks(chunk) {
                            assert_eq!(syscalls::write(w, piece).unwrap(), piece.len());
                        }
                        syscalls::close(w).unwrap();
                        0
                    },
                    &[],
                )
                .unwrap();

                let mut got = Vec::new();
                let mut buf = vec![0u8; 777];
                loop {
                    let n = syscalls::read(pair.read, &mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    got.extend_from_slice(&buf[..n]);
                }
                syscalls::thread_join(writer).unwrap();
                i32::from(got == payload)
            },
            &[],
        );
        prop_assert_eq!(status, 1);
    }
}
