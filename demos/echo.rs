//! A local echo service: a server process accepts one connection on port 80
//! and echoes everything it received back to the client.
//!
//! Reads block until the buffer is full or the writer side closes, so the
//! client marks the end of its transmission with a write shutdown and the
//! server answers with the accumulated bytes.

use std::time::Duration;

use minios::{boot, syscalls, ShutdownMode, NOPORT};

const ECHO_PORT: u16 = 80;

fn main() {
    let status = boot(
        |_| {
            let server = syscalls::exec(
                |_| {
                    let listener = syscalls::socket(ECHO_PORT).unwrap();
                    syscalls::listen(listener).unwrap();
                    let peer = syscalls::accept(listener).unwrap();

                    let mut data = Vec::new();
                    let mut buf = [0u8; 64];
                    loop {
                        let n = syscalls::read(peer, &mut buf).unwrap();
                        if n == 0 {
                            break;
                        }
                        data.extend_from_slice(&buf[..n]);
                    }
                    syscalls::write(peer, &data).unwrap();
                    syscalls::close(peer).unwrap();
                    syscalls::close(listener).unwrap();
                    0
                },
                &[],
            )
            .unwrap();

            let client = syscalls::exec(
                |_| {
                    let sock = syscalls::socket(NOPORT).unwrap();
                    while syscalls::connect(sock, ECHO_PORT, Some(Duration::from_millis(100)))
                        .is_err()
                    {
                        // The server may not be listening yet.
                        std::thread::sleep(Duration::from_millis(1));
                    }

                    syscalls::write(sock, b"hello echo service").unwrap();
                    syscalls::shutdown(sock, ShutdownMode::WRITE).unwrap();

                    let mut echoed = Vec::new();
                    let mut buf = [0u8; 64];
                    loop {
                        let n = syscalls::read(sock, &mut buf).unwrap();
                        if n == 0 {
                            break;
                        }
                        echoed.extend_from_slice(&buf[..n]);
                    }
                    println!("client got back: {}", String::from_utf8_lossy(&echoed));
                    syscalls::close(sock).unwrap();
                    i32::from(echoed != b"hello echo service")
                },
                &[],
            )
            .unwrap();

            let (_, client_status) = syscalls::wait_child(Some(client)).unwrap();
            syscalls::wait_child(Some(server)).unwrap();
            client_status
        },
        &[],
    );
    println!("echo demo finished with status {status}");
}
