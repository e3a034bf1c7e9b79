//! A two-process pipeline: a producer process feeds lines through a pipe to
//! a consumer process that upcases them.

use minios::{boot, syscalls};

fn main() {
    let status = boot(
        |_| {
            let pair = syscalls::pipe().unwrap();

            let (r, w) = (pair.read, pair.write);
            let producer = syscalls::exec(
                move |_| {
                    // Drop the inherited read end; only the consumer reads.
                    syscalls::close(r).unwrap();
                    for line in ["one\n", "two\n", "three\n"] {
                        syscalls::write(w, line.as_bytes()).unwrap();
                    }
                    syscalls::close(w).unwrap();
                    0
                },
                &[],
            )
            .unwrap();

            let consumer = syscalls::exec(
                move |_| {
                    // Drop the inherited write end, or end of data never comes.
                    syscalls::close(w).unwrap();
                    let mut buf = [0u8; 64];
                    loop {
                        let n = syscalls::read(r, &mut buf).unwrap();
                        if n == 0 {
                            break;
                        }
                        let text = String::from_utf8_lossy(&buf[..n]);
                        print!("{}", text.to_uppercase());
                    }
                    0
                },
                &[],
            )
            .unwrap();

            // The parent's own ends would keep the pipe open forever.
            syscalls::close(pair.write).unwrap();
            syscalls::close(pair.read).unwrap();

            syscalls::wait_child(Some(producer)).unwrap();
            syscalls::wait_child(Some(consumer)).unwrap();
            0
        },
        &[],
    );
    println!("pipeline finished with status {status}");
}
