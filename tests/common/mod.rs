use minios::syscalls;
use minios::Fid;

/// Routes kernel debug logs to the test harness when `RUST_LOG` is set.
pub fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Reads until `buf` is full, failing on a premature end of stream.
#[allow(dead_code)]
pub fn read_full(fid: Fid, buf: &mut [u8]) {
    let mut got = 0;
    while got < buf.len() {
        let n = syscalls::read(fid, &mut buf[got..]).expect("read failed");
        assert!(n > 0, "unexpected end of stream after {got} bytes");
        got += n;
    }
}
