//! A cooperative teaching-kernel substrate, hosted on ordinary threads.
//!
//! The crate implements the concurrency core of a small operating system:
//! processes with a reparenting process tree, per-process user threads with
//! join/detach, anonymous byte pipes with blocking flow control, and
//! connection-oriented local sockets layered on pipes. All shared state
//! sits behind a single kernel mutex; blocking is expressed with condition
//! variables over that one lock.
//!
//! [`boot`] brings a kernel instance up with an init task and runs it to
//! completion:
//!
//! ```
//! use minios::{boot, syscalls};
//!
//! let status = boot(
//!     |_| {
//!         let pair = syscalls::pipe().unwrap();
//!         syscalls::write(pair.write, b"ping").unwrap();
//!         let mut buf = [0u8; 4];
//!         syscalls::read(pair.read, &mut buf).unwrap();
//!         i32::from(&buf == b"ping")
//!     },
//!     &[],
//! );
//! assert_eq!(status, 1);
//! ```

pub mod error;
pub mod fs;
pub mod proc;
pub mod syscalls;

mod kernel;
mod sched;
mod sync;

use std::sync::Arc;

pub use error::{Error, Result};
pub use fs::fcb::{Fid, MAX_FILEID, MAX_FILES};
pub use fs::pipe::{PipePair, PIPE_BUFFER_SIZE};
pub use fs::socket::{Port, ShutdownMode, MAX_PORT, NOPORT};
pub use proc::info::{ProcInfo, PROCINFO_MAX_ARGS_SIZE};
pub use proc::thread::Tid;
pub use proc::{Pid, Task, MAX_PROC};

use kernel::Kernel;
use proc::ProcState;

/// Boots a fresh kernel: installs the idle process as pid 0, runs `init` as
/// pid 1, and returns init's exit status once every kernel thread is done.
///
/// Any number of kernels may be booted concurrently (or sequentially) within
/// one host process; each is fully isolated.
pub fn boot<F>(init: F, args: &[u8]) -> i32
where
    F: Fn(&[u8]) -> i32 + Send + Sync + 'static,
{
    let kernel = Kernel::new();
    {
        let mut k = kernel.lock();
        let idle = proc::exec(&kernel, &mut k, None, None, &[])
            .expect("process table empty at boot");
        assert_eq!(idle, Pid::IDLE, "the idle process must be allocated pid 0");
        let pid = proc::exec(&kernel, &mut k, None, Some(Arc::new(init) as Task), args)
            .expect("process table has no room for init");
        assert_eq!(pid, Pid::INIT, "the init process must be allocated pid 1");
    }

    // Run until the system drains. Threads spawn more threads, so keep
    // taking handles until none are left.
    loop {
        let handle = kernel.threads.lock().pop();
        match handle {
            Some(h) => h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)),
            None => break,
        }
    }

    let k = kernel.lock();
    let init_pcb = k.procs.pcb(Pid::INIT);
    debug_assert_eq!(init_pcb.state, ProcState::Zombie);
    debug_assert_eq!(init_pcb.active_threads, 0);
    debug_assert!(init_pcb.main_thread.is_none());
    init_pcb.exit_val
}
