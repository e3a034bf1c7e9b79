//! The kernel instance: every piece of shared state behind one mutex.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};
use slab::Slab;

use crate::fs::fcb::Fcb;
use crate::fs::pipe::PipeCb;
use crate::fs::socket::{RequestCb, SocketCb, SocketId, MAX_PORT};
use crate::proc::info::InfoCb;
use crate::proc::ProcTable;

/// Guard over the kernel mutex. Functions that may suspend take
/// `&mut KernelGuard` so condition variables can release and reacquire it.
pub(crate) type KernelGuard<'a> = MutexGuard<'a, KernelState>;

/// One bootable kernel instance. Several instances can run side by side in
/// the same host process; kernel threads know which instance they belong to.
pub(crate) struct Kernel {
    state: Mutex<KernelState>,
    /// Host handles of every kernel thread; `boot` joins them at shutdown.
    pub(crate) threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Kernel {
    pub(crate) fn new() -> Arc<Kernel> {
        crate::sched::install_shutdown_hook();
        Arc::new(Kernel {
            state: Mutex::new(KernelState::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Takes the kernel mutex.
    pub(crate) fn lock(&self) -> KernelGuard<'_> {
        self.state.lock()
    }
}

/// Everything the kernel mutex protects.
pub(crate) struct KernelState {
    pub procs: ProcTable,
    pub fcbs: Slab<Fcb>,
    pub pipes: Slab<PipeCb>,
    pub sockets: Slab<SocketCb>,
    pub requests: Slab<RequestCb>,
    pub infos: Slab<InfoCb>,
    /// `port_map[p]` is the listener currently bound to port `p`, if any.
    pub port_map: Vec<Option<SocketId>>,
}

impl KernelState {
    fn new() -> KernelState {
        KernelState {
            procs: ProcTable::new(),
            fcbs: Slab::new(),
            pipes: Slab::new(),
            sockets: Slab::new(),
            requests: Slab::new(),
            infos: Slab::new(),
            port_map: vec![None; MAX_PORT as usize + 1],
        }
    }
}
