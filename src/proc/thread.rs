//! Per-process user threads: creation, join, detach and exit.

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use log::debug;

use crate::error::{Error, Result};
use crate::kernel::{Kernel, KernelGuard, KernelState};
use crate::sched;
use crate::sync::Condvar;

use super::{Pid, Task};

/// Unique thread identifier. Tid 1 is the main thread of every process;
/// all other tids come from a single monotonic counter, so they are not
/// dense within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tid(pub usize);

impl Tid {
    pub const MAIN: Tid = Tid(1);
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-thread control block.
pub(crate) struct Ptcb {
    pub tid: Tid,
    pub task: Task,
    pub args: Vec<u8>,
    pub joinable: bool,
    pub exited: bool,
    pub exit_val: i32,
    /// Broadcast when the thread exits; joiners sleep here.
    pub cv: Condvar,
    /// Number of joiners currently waiting on this thread. The block is
    /// freed only once the thread has exited and this reaches zero.
    pub refs: usize,
    /// Host thread backing this block; cleared once the thread has exited.
    pub tcb: Option<ThreadId>,
}

impl Ptcb {
    pub fn new(tid: Tid, task: Task, args: Vec<u8>) -> Ptcb {
        Ptcb {
            tid,
            task,
            args,
            joinable: true,
            exited: false,
            exit_val: 0,
            cv: Condvar::new(),
            refs: 0,
            tcb: None,
        }
    }
}

/// Creates a new thread in the current process and wakes it.
pub(crate) fn create_thread(
    kernel: &Arc<Kernel>,
    k: &mut KernelState,
    cur: Pid,
    task: Task,
    args: &[u8],
) -> Result<Tid> {
    let tid = k.procs.alloc_tid();
    let pcb = k.procs.pcb_mut(cur);
    pcb.threads.push(Ptcb::new(tid, task, args.to_vec()));
    pcb.active_threads += 1;

    let tcb = sched::spawn_thread(cur, tid, false);
    sched::wakeup(kernel, k, tcb);
    debug!("thread: pid {} spawned tid {}", cur, tid);
    Ok(tid)
}

/// Waits for a thread of the current process to exit and returns its exit
/// value. Every concurrent joiner observes the same value; the last one out
/// frees the control block.
pub(crate) fn thread_join(k: &mut KernelGuard, cur: Pid, caller: Tid, tid: Tid) -> Result<i32> {
    if tid == caller {
        return Err(Error::NoThread);
    }
    let cv = {
        let pcb = k.procs.pcb_mut(cur);
        let ptcb = pcb.thread_mut(tid).ok_or(Error::NoThread)?;
        if !ptcb.joinable {
            return Err(Error::NoThread);
        }
        ptcb.refs += 1;
        ptcb.cv.clone()
    };

    loop {
        // The block cannot be freed while we hold a reference, but the
        // thread list may shift; look the tid up again every pass.
        let ptcb = k
            .procs
            .pcb(cur)
            .thread(tid)
            .expect("joined thread disappeared while referenced");
        if ptcb.exited {
            break;
        }
        cv.wait(k);
    }

    let pcb = k.procs.pcb_mut(cur);
    let at = pcb
        .threads
        .iter()
        .position(|t| t.tid == tid)
        .expect("joined thread disappeared while referenced");
    let code = pcb.threads[at].exit_val;
    pcb.threads[at].refs -= 1;
    if pcb.threads[at].refs == 0 {
        pcb.threads.remove(at);
    }
    Ok(code)
}

/// Makes a thread unjoinable. Fails on a thread that already exited; in
/// that case no joiner can ever arrive, so an unreferenced block is freed
/// on the spot.
pub(crate) fn thread_detach(k: &mut KernelState, cur: Pid, tid: Tid) -> Result<()> {
    let pcb = k.procs.pcb_mut(cur);
    let at = pcb
        .threads
        .iter()
        .position(|t| t.tid == tid)
        .ok_or(Error::NoThread)?;
    if !pcb.threads[at].exited {
        pcb.threads[at].joinable = false;
        return Ok(());
    }
    if pcb.threads[at].refs == 0 {
        pcb.threads.remove(at);
    }
    Err(Error::NoThread)
}

/// Thread-exit bookkeeping: records the exit value, wakes joiners and drops
/// the kernel-thread link. Returns the number of threads still active; the
/// caller triggers the process exit when it reaches zero.
pub(crate) fn retire_thread(k: &mut KernelState, cur: Pid, tid: Tid, code: i32) -> usize {
    let pcb = k.procs.pcb_mut(cur);
    let at = pcb
        .threads
        .iter()
        .position(|t| t.tid == tid)
        .expect("exiting thread has no control block");
    {
        let ptcb = &mut pcb.threads[at];
        // Only the host thread backing this block may retire it.
        debug_assert_eq!(ptcb.tcb, Some(std::thread::current().id()));
        ptcb.exit_val = code;
        ptcb.tcb = None;
        ptcb.exited = true;
        ptcb.cv.broadcast();
    }
    // A detached, unreferenced block has no one left to free it but us.
    if !pcb.threads[at].joinable && pcb.threads[at].refs == 0 {
        pcb.threads.remove(at);
    }
    pcb.active_threads -= 1;
    debug!(
        "thread: pid {} tid {} exited (code {}), {} active",
        cur, tid, code, pcb.active_threads
    );
    pcb.active_threads
}
