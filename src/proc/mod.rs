//! The process table and process lifecycle: creation, waiting, exit,
//! reparenting and zombie reaping.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::fs::fcb::{self, FcbId, MAX_FILEID};
use crate::kernel::{Kernel, KernelGuard, KernelState};
use crate::sched;
use crate::sync::Condvar;

use self::thread::{Ptcb, Tid};

pub mod info;
pub mod thread;

/// Size of the process table; also the number of distinct pids.
pub const MAX_PROC: usize = 512;

/// Unique process identifier (a stable index into the process table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

impl Pid {
    /// The boot idle process.
    pub const IDLE: Pid = Pid(0);
    /// The init process; orphans are reparented to it.
    pub const INIT: Pid = Pid(1);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Free,
    Alive,
    Zombie,
}

/// The body of a process or thread: an entry point over an argument buffer,
/// returning an exit code.
pub type Task = Arc<dyn Fn(&[u8]) -> i32 + Send + Sync>;

/// A process control block.
pub(crate) struct Pcb {
    pub state: ProcState,
    /// Weak back-reference; `None` for the idle and init processes.
    pub parent: Option<Pid>,
    pub children: Vec<Pid>,
    /// Children that reached `Zombie` and have not been reaped yet.
    pub exited: VecDeque<Pid>,
    /// Broadcast whenever a child of this process exits.
    pub child_exit: Condvar,
    /// Descriptor table: fid -> FCB.
    pub fidt: Vec<Option<FcbId>>,
    pub main_task: Option<Task>,
    /// Argument buffer, copied into process-owned storage at creation.
    pub args: Vec<u8>,
    pub exit_val: i32,
    pub active_threads: usize,
    pub threads: Vec<Ptcb>,
    pub main_thread: Option<Tid>,
}

impl Pcb {
    fn new() -> Pcb {
        Pcb {
            state: ProcState::Free,
            parent: None,
            children: Vec::new(),
            exited: VecDeque::new(),
            child_exit: Condvar::new(),
            fidt: vec![None; MAX_FILEID],
            main_task: None,
            args: Vec::new(),
            exit_val: 0,
            active_threads: 0,
            threads: Vec::new(),
            main_thread: None,
        }
    }

    pub fn thread(&self, tid: Tid) -> Option<&Ptcb> {
        self.threads.iter().find(|t| t.tid == tid)
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Ptcb> {
        self.threads.iter_mut().find(|t| t.tid == tid)
    }
}

/// Fixed-size table of PCBs with an intrinsic free list.
pub(crate) struct ProcTable {
    table: Vec<Pcb>,
    /// Free pids, popped from the back; freed slots are reused LIFO.
    free: Vec<Pid>,
    /// Number of non-free slots.
    pub alive: usize,
    next_tid: usize,
}

impl ProcTable {
    pub fn new() -> ProcTable {
        let table = (0..MAX_PROC).map(|_| Pcb::new()).collect();
        // Reversed so that pid 0 comes out first, then 1, 2, ...
        let free = (0..MAX_PROC).rev().map(Pid).collect();
        ProcTable {
            table,
            free,
            alive: 0,
            next_tid: 2,
        }
    }

    pub fn acquire(&mut self) -> Option<Pid> {
        let pid = self.free.pop()?;
        self.table[pid.0].state = ProcState::Alive;
        self.alive += 1;
        Some(pid)
    }

    pub fn release(&mut self, pid: Pid) {
        self.table[pid.0] = Pcb::new();
        self.free.push(pid);
        self.alive -= 1;
    }

    pub fn pcb(&self, pid: Pid) -> &Pcb {
        &self.table[pid.0]
    }

    pub fn pcb_mut(&mut self, pid: Pid) -> &mut Pcb {
        &mut self.table[pid.0]
    }

    /// Live view of a slot: `None` when free or out of range.
    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.table.get(pid.0).filter(|p| p.state != ProcState::Free)
    }

    /// Thread ids come from one monotonic counter shared by every process
    /// of the kernel; tid 1 is reserved for each process's main thread.
    pub fn alloc_tid(&mut self) -> Tid {
        let tid = Tid(self.next_tid);
        self.next_tid += 1;
        tid
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (Pid, &Pcb)> {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, p)| p.state != ProcState::Free)
            .map(|(i, p)| (Pid(i), p))
    }
}

/// Creates a new process, optionally with a running main thread.
///
/// Pids 0 and 1 (idle and init) are parentless; every other process
/// inherits the caller as parent along with the caller's open descriptors.
/// The argument buffer is copied into storage owned by the new process.
pub(crate) fn exec(
    kernel: &Arc<Kernel>,
    k: &mut KernelState,
    cur: Option<Pid>,
    task: Option<Task>,
    args: &[u8],
) -> Result<Pid> {
    let pid = k.procs.acquire().ok_or(Error::NoProcess)?;

    if pid.0 > 1 {
        let parent = cur.expect("exec of a user process without a current process");
        k.procs.pcb_mut(pid).parent = Some(parent);
        k.procs.pcb_mut(parent).children.push(pid);

        // Inherit the parent's open file streams.
        let fidt = k.procs.pcb(parent).fidt.clone();
        for id in fidt.iter().flatten() {
            fcb::fcb_incref(k, *id);
        }
        k.procs.pcb_mut(pid).fidt = fidt;
    }

    let pcb = k.procs.pcb_mut(pid);
    pcb.main_task = task.clone();
    pcb.args = args.to_vec();

    // Spawn and wake the main thread last, once the PCB is complete.
    if let Some(task) = task {
        let tid = Tid::MAIN;
        pcb.threads.push(Ptcb::new(tid, task, args.to_vec()));
        pcb.main_thread = Some(tid);
        pcb.active_threads = 1;
        let tcb = sched::spawn_thread(pid, tid, true);
        sched::wakeup(kernel, k, tcb);
    }

    debug!("exec: pid {} (parent {:?})", pid, k.procs.pcb(pid).parent);
    Ok(pid)
}

pub(crate) fn get_ppid(k: &KernelState, cur: Pid) -> Option<Pid> {
    k.procs.pcb(cur).parent
}

/// Waits for a child to exit and reaps it, returning its pid and status.
pub(crate) fn wait_child(k: &mut KernelGuard, cur: Pid, cpid: Option<Pid>) -> Result<(Pid, i32)> {
    match cpid {
        Some(child) => wait_for_specific_child(k, cur, child),
        None => wait_for_any_child(k, cur),
    }
}

fn wait_for_specific_child(k: &mut KernelGuard, cur: Pid, child: Pid) -> Result<(Pid, i32)> {
    if child.0 >= MAX_PROC {
        return Err(Error::NoChild);
    }
    match k.procs.get(child) {
        Some(c) if c.parent == Some(cur) => {}
        _ => return Err(Error::NoChild),
    }

    let cv = k.procs.pcb(cur).child_exit.clone();
    loop {
        // Revalidate each pass: another thread of this process may have
        // reaped the child and the slot may even hold a new process.
        let c = match k.procs.get(child) {
            Some(c) => c,
            None => return Err(Error::NoChild),
        };
        if c.parent != Some(cur) {
            return Err(Error::NoChild);
        }
        if c.state == ProcState::Zombie {
            break;
        }
        cv.wait(k);
    }
    Ok(reap_zombie(k, cur, child))
}

fn wait_for_any_child(k: &mut KernelGuard, cur: Pid) -> Result<(Pid, i32)> {
    if k.procs.pcb(cur).children.is_empty() {
        return Err(Error::NoChild);
    }
    let cv = k.procs.pcb(cur).child_exit.clone();
    loop {
        if let Some(&child) = k.procs.pcb(cur).exited.front() {
            return Ok(reap_zombie(k, cur, child));
        }
        cv.wait(k);
    }
}

/// Removes a zombie child from both parent lists and releases its slot.
fn reap_zombie(k: &mut KernelState, parent: Pid, child: Pid) -> (Pid, i32) {
    debug_assert_eq!(k.procs.pcb(child).state, ProcState::Zombie);
    let status = k.procs.pcb(child).exit_val;

    let pcb = k.procs.pcb_mut(parent);
    pcb.children.retain(|&c| c != child);
    pcb.exited.retain(|&c| c != child);

    k.procs.release(child);
    debug!("reap: pid {} by {} (status {})", child, parent, status);
    (child, status)
}

/// The process-exit cascade. Closes descriptors, hands children to init,
/// notifies the parent and leaves the PCB as a zombie. The calling thread's
/// own bookkeeping (`thread::retire_thread`) must already have happened.
pub(crate) fn exit_process(k: &mut KernelGuard, cur: Pid, code: i32) {
    // Exit may race with the last thread of an already-exited process;
    // the cascade must run exactly once.
    if k.procs.pcb(cur).state == ProcState::Zombie {
        return;
    }

    // Init must outlive every other process: reap until none are left.
    if cur == Pid::INIT {
        while wait_child(k, cur, None).is_ok() {}
    }

    let state = &mut **k;

    // Release process-owned argument storage and close every descriptor.
    state.procs.pcb_mut(cur).args = Vec::new();
    let open: Vec<FcbId> = state
        .procs
        .pcb_mut(cur)
        .fidt
        .iter_mut()
        .filter_map(|slot| slot.take())
        .collect();
    for id in open {
        fcb::fcb_decref(state, id);
    }

    // Reparent live children to init.
    let children = mem::take(&mut state.procs.pcb_mut(cur).children);
    if !children.is_empty() {
        debug!("reparent: {} children of pid {} to init", children.len(), cur);
        for child in children {
            state.procs.pcb_mut(child).parent = Some(Pid::INIT);
            state.procs.pcb_mut(Pid::INIT).children.push(child);
        }
    }

    // Exited-but-unreaped children are handed over as well.
    let exited = mem::take(&mut state.procs.pcb_mut(cur).exited);
    if !exited.is_empty() {
        let init = state.procs.pcb_mut(Pid::INIT);
        init.exited.extend(exited);
        init.child_exit.broadcast();
    }

    // Land on the parent's exited list and wake its WaitChild.
    if let Some(parent) = state.procs.pcb(cur).parent {
        let ppcb = state.procs.pcb_mut(parent);
        ppcb.exited.push_back(cur);
        ppcb.child_exit.broadcast();
    }

    let pcb = state.procs.pcb_mut(cur);
    pcb.main_thread = None;
    pcb.state = ProcState::Zombie;
    pcb.exit_val = code;
    debug!("exit: pid {} -> zombie (code {})", cur, code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_are_allocated_in_order() {
        let mut pt = ProcTable::new();
        assert_eq!(pt.acquire(), Some(Pid(0)));
        assert_eq!(pt.acquire(), Some(Pid(1)));
        assert_eq!(pt.acquire(), Some(Pid(2)));
        assert_eq!(pt.alive, 3);
    }

    #[test]
    fn released_slots_are_reused_lifo() {
        let mut pt = ProcTable::new();
        for _ in 0..4 {
            pt.acquire();
        }
        pt.release(Pid(1));
        pt.release(Pid(3));
        assert_eq!(pt.acquire(), Some(Pid(3)));
        assert_eq!(pt.acquire(), Some(Pid(1)));
        assert_eq!(pt.acquire(), Some(Pid(4)));
    }

    #[test]
    fn released_slot_is_clean() {
        let mut pt = ProcTable::new();
        let pid = pt.acquire().unwrap();
        pt.pcb_mut(pid).children.push(Pid(7));
        pt.pcb_mut(pid).exited.push_back(Pid(7));
        pt.release(pid);
        assert!(pt.pcb(pid).children.is_empty());
        assert!(pt.pcb(pid).exited.is_empty());
        assert_eq!(pt.pcb(pid).state, ProcState::Free);
        assert!(pt.get(pid).is_none());
    }

    #[test]
    fn tids_are_monotonic_across_processes() {
        let mut pt = ProcTable::new();
        assert_eq!(pt.alloc_tid(), Tid(2));
        assert_eq!(pt.alloc_tid(), Tid(3));
        assert_eq!(pt.alloc_tid(), Tid(4));
    }
}
