//! The system-call surface.
//!
//! Every function here runs on behalf of the calling kernel thread: it
//! looks up the thread's identity, takes the kernel lock and delegates to
//! the owning subsystem. Calls that may block (pipe transfers, `wait_child`,
//! `thread_join`, `accept`, `connect`) suspend on condition variables with
//! the lock released.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::fs::fcb::{self, Fid};
use crate::fs::pipe::{self, PipePair};
use crate::fs::socket::{self, Port, ShutdownMode};
use crate::proc::info;
use crate::proc::thread::{self, Tid};
use crate::proc::{self, Pid, Task};
use crate::sched;

/// Creates a new process running `task` over a copy of `args`.
pub fn exec<F>(task: F, args: &[u8]) -> Result<Pid>
where
    F: Fn(&[u8]) -> i32 + Send + Sync + 'static,
{
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    proc::exec(
        &cur.kernel,
        &mut k,
        Some(cur.pid),
        Some(Arc::new(task) as Task),
        args,
    )
}

/// Waits for the given child (or any child, with `None`) to exit; returns
/// the reaped pid and its exit status.
pub fn wait_child(cpid: Option<Pid>) -> Result<(Pid, i32)> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    proc::wait_child(&mut k, cur.pid, cpid)
}

/// Terminates the current process with `code`. Never returns.
pub fn exit(code: i32) -> ! {
    let cur = sched::current();
    {
        let mut k = cur.kernel.lock();
        thread::retire_thread(&mut k, cur.pid, cur.tid, code);
        proc::exit_process(&mut k, cur.pid, code);
    }
    sched::shutdown_thread()
}

pub fn get_pid() -> Pid {
    sched::current().pid
}

/// Parent pid; `None` for the idle and init processes.
pub fn get_ppid() -> Option<Pid> {
    let cur = sched::current();
    let k = cur.kernel.lock();
    proc::get_ppid(&k, cur.pid)
}

/// Creates a new thread of the current process running `task`.
pub fn create_thread<F>(task: F, args: &[u8]) -> Result<Tid>
where
    F: Fn(&[u8]) -> i32 + Send + Sync + 'static,
{
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    thread::create_thread(&cur.kernel, &mut k, cur.pid, Arc::new(task) as Task, args)
}

pub fn thread_self() -> Tid {
    sched::current().tid
}

/// Waits for a thread of the current process to exit; returns its exit
/// value.
pub fn thread_join(tid: Tid) -> Result<i32> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    thread::thread_join(&mut k, cur.pid, cur.tid, tid)
}

/// Makes a thread of the current process unjoinable.
pub fn thread_detach(tid: Tid) -> Result<()> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    thread::thread_detach(&mut k, cur.pid, tid)
}

/// Terminates the current thread with `code`; the last thread out takes
/// the whole process with it. Never returns.
pub fn thread_exit(code: i32) -> ! {
    let cur = sched::current();
    {
        let mut k = cur.kernel.lock();
        let remaining = thread::retire_thread(&mut k, cur.pid, cur.tid, code);
        if remaining == 0 {
            proc::exit_process(&mut k, cur.pid, code);
        }
    }
    sched::shutdown_thread()
}

/// Allocates a pipe; returns its read and write descriptors.
pub fn pipe() -> Result<PipePair> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    pipe::pipe(&mut k, cur.pid)
}

/// Allocates an unbound socket on `port`.
pub fn socket(port: Port) -> Result<Fid> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    socket::socket(&mut k, cur.pid, port)
}

/// Promotes an unbound socket to the listener for its port.
pub fn listen(fid: Fid) -> Result<()> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    socket::listen(&mut k, cur.pid, fid)
}

/// Accepts one connection on a listening socket; returns the server-side
/// peer descriptor.
pub fn accept(fid: Fid) -> Result<Fid> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    socket::accept(&mut k, cur.pid, fid)
}

/// Connects an unbound socket to the listener on `port`, waiting at most
/// `timeout` when one is given.
pub fn connect(fid: Fid, port: Port, timeout: Option<Duration>) -> Result<()> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    socket::connect(&mut k, cur.pid, fid, port, timeout)
}

/// Shuts down one or both directions of a connected socket.
pub fn shutdown(fid: Fid, how: ShutdownMode) -> Result<()> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    socket::shutdown(&mut k, cur.pid, fid, how)
}

/// Opens a read-only snapshot of the process table.
pub fn open_info() -> Result<Fid> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    info::open_info(&mut k, cur.pid)
}

/// Reads from a descriptor; blocks according to the underlying stream.
pub fn read(fid: Fid, buf: &mut [u8]) -> Result<usize> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    fcb::stream_read(&mut k, cur.pid, fid, buf)
}

/// Writes to a descriptor; blocks according to the underlying stream.
pub fn write(fid: Fid, buf: &[u8]) -> Result<usize> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    fcb::stream_write(&mut k, cur.pid, fid, buf)
}

/// Releases a descriptor.
pub fn close(fid: Fid) -> Result<()> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    fcb::close(&mut k, cur.pid, fid)
}

/// Makes `new` refer to the same open stream as `old`.
pub fn dup2(old: Fid, new: Fid) -> Result<()> {
    let cur = sched::current();
    let mut k = cur.kernel.lock();
    fcb::dup2(&mut k, cur.pid, old, new)
}
