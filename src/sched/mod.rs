//! Kernel threads on top of host threads.
//!
//! Thread creation is two-phase: [`spawn_thread`] records what the thread
//! will run, and [`wakeup`] releases it to the host scheduler. Control
//! blocks are therefore fully initialized before the thread can enter the
//! kernel. Each kernel thread carries its identity (kernel handle, pid,
//! tid) in a thread-local that the system-call surface reads.
//!
//! A kernel thread dies by a controlled unwind out of its trampoline
//! ([`shutdown_thread`]); the kernel lock is never held across the unwind.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Once};
use std::thread;

use crate::kernel::{Kernel, KernelState};
use crate::proc::thread::Tid;
use crate::proc::Pid;

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

/// Identity of the kernel thread the calling host thread is running.
#[derive(Clone)]
pub(crate) struct Current {
    pub kernel: Arc<Kernel>,
    pub pid: Pid,
    pub tid: Tid,
}

/// The current kernel thread. Fatal when called from a host thread that is
/// not running a task, e.g. from outside [`crate::boot`].
pub(crate) fn current() -> Current {
    CURRENT
        .with(|c| c.borrow().clone())
        .expect("system call issued from outside a kernel thread")
}

/// Payload of the unwind that tears a kernel thread down.
struct ThreadShutdown;

/// Ends the calling kernel thread. The kernel lock must not be held.
pub(crate) fn shutdown_thread() -> ! {
    panic::panic_any(ThreadShutdown)
}

static SHUTDOWN_HOOK: Once = Once::new();

/// The shutdown unwind must not be reported as a panic.
pub(crate) fn install_shutdown_hook() {
    SHUTDOWN_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ThreadShutdown>().is_none() {
                previous(info);
            }
        }));
    });
}

/// A kernel thread that exists but has not been released to run yet.
pub(crate) struct Tcb {
    pid: Pid,
    tid: Tid,
    main: bool,
}

/// First phase of thread creation.
pub(crate) fn spawn_thread(pid: Pid, tid: Tid, main: bool) -> Tcb {
    Tcb { pid, tid, main }
}

/// Second phase: hand the thread to the host scheduler. Called with the
/// kernel lock held, so the new thread blocks on its first kernel entry
/// until the creator is done.
pub(crate) fn wakeup(kernel: &Arc<Kernel>, k: &mut KernelState, tcb: Tcb) {
    let Tcb { pid, tid, main } = tcb;
    let handle = {
        let kernel = Arc::clone(kernel);
        thread::spawn(move || run_kernel_thread(kernel, pid, tid, main))
    };
    if let Some(ptcb) = k.procs.pcb_mut(pid).thread_mut(tid) {
        ptcb.tcb = Some(handle.thread().id());
    }
    kernel.threads.lock().push(handle);
}

/// Trampoline for every kernel thread. The main thread of a process reads
/// its task from the PCB, any other thread from its PTCB; either way the
/// task's return value becomes a thread exit.
fn run_kernel_thread(kernel: Arc<Kernel>, pid: Pid, tid: Tid, main: bool) {
    CURRENT.with(|c| {
        *c.borrow_mut() = Some(Current {
            kernel: Arc::clone(&kernel),
            pid,
            tid,
        });
    });

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let (task, args) = {
            let k = kernel.lock();
            let pcb = k.procs.pcb(pid);
            if main {
                let task = pcb.main_task.clone().expect("main thread without a task");
                (task, pcb.args.clone())
            } else {
                let ptcb = pcb.thread(tid).expect("thread without a control block");
                (ptcb.task.clone(), ptcb.args.clone())
            }
        };
        let code = task(&args);
        crate::syscalls::thread_exit(code);
    }));

    if let Err(payload) = outcome {
        if !payload.is::<ThreadShutdown>() {
            // A task panicked; surface it to whoever joins us.
            panic::resume_unwind(payload);
        }
    }
}
