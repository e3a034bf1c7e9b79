//! File control blocks and the per-process descriptor table.
//!
//! An FCB is a reference-counted handle on a stream object; descriptors of
//! one or more processes share it. The stream behind an FCB is dispatched
//! through [`StreamObj`], and closing the last descriptor runs the stream's
//! teardown.

use std::fmt;

use crate::error::{Error, Result};
use crate::fs::pipe::{self, PipeId};
use crate::fs::socket::{self, SocketId};
use crate::kernel::{KernelGuard, KernelState};
use crate::proc::info::{self, InfoId};
use crate::proc::Pid;

/// Number of descriptor slots per process.
pub const MAX_FILEID: usize = 16;

/// Number of FCBs in the system-wide table.
pub const MAX_FILES: usize = 1024;

/// File descriptor: a small process-local index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fid(pub usize);

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type FcbId = usize;

/// The stream object an FCB points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamObj {
    /// Reserved but not wired to a stream yet.
    Null,
    PipeRead(PipeId),
    PipeWrite(PipeId),
    Socket(SocketId),
    ProcInfo(InfoId),
}

/// File control block.
pub(crate) struct Fcb {
    /// Number of descriptor-table entries referring to this block.
    pub refs: usize,
    pub stream: StreamObj,
}

/// Reserves `n` descriptors and FCBs for the current process, lowest fids
/// first — all of them or none.
pub(crate) fn fcb_reserve(k: &mut KernelState, cur: Pid, n: usize) -> Result<Vec<(Fid, FcbId)>> {
    let free: Vec<usize> = k
        .procs
        .pcb(cur)
        .fidt
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(fid, _)| fid)
        .take(n)
        .collect();
    if free.len() < n || k.fcbs.len() + n > MAX_FILES {
        return Err(Error::NoFile);
    }

    let mut reserved = Vec::with_capacity(n);
    for fid in free {
        let id = k.fcbs.insert(Fcb {
            refs: 1,
            stream: StreamObj::Null,
        });
        k.procs.pcb_mut(cur).fidt[fid] = Some(id);
        reserved.push((Fid(fid), id));
    }
    Ok(reserved)
}

pub(crate) fn fcb_incref(k: &mut KernelState, id: FcbId) {
    k.fcbs[id].refs += 1;
}

/// Drops one reference; the last one closes the underlying stream.
pub(crate) fn fcb_decref(k: &mut KernelState, id: FcbId) {
    let fcb = &mut k.fcbs[id];
    fcb.refs -= 1;
    if fcb.refs > 0 {
        return;
    }
    let fcb = k.fcbs.remove(id);
    match fcb.stream {
        StreamObj::Null => {}
        StreamObj::PipeRead(p) => pipe::close_reader(k, p),
        StreamObj::PipeWrite(p) => pipe::close_writer(k, p),
        StreamObj::Socket(s) => socket::socket_close(k, s),
        StreamObj::ProcInfo(i) => info::info_close(k, i),
    }
}

/// Maps a descriptor of the current process to its FCB.
pub(crate) fn resolve(k: &KernelState, cur: Pid, fid: Fid) -> Result<FcbId> {
    k.procs
        .pcb(cur)
        .fidt
        .get(fid.0)
        .copied()
        .flatten()
        .ok_or(Error::BadFid)
}

/// Read through a descriptor; may suspend on the underlying stream.
pub(crate) fn stream_read(
    k: &mut KernelGuard,
    cur: Pid,
    fid: Fid,
    buf: &mut [u8],
) -> Result<usize> {
    let id = resolve(k, cur, fid)?;
    match k.fcbs[id].stream {
        StreamObj::PipeRead(p) => pipe::pipe_read(k, p, buf),
        StreamObj::Socket(s) => socket::socket_read(k, s, buf),
        StreamObj::ProcInfo(i) => info::info_read(k, i, buf),
        StreamObj::PipeWrite(_) => Err(Error::NotSupported),
        StreamObj::Null => Err(Error::BadFid),
    }
}

/// Write through a descriptor; may suspend on the underlying stream.
pub(crate) fn stream_write(k: &mut KernelGuard, cur: Pid, fid: Fid, buf: &[u8]) -> Result<usize> {
    let id = resolve(k, cur, fid)?;
    match k.fcbs[id].stream {
        StreamObj::PipeWrite(p) => pipe::pipe_write(k, p, buf),
        StreamObj::Socket(s) => socket::socket_write(k, s, buf),
        StreamObj::PipeRead(_) | StreamObj::ProcInfo(_) => Err(Error::NotSupported),
        StreamObj::Null => Err(Error::BadFid),
    }
}

/// Releases a descriptor slot; closes the stream if it was the last one.
pub(crate) fn close(k: &mut KernelState, cur: Pid, fid: Fid) -> Result<()> {
    let slot = k
        .procs
        .pcb_mut(cur)
        .fidt
        .get_mut(fid.0)
        .ok_or(Error::BadFid)?;
    let id = slot.take().ok_or(Error::BadFid)?;
    fcb_decref(k, id);
    Ok(())
}

/// Makes `new` refer to the same FCB as `old`, closing whatever `new` held.
pub(crate) fn dup2(k: &mut KernelState, cur: Pid, old: Fid, new: Fid) -> Result<()> {
    let id = resolve(k, cur, old)?;
    if new.0 >= MAX_FILEID {
        return Err(Error::BadFid);
    }
    if old == new {
        return Ok(());
    }
    if let Some(previous) = k.procs.pcb_mut(cur).fidt[new.0].take() {
        fcb_decref(k, previous);
    }
    fcb_incref(k, id);
    k.procs.pcb_mut(cur).fidt[new.0] = Some(id);
    Ok(())
}
