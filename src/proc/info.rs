//! Read-only snapshots of the process table, exposed as a stream.
//!
//! `open_info` captures every non-free PCB under the kernel lock; the
//! snapshot is not live-updated. Each read yields exactly one encoded
//! record and advances a cursor.

use crate::error::{Error, Result};
use crate::fs::fcb::{self, Fid, StreamObj};
use crate::kernel::KernelState;

use super::{Pid, ProcState};

/// Upper bound on the argument bytes carried per record; longer argument
/// buffers are truncated (the full length is still reported).
pub const PROCINFO_MAX_ARGS_SIZE: usize = 128;

pub(crate) type InfoId = usize;

/// One record of the process-table snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub alive: bool,
    pub has_main_task: bool,
    pub thread_count: usize,
    /// Full length of the process's argument buffer.
    pub argl: usize,
    /// Argument bytes, truncated to [`PROCINFO_MAX_ARGS_SIZE`].
    pub args: Vec<u8>,
}

impl ProcInfo {
    /// Size of one encoded record.
    pub const ENCODED_SIZE: usize = 4 + 4 + 1 + 1 + 4 + 4 + PROCINFO_MAX_ARGS_SIZE;

    fn capture(pid: Pid, pcb: &super::Pcb) -> ProcInfo {
        let keep = pcb.args.len().min(PROCINFO_MAX_ARGS_SIZE);
        ProcInfo {
            pid,
            ppid: pcb.parent,
            alive: pcb.state == ProcState::Alive,
            has_main_task: pcb.main_task.is_some(),
            thread_count: pcb.active_threads,
            argl: pcb.args.len(),
            args: pcb.args[..keep].to_vec(),
        }
    }

    /// Encodes the record into `buf` (little endian, fixed layout).
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(Error::BufferTooSmall);
        }
        let ppid = self.ppid.map_or(-1i32, |p| p.0 as i32);
        buf[0..4].copy_from_slice(&(self.pid.0 as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&ppid.to_le_bytes());
        buf[8] = self.alive as u8;
        buf[9] = self.has_main_task as u8;
        buf[10..14].copy_from_slice(&(self.thread_count as u32).to_le_bytes());
        buf[14..18].copy_from_slice(&(self.argl as u32).to_le_bytes());
        let args = &mut buf[18..18 + PROCINFO_MAX_ARGS_SIZE];
        args.fill(0);
        args[..self.args.len()].copy_from_slice(&self.args);
        Ok(Self::ENCODED_SIZE)
    }

    /// Decodes a record produced by [`ProcInfo::encode_into`].
    pub fn decode(buf: &[u8]) -> Result<ProcInfo> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(Error::BufferTooSmall);
        }
        let word = |at: usize| u32::from_le_bytes(buf[at..at + 4].try_into().unwrap());
        let ppid = i32::from_le_bytes(buf[4..8].try_into().unwrap());
        let argl = word(14) as usize;
        let keep = argl.min(PROCINFO_MAX_ARGS_SIZE);
        Ok(ProcInfo {
            pid: Pid(word(0) as usize),
            ppid: (ppid >= 0).then(|| Pid(ppid as usize)),
            alive: buf[8] != 0,
            has_main_task: buf[9] != 0,
            thread_count: word(10) as usize,
            argl,
            args: buf[18..18 + keep].to_vec(),
        })
    }
}

/// Snapshot control block: the captured records plus a read cursor.
pub(crate) struct InfoCb {
    records: Vec<ProcInfo>,
    cursor: usize,
}

/// Captures the process table and returns a descriptor over the snapshot.
pub(crate) fn open_info(k: &mut KernelState, cur: Pid) -> Result<Fid> {
    let ends = fcb::fcb_reserve(k, cur, 1)?;
    let records: Vec<ProcInfo> = k
        .procs
        .iter_live()
        .map(|(pid, pcb)| ProcInfo::capture(pid, pcb))
        .collect();
    let id = k.infos.insert(InfoCb { records, cursor: 0 });
    let (fid, fcb) = ends[0];
    k.fcbs[fcb].stream = StreamObj::ProcInfo(id);
    Ok(fid)
}

/// Copies the next record into `buf`; fails once the snapshot is exhausted.
pub(crate) fn info_read(k: &mut KernelState, id: InfoId, buf: &mut [u8]) -> Result<usize> {
    let info = k.infos.get_mut(id).ok_or(Error::BadFid)?;
    let record = info.records.get(info.cursor).ok_or(Error::EndOfStream)?;
    let n = record.encode_into(buf)?;
    info.cursor += 1;
    Ok(n)
}

pub(crate) fn info_close(k: &mut KernelState, id: InfoId) {
    k.infos.remove(id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcInfo {
        ProcInfo {
            pid: Pid(3),
            ppid: Some(Pid(1)),
            alive: true,
            has_main_task: true,
            thread_count: 2,
            argl: 5,
            args: b"hello".to_vec(),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut buf = [0u8; ProcInfo::ENCODED_SIZE];
        let n = record().encode_into(&mut buf).unwrap();
        assert_eq!(n, ProcInfo::ENCODED_SIZE);
        assert_eq!(ProcInfo::decode(&buf).unwrap(), record());
    }

    #[test]
    fn parentless_process_encodes_without_ppid() {
        let mut info = record();
        info.ppid = None;
        let mut buf = [0u8; ProcInfo::ENCODED_SIZE];
        info.encode_into(&mut buf).unwrap();
        assert_eq!(ProcInfo::decode(&buf).unwrap().ppid, None);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut buf = [0u8; ProcInfo::ENCODED_SIZE - 1];
        assert_eq!(
            record().encode_into(&mut buf),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn truncated_args_keep_full_length() {
        let mut info = record();
        info.argl = 500;
        info.args = vec![0xA5; PROCINFO_MAX_ARGS_SIZE];
        let mut buf = [0u8; ProcInfo::ENCODED_SIZE];
        info.encode_into(&mut buf).unwrap();
        let back = ProcInfo::decode(&buf).unwrap();
        assert_eq!(back.argl, 500);
        assert_eq!(back.args.len(), PROCINFO_MAX_ARGS_SIZE);
    }
}
