//! Connection-oriented local sockets, layered on pipes.
//!
//! A socket starts `Unbound`. `listen` promotes it to a listener registered
//! in the port map; `accept` and `connect` then rendezvous through the
//! listener's request queue and promote two unbound sockets to peers that
//! share a crossed pair of pipes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use log::debug;

use crate::error::{Error, Result};
use crate::fs::fcb::{self, FcbId, Fid, StreamObj};
use crate::fs::pipe::{self, PipeCb, PipeId};
use crate::kernel::{KernelGuard, KernelState};
use crate::proc::Pid;
use crate::sync::Condvar;

/// Highest usable port number.
pub const MAX_PORT: u16 = 1023;

/// "No port": sockets created on this port can never listen.
pub const NOPORT: u16 = 0;

pub type Port = u16;

pub(crate) type SocketId = usize;
pub(crate) type RequestId = usize;

bitflags! {
    /// Which direction(s) of a peer socket to shut down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShutdownMode: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const BOTH = 0b11;
    }
}

/// Socket control block.
pub(crate) struct SocketCb {
    pub state: SocketState,
    /// The FCB this socket is wired to.
    pub fcb: FcbId,
    pub fid: Fid,
    pub port: Port,
    /// Descriptor-table entries plus peer pointers holding this socket.
    pub refs: usize,
}

/// The three socket roles; listener and peer carry their own payload.
pub(crate) enum SocketState {
    Unbound,
    Listener(ListenerCb),
    Peer(PeerCb),
}

pub(crate) struct ListenerCb {
    /// Wakes a blocked `accept` when a request arrives or the listener dies.
    pub cv: Condvar,
    /// Pending connection requests, served FIFO.
    pub queue: VecDeque<RequestId>,
}

pub(crate) struct PeerCb {
    /// Pipe this side reads from; `None` after a read shutdown.
    pub pipe_read: Option<PipeId>,
    /// Pipe this side writes to; `None` after a write shutdown.
    pub pipe_write: Option<PipeId>,
    /// Weak cross-reference, cleared when this side closes.
    pub peer: Option<SocketId>,
}

/// A connection request parked in a listener's queue.
pub(crate) struct RequestCb {
    /// The connector's socket.
    pub socket: SocketId,
    /// The connector sleeps here until served, rejected or timed out.
    pub cv: Condvar,
    pub served: bool,
    pub listener_alive: bool,
}

/// Maps a descriptor of the current process to a socket.
fn socket_of(k: &KernelState, cur: Pid, fid: Fid) -> Result<SocketId> {
    let id = fcb::resolve(k, cur, fid)?;
    match k.fcbs[id].stream {
        StreamObj::Socket(sid) => Ok(sid),
        _ => Err(Error::BadFid),
    }
}

/// Allocates an unbound socket on `port` and returns its descriptor.
pub(crate) fn socket(k: &mut KernelState, cur: Pid, port: Port) -> Result<Fid> {
    socket_new(k, cur, port).map(|(fid, _)| fid)
}

fn socket_new(k: &mut KernelState, cur: Pid, port: Port) -> Result<(Fid, SocketId)> {
    if port > MAX_PORT {
        return Err(Error::BadPort);
    }
    let ends = fcb::fcb_reserve(k, cur, 1)?;
    let (fid, fcbid) = ends[0];
    let sid = k.sockets.insert(SocketCb {
        state: SocketState::Unbound,
        fcb: fcbid,
        fid,
        port,
        refs: 1,
    });
    k.fcbs[fcbid].stream = StreamObj::Socket(sid);
    Ok((fid, sid))
}

/// Turns an unbound socket into the listener for its port.
pub(crate) fn listen(k: &mut KernelState, cur: Pid, fid: Fid) -> Result<()> {
    let sid = socket_of(k, cur, fid)?;
    let port = k.sockets[sid].port;
    if port == NOPORT {
        return Err(Error::BadPort);
    }
    if k.port_map[port as usize].is_some() {
        return Err(Error::PortBusy);
    }
    if !matches!(k.sockets[sid].state, SocketState::Unbound) {
        return Err(Error::BadState);
    }

    k.sockets[sid].state = SocketState::Listener(ListenerCb {
        cv: Condvar::new(),
        queue: VecDeque::new(),
    });
    k.port_map[port as usize] = Some(sid);
    debug!(
        "listen: pid {} bound port {} (fid {})",
        cur, port, k.sockets[sid].fid
    );
    Ok(())
}

/// Posts a connection request to the listener on `port` and waits for it to
/// be served, bounded by `timeout` when one is given.
pub(crate) fn connect(
    k: &mut KernelGuard,
    cur: Pid,
    fid: Fid,
    port: Port,
    timeout: Option<Duration>,
) -> Result<()> {
    let sid = socket_of(k, cur, fid)?;
    if !matches!(k.sockets[sid].state, SocketState::Unbound) {
        return Err(Error::BadState);
    }
    if port == NOPORT || port > MAX_PORT {
        return Err(Error::BadPort);
    }
    let lsid = k.port_map[port as usize].ok_or(Error::ConnectionRefused)?;

    let rid = k.requests.insert(RequestCb {
        socket: sid,
        cv: Condvar::new(),
        served: false,
        listener_alive: true,
    });
    let rcv = k.requests[rid].cv.clone();
    let lcv = match &mut k.sockets[lsid].state {
        SocketState::Listener(l) => {
            l.queue.push_back(rid);
            l.cv.clone()
        }
        _ => {
            k.requests.remove(rid);
            return Err(Error::ConnectionRefused);
        }
    };
    lcv.broadcast();

    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let req = &k.requests[rid];
        if req.served || !req.listener_alive {
            break;
        }
        match deadline {
            Some(at) => {
                if rcv.wait_until(k, at) {
                    break;
                }
            }
            None => rcv.wait(k),
        }
    }

    let req = k.requests.remove(rid);
    if req.served && req.listener_alive {
        debug!("connect: pid {} connected to port {}", cur, port);
        return Ok(());
    }
    // Unlink before the block goes away, or the listener would pop a
    // dangling request later.
    if let Some(s) = k.sockets.get_mut(lsid) {
        if let SocketState::Listener(l) = &mut s.state {
            l.queue.retain(|&r| r != rid);
        }
    }
    Err(if req.listener_alive {
        Error::TimedOut
    } else {
        Error::ConnectionRefused
    })
}

/// Waits for a connection request and establishes the peer pair: a fresh
/// server-side socket, two pipes crossed between the two sockets, and the
/// request marked served.
pub(crate) fn accept(k: &mut KernelGuard, cur: Pid, fid: Fid) -> Result<Fid> {
    let lsid = socket_of(k, cur, fid)?;
    let (lcv, lport) = {
        let s = &k.sockets[lsid];
        match &s.state {
            SocketState::Listener(l) => (l.cv.clone(), s.port),
            _ => return Err(Error::BadState),
        }
    };

    let rid = loop {
        // The listener can be closed (and its slot reused) while we sleep;
        // revalidate both the socket and the port map every pass.
        let alive = match k.sockets.get(lsid) {
            Some(s) => matches!(&s.state, SocketState::Listener(l) if l.cv.same_as(&lcv)),
            None => false,
        };
        if !alive || k.port_map[lport as usize] != Some(lsid) {
            return Err(Error::Closed);
        }
        let popped = match &mut k.sockets[lsid].state {
            SocketState::Listener(l) => l.queue.pop_front(),
            _ => None,
        };
        if let Some(rid) = popped {
            // The connector's socket may have been closed while it waited.
            let peer_sid = k.requests[rid].socket;
            let connector_ok = matches!(
                k.sockets.get(peer_sid).map(|s| &s.state),
                Some(SocketState::Unbound)
            );
            if connector_ok {
                break rid;
            }
            let req = &mut k.requests[rid];
            req.listener_alive = false;
            req.cv.broadcast();
            continue;
        }
        lcv.wait(k);
    };

    let peer_sid = k.requests[rid].socket;
    let (server_fid, server_sid) = match socket_new(k, cur, lport) {
        Ok(pair) => pair,
        Err(e) => {
            // Out of descriptors: reject the request instead of leaving the
            // connector parked until its timeout.
            let req = &mut k.requests[rid];
            req.listener_alive = false;
            req.cv.broadcast();
            return Err(e);
        }
    };

    // Two pipes, crossed: p1 carries connector -> server, p2 the reverse.
    let p1 = k.pipes.insert(PipeCb::new());
    let p2 = k.pipes.insert(PipeCb::new());
    let server_fcb = k.sockets[server_sid].fcb;
    let peer_fcb = k.sockets[peer_sid].fcb;
    {
        let p = &mut k.pipes[p1];
        p.reader = Some(server_fcb);
        p.writer = Some(peer_fcb);
    }
    {
        let p = &mut k.pipes[p2];
        p.reader = Some(peer_fcb);
        p.writer = Some(server_fcb);
    }

    k.sockets[peer_sid].state = SocketState::Peer(PeerCb {
        pipe_read: Some(p2),
        pipe_write: Some(p1),
        peer: Some(server_sid),
    });
    k.sockets[server_sid].state = SocketState::Peer(PeerCb {
        pipe_read: Some(p1),
        pipe_write: Some(p2),
        peer: Some(peer_sid),
    });
    // Each side now also keeps the other alive through its peer pointer.
    k.sockets[peer_sid].refs += 1;
    k.sockets[server_sid].refs += 1;

    let req = &mut k.requests[rid];
    req.served = true;
    req.cv.broadcast();
    debug!("accept: pid {} established peer pair on port {}", cur, lport);
    Ok(server_fid)
}

/// Reads from the inbound pipe of a peer socket.
pub(crate) fn socket_read(k: &mut KernelGuard, sid: SocketId, buf: &mut [u8]) -> Result<usize> {
    let id = match k.sockets.get(sid).map(|s| &s.state) {
        Some(SocketState::Peer(p)) => p.pipe_read.ok_or(Error::Closed)?,
        Some(_) => return Err(Error::BadState),
        None => return Err(Error::BadFid),
    };
    pipe::pipe_read(k, id, buf)
}

/// Writes to the outbound pipe of a peer socket.
pub(crate) fn socket_write(k: &mut KernelGuard, sid: SocketId, buf: &[u8]) -> Result<usize> {
    let id = match k.sockets.get(sid).map(|s| &s.state) {
        Some(SocketState::Peer(p)) => p.pipe_write.ok_or(Error::BrokenPipe)?,
        Some(_) => return Err(Error::BadState),
        None => return Err(Error::BadFid),
    };
    pipe::pipe_write(k, id, buf)
}

/// Selectively closes the data paths of a peer socket.
///
/// `READ` tears down the inbound pipe entirely (the peer's writes fail at
/// once); `WRITE` closes only the local write end, so the peer can drain
/// what is already buffered and then sees end of data. Every nulled field
/// stays observable to later calls, which makes re-shutdown a no-op.
pub(crate) fn shutdown(k: &mut KernelState, cur: Pid, fid: Fid, how: ShutdownMode) -> Result<()> {
    let sid = socket_of(k, cur, fid)?;
    let (my_read, my_write, peer_sid) = match &k.sockets[sid].state {
        SocketState::Peer(p) => (p.pipe_read, p.pipe_write, p.peer),
        _ => return Err(Error::BadState),
    };

    if how.contains(ShutdownMode::READ) {
        if let Some(p) = my_read {
            // Both ends of the inbound pipe: ours and the peer's write end.
            pipe::close_reader(k, p);
            pipe::close_writer(k, p);
            if let SocketState::Peer(me) = &mut k.sockets[sid].state {
                me.pipe_read = None;
            }
            if let Some(ps) = peer_sid.and_then(|p| k.sockets.get_mut(p)) {
                if let SocketState::Peer(pp) = &mut ps.state {
                    pp.pipe_write = None;
                }
            }
        }
    }
    if how.contains(ShutdownMode::WRITE) {
        if let Some(p) = my_write {
            pipe::close_writer(k, p);
            if let SocketState::Peer(me) = &mut k.sockets[sid].state {
                me.pipe_write = None;
            }
        }
    }
    Ok(())
}

/// Stream close for a socket descriptor.
///
/// A peer drops its reference to the other side and closes its pipe ends; a
/// listener rejects every queued request, wakes any blocked `accept`, and
/// leaves the port. The block itself is freed once nothing refers to it.
pub(crate) fn socket_close(k: &mut KernelState, sid: SocketId) {
    let port = k.sockets[sid].port;
    let state = std::mem::replace(&mut k.sockets[sid].state, SocketState::Unbound);
    match state {
        SocketState::Peer(p) => {
            if let Some(peer_sid) = p.peer {
                if let Some(ps) = k.sockets.get_mut(peer_sid) {
                    ps.refs -= 1;
                    if ps.refs == 0 {
                        k.sockets.remove(peer_sid);
                    }
                }
            }
            if let Some(pw) = p.pipe_write {
                pipe::close_writer(k, pw);
            }
            if let Some(pr) = p.pipe_read {
                pipe::close_reader(k, pr);
            }
        }
        SocketState::Listener(mut l) => {
            // Reject pending connectors first, then wake accept; it will
            // observe the cleared port map entry.
            while let Some(rid) = l.queue.pop_front() {
                if let Some(req) = k.requests.get_mut(rid) {
                    req.listener_alive = false;
                    req.cv.broadcast();
                }
            }
            l.cv.broadcast();
            if k.port_map[port as usize] == Some(sid) {
                k.port_map[port as usize] = None;
            }
            debug!("close: listener left port {}", port);
        }
        SocketState::Unbound => {}
    }

    let s = &mut k.sockets[sid];
    s.refs -= 1;
    if s.refs == 0 {
        k.sockets.remove(sid);
    }
}
