//! Simulated MPTCP kernel.
//!
//! [`SimKernel`] implements [`Sockopt`] by decoding the same request
//! structures the kernel receives and answering with the same reply
//! layouts and errno values. It keeps a small table of subflows, assigns
//! ids on open, and can be told to fail or to report "buffer too small" a
//! number of times, so every path through [`Subflows`](crate::Subflows)
//! can be exercised without an MPTCP-enabled kernel.
//!
//! # Example
//!
//! ```
//! use mptcp_subflow::sim::SimKernel;
//! use mptcp_subflow::{Priority, Subflows};
//!
//! let kernel = SimKernel::new();
//! kernel.set_next_id(3);
//!
//! let subflows = Subflows::with_backend(&kernel);
//! let id = subflows.open(
//!     "10.0.0.1:5000".parse().unwrap(),
//!     "10.0.0.2:6000".parse().unwrap(),
//!     Priority::Normal,
//! )?;
//! assert_eq!(id.get(), 3);
//! # Ok::<(), mptcp_subflow::Error>(())
//! ```
//!
//! Per-subflow option requests carry pointers the simulator cannot follow,
//! so it answers them through the slice-based
//! [`Sockopt::sub_getsockopt`]/[`Sockopt::sub_setsockopt`] overrides and
//! rejects the raw pointer form with `EFAULT`.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use zerocopy::{FromBytes, IntoBytes};

use crate::addr;
use crate::socket::Sockopt;
use crate::subflow::{Priority, SubflowId, SubflowStatus};
use crate::types::{
    MptcpCloseSubId, MptcpSubIds, MptcpSubTuple, Operation, SOL_TCP, SUB_IDS_HDRLEN,
    SUB_STATUS_LEN, SUB_TUPLE_HDRLEN,
};

/// Default number of subflows a simulated connection accepts.
pub const DEFAULT_MAX_SUBFLOWS: usize = 32;

fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

#[derive(Debug, Clone)]
struct SimSubflow {
    id: u8,
    priority: Priority,
    local: SocketAddr,
    remote: SocketAddr,
    master: bool,
    options: HashMap<(i32, i32), Vec<u8>>,
}

impl SimSubflow {
    fn status(&self) -> SubflowStatus {
        SubflowStatus {
            id: SubflowId(self.id),
            priority: self.priority,
            slave_sk: !self.master,
            fully_established: true,
            attached: true,
            pre_established: false,
        }
    }
}

#[derive(Debug)]
struct State {
    subflows: Vec<SimSubflow>,
    next_id: u8,
    max_subflows: usize,
    too_small: u32,
    failures: HashMap<Operation, i32>,
    calls: HashMap<Operation, u32>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            subflows: Vec::new(),
            next_id: 1,
            max_subflows: DEFAULT_MAX_SUBFLOWS,
            too_small: 0,
            failures: HashMap::new(),
            calls: HashMap::new(),
        }
    }
}

impl State {
    /// Count a call and return the injected failure for it, if any.
    fn enter(&mut self, op: Operation) -> io::Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op) {
            Some(&code) => Err(errno(code)),
            None => Ok(()),
        }
    }

    fn find(&self, id: u8) -> Option<&SimSubflow> {
        self.subflows.iter().find(|s| s.id == id)
    }

    fn find_mut(&mut self, id: u8) -> Option<&mut SimSubflow> {
        self.subflows.iter_mut().find(|s| s.id == id)
    }

    fn allocate_id(&mut self) -> io::Result<u8> {
        if self.subflows.len() >= self.max_subflows {
            return Err(errno(libc::ENOSPC));
        }
        // Id 0 is never handed out.
        for _ in 0..=u8::MAX {
            let candidate = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if candidate != 0 && self.find(candidate).is_none() {
                return Ok(candidate);
            }
        }
        Err(errno(libc::ENOSPC))
    }

    fn insert(
        &mut self,
        local: SocketAddr,
        remote: SocketAddr,
        priority: Priority,
    ) -> io::Result<u8> {
        let id = self.allocate_id()?;
        let master = self.subflows.is_empty();
        self.subflows.push(SimSubflow {
            id,
            priority,
            local,
            remote,
            master,
            options: HashMap::new(),
        });
        Ok(id)
    }

    fn list(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.too_small > 0 {
            self.too_small -= 1;
            return Err(errno(libc::EINVAL));
        }

        let count = u8::try_from(self.subflows.len()).map_err(|_| errno(libc::EOVERFLOW))?;
        let needed = SUB_IDS_HDRLEN + self.subflows.len() * SUB_STATUS_LEN;
        if buf.len() < needed {
            return Err(errno(libc::EINVAL));
        }

        buf[..SUB_IDS_HDRLEN].copy_from_slice(MptcpSubIds::new(count).as_bytes());
        for (slot, sub) in buf[SUB_IDS_HDRLEN..needed]
            .chunks_exact_mut(SUB_STATUS_LEN)
            .zip(&self.subflows)
        {
            slot.copy_from_slice(sub.status().to_raw().as_bytes());
        }
        Ok(needed)
    }

    fn open(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (header, _) =
            MptcpSubTuple::read_from_prefix(buf).map_err(|_| errno(libc::EINVAL))?;
        let (local, remote) =
            addr::decode_pair(buf, SUB_TUPLE_HDRLEN).map_err(|_| errno(libc::EINVAL))?;

        let id = self.insert(local, remote, Priority::from_raw(header.prio))?;
        buf[0] = id;
        Ok(buf.len())
    }

    fn close(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (req, _) =
            MptcpCloseSubId::read_from_prefix(buf).map_err(|_| errno(libc::EINVAL))?;
        if ![libc::SHUT_RD, libc::SHUT_WR, libc::SHUT_RDWR].contains(&req.how) {
            return Err(errno(libc::EINVAL));
        }

        // Any shutdown direction tears the simulated subflow down.
        let before = self.subflows.len();
        self.subflows.retain(|s| s.id != req.id);
        if self.subflows.len() == before {
            return Err(errno(libc::EINVAL));
        }
        Ok(buf.len())
    }

    fn inspect(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (header, _) =
            MptcpSubTuple::read_from_prefix(buf).map_err(|_| errno(libc::EINVAL))?;
        let sub = self.find(header.id).ok_or_else(|| errno(libc::EINVAL))?;

        let reply_header = MptcpSubTuple {
            id: sub.id,
            prio: sub.priority.to_raw(),
        };
        let mut reply = reply_header.as_bytes().to_vec();
        reply.extend_from_slice(&addr::encode_pair(&sub.local, &sub.remote));

        if buf.len() < reply.len() {
            return Err(errno(libc::EINVAL));
        }
        buf[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }
}

/// An in-process stand-in for one MPTCP connection socket.
///
/// All methods take `&self`; state sits behind a mutex so a kernel can be
/// shared between threads the way a real socket can.
#[derive(Debug, Default)]
pub struct SimKernel {
    state: Mutex<State>,
}

impl SimKernel {
    /// Create a connection with no subflows.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an existing subflow (builder form).
    ///
    /// Ids are assigned exactly as for an open; if the table is full the
    /// subflow is silently not added.
    pub fn with_subflow(self, local: SocketAddr, remote: SocketAddr, priority: Priority) -> Self {
        let _ = self.lock().insert(local, remote, priority);
        self
    }

    /// Add an existing subflow and return its id.
    ///
    /// The first subflow added is the connection's master subflow.
    pub fn add_subflow(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
        priority: Priority,
    ) -> io::Result<SubflowId> {
        self.lock().insert(local, remote, priority).map(SubflowId)
    }

    /// Set the id the next open tries first.
    ///
    /// Ids already in use are skipped, as is 0.
    pub fn set_next_id(&self, id: u8) {
        self.lock().next_id = id;
    }

    /// Limit how many subflows the connection accepts; opens past the limit
    /// fail with `ENOSPC`.
    pub fn set_max_subflows(&self, max: usize) {
        self.lock().max_subflows = max;
    }

    /// Answer the next `times` list requests with "too small", whatever
    /// their buffer size.
    pub fn report_too_small(&self, times: u32) {
        self.lock().too_small = times;
    }

    /// Fail every call of `op` with `errno` until cleared.
    pub fn fail(&self, op: Operation, errno: i32) {
        self.lock().failures.insert(op, errno);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of kernel calls made for `op`, including failed ones.
    pub fn calls(&self, op: Operation) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of open subflows.
    pub fn subflow_count(&self) -> usize {
        self.lock().subflows.len()
    }

    /// Check if `id` names an open subflow.
    pub fn has_subflow(&self, id: SubflowId) -> bool {
        self.lock().find(id.get()).is_some()
    }
}

impl Sockopt for SimKernel {
    fn getsockopt(&self, level: i32, optname: i32, buf: &mut [u8]) -> io::Result<usize> {
        let op = match Operation::from_optname(optname) {
            Some(op) if level == SOL_TCP && op != Operation::SetOption => op,
            _ => return Err(errno(libc::ENOPROTOOPT)),
        };

        let mut state = self.lock();
        state.enter(op)?;
        match op {
            Operation::List => state.list(buf),
            Operation::Open => state.open(buf),
            Operation::Close => state.close(buf),
            Operation::Inspect => state.inspect(buf),
            Operation::GetOption | Operation::SetOption => Err(errno(libc::EFAULT)),
        }
    }

    fn setsockopt(&self, level: i32, optname: i32, _buf: &[u8]) -> io::Result<()> {
        match Operation::from_optname(optname) {
            Some(Operation::SetOption) if level == SOL_TCP => {
                self.lock().enter(Operation::SetOption)?;
                Err(errno(libc::EFAULT))
            }
            _ => Err(errno(libc::ENOPROTOOPT)),
        }
    }

    fn sub_getsockopt(
        &self,
        id: u8,
        level: i32,
        optname: i32,
        value: &mut [u8],
    ) -> io::Result<usize> {
        let mut state = self.lock();
        state.enter(Operation::GetOption)?;

        let sub = state.find(id).ok_or_else(|| errno(libc::EINVAL))?;
        let stored = sub
            .options
            .get(&(level, optname))
            .ok_or_else(|| errno(libc::ENOPROTOOPT))?;

        let n = stored.len().min(value.len());
        value[..n].copy_from_slice(&stored[..n]);
        Ok(n)
    }

    fn sub_setsockopt(&self, id: u8, level: i32, optname: i32, value: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        state.enter(Operation::SetOption)?;

        let sub = state.find_mut(id).ok_or_else(|| errno(libc::EINVAL))?;
        sub.options.insert((level, optname), value.to_vec());
        Ok(())
    }
}
