//! MPTCP subflow socket option ABI.
//!
//! These constants and layouts match the multipath-tcp.org kernel's subflow
//! control API from `include/uapi/linux/tcp.h`. Every option lives at the
//! `IPPROTO_TCP` level and is issued on the MPTCP connection's own socket.
//!
//! Requests that need a variable-length tail (address pairs, subflow lists)
//! are built as a fixed header followed by raw bytes; the headers below are
//! `#[repr(C)]` with explicit padding so their byte images match what the
//! C compiler lays out.

use std::fmt;
use std::mem::size_of;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Socket option level of every subflow option.
pub const SOL_TCP: i32 = libc::IPPROTO_TCP;

/// MPTCP subflow socket option names.
pub mod mptcp_sockopt {
    /// List subflow ids and status (`struct mptcp_sub_ids`).
    pub const GET_SUB_IDS: i32 = 66;
    /// Close one subflow (`struct mptcp_close_sub_id`).
    pub const CLOSE_SUB_ID: i32 = 67;
    /// Read a subflow's endpoints (`struct mptcp_sub_tuple`).
    pub const GET_SUB_TUPLE: i32 = 68;
    /// Open a subflow between two endpoints (`struct mptcp_sub_tuple`).
    pub const OPEN_SUB_TUPLE: i32 = 69;
    /// getsockopt on one subflow (`struct mptcp_sub_getsockopt`).
    pub const SUB_GETSOCKOPT: i32 = 71;
    /// setsockopt on one subflow (`struct mptcp_sub_setsockopt`).
    pub const SUB_SETSOCKOPT: i32 = 72;
}

/// Bits of the `mptcp_sub_status` bitfield.
///
/// The kernel declares these as `__u16` bitfields, so their position
/// follows the target's bitfield allocation order.
pub mod sub_status_flags {
    const fn bit(n: u16) -> u16 {
        if cfg!(target_endian = "little") {
            1 << n
        } else {
            1 << (15 - n)
        }
    }

    /// Subflow is not the initial (master) subflow.
    pub const SLAVE_SK: u16 = bit(0);
    /// MP_CAPABLE/MP_JOIN handshake completed.
    pub const FULLY_ESTABLISHED: u16 = bit(1);
    /// Subflow is attached to the connection.
    pub const ATTACHED: u16 = bit(2);
    /// Subflow is a low-priority (backup) path.
    pub const LOW_PRIO: u16 = bit(3);
    /// Subflow is in the pre-established state.
    pub const PRE_ESTABLISHED: u16 = bit(4);
}

/// A subflow control operation.
///
/// Names the kernel option used and is carried by errors so the errno can
/// be interpreted for the request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Open a subflow.
    Open,
    /// Close a subflow.
    Close,
    /// List subflow ids.
    List,
    /// Read a subflow's endpoints.
    Inspect,
    /// Read a socket option of one subflow.
    GetOption,
    /// Write a socket option of one subflow.
    SetOption,
}

impl Operation {
    /// The option name passed to the kernel.
    pub fn optname(self) -> i32 {
        match self {
            Self::Open => mptcp_sockopt::OPEN_SUB_TUPLE,
            Self::Close => mptcp_sockopt::CLOSE_SUB_ID,
            Self::List => mptcp_sockopt::GET_SUB_IDS,
            Self::Inspect => mptcp_sockopt::GET_SUB_TUPLE,
            Self::GetOption => mptcp_sockopt::SUB_GETSOCKOPT,
            Self::SetOption => mptcp_sockopt::SUB_SETSOCKOPT,
        }
    }

    /// Parse an option name.
    pub fn from_optname(optname: i32) -> Option<Self> {
        match optname {
            mptcp_sockopt::OPEN_SUB_TUPLE => Some(Self::Open),
            mptcp_sockopt::CLOSE_SUB_ID => Some(Self::Close),
            mptcp_sockopt::GET_SUB_IDS => Some(Self::List),
            mptcp_sockopt::GET_SUB_TUPLE => Some(Self::Inspect),
            mptcp_sockopt::SUB_GETSOCKOPT => Some(Self::GetOption),
            mptcp_sockopt::SUB_SETSOCKOPT => Some(Self::SetOption),
            _ => None,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open subflow",
            Self::Close => "close subflow",
            Self::List => "list subflows",
            Self::Inspect => "inspect subflow",
            Self::GetOption => "get subflow option",
            Self::SetOption => "set subflow option",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Header of `struct mptcp_sub_tuple`; the local and remote `sockaddr`
/// records follow immediately.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MptcpSubTuple {
    /// Subflow id (written by the kernel on open).
    pub id: u8,
    /// Non-zero for a low-priority subflow.
    pub prio: u8,
}

/// Size of the `mptcp_sub_tuple` header.
pub const SUB_TUPLE_HDRLEN: usize = size_of::<MptcpSubTuple>();

/// Header of `struct mptcp_sub_ids`; `sub_count` status records follow.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MptcpSubIds {
    /// Number of status records.
    pub sub_count: u8,
    _pad: u8,
}

impl MptcpSubIds {
    /// Create a list header.
    pub fn new(sub_count: u8) -> Self {
        Self {
            sub_count,
            ..Default::default()
        }
    }
}

/// Offset of the first `mptcp_sub_status` record.
pub const SUB_IDS_HDRLEN: usize = size_of::<MptcpSubIds>();

/// `struct mptcp_sub_status`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MptcpSubStatus {
    /// Subflow id.
    pub id: u8,
    _pad: u8,
    /// Status bitfield, see [`sub_status_flags`].
    pub flags: u16,
}

impl MptcpSubStatus {
    /// Create a status record.
    pub fn new(id: u8, flags: u16) -> Self {
        Self {
            id,
            flags,
            ..Default::default()
        }
    }
}

/// Size of one `mptcp_sub_status` record.
pub const SUB_STATUS_LEN: usize = size_of::<MptcpSubStatus>();

/// `struct mptcp_close_sub_id`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MptcpCloseSubId {
    /// Subflow id.
    pub id: u8,
    _pad: [u8; 3],
    /// `SHUT_RD`, `SHUT_WR` or `SHUT_RDWR`.
    pub how: i32,
}

impl MptcpCloseSubId {
    /// Create a close request.
    pub fn new(id: u8, how: i32) -> Self {
        Self {
            id,
            how,
            ..Default::default()
        }
    }
}

/// `struct mptcp_sub_getsockopt`.
///
/// `optval` and `optlen` are user-space addresses the kernel writes the
/// option value and its length through.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MptcpSubGetsockopt {
    /// Subflow id.
    pub id: u8,
    _pad: [u8; 3],
    /// Option level on the subflow socket.
    pub level: i32,
    /// Option name on the subflow socket.
    pub optname: i32,
    #[cfg(target_pointer_width = "64")]
    _pad2: [u8; 4],
    /// Address of the value buffer (`char *`).
    pub optval: usize,
    /// Address of the in/out length (`unsigned int *`).
    pub optlen: usize,
}

impl MptcpSubGetsockopt {
    /// Create a request that reads into `optval`, with `optlen` holding its
    /// capacity on entry.
    pub fn new(id: u8, level: i32, optname: i32, optval: *mut u8, optlen: *mut u32) -> Self {
        Self {
            id,
            level,
            optname,
            optval: optval.expose_provenance(),
            optlen: optlen.expose_provenance(),
            ..Default::default()
        }
    }
}

/// `struct mptcp_sub_setsockopt`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct MptcpSubSetsockopt {
    /// Subflow id.
    pub id: u8,
    _pad: [u8; 3],
    /// Option level on the subflow socket.
    pub level: i32,
    /// Option name on the subflow socket.
    pub optname: i32,
    #[cfg(target_pointer_width = "64")]
    _pad2: [u8; 4],
    /// Address of the value (`char *`).
    pub optval: usize,
    /// Length of the value.
    pub optlen: u32,
    #[cfg(target_pointer_width = "64")]
    _pad3: [u8; 4],
}

impl MptcpSubSetsockopt {
    /// Create a request that writes `optlen` bytes from `optval`.
    pub fn new(id: u8, level: i32, optname: i32, optval: *const u8, optlen: u32) -> Self {
        Self {
            id,
            level,
            optname,
            optval: optval.expose_provenance(),
            optlen,
            ..Default::default()
        }
    }
}
