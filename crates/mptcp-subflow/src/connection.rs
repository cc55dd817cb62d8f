//! Subflow control on one MPTCP connection.

use std::net::{Shutdown, SocketAddr};
use std::os::fd::AsFd;

use tracing::{debug, warn};
use zerocopy::{FromBytes, IntoBytes};

use crate::addr::{self, SOCKADDR_IN6_LEN};
use crate::channel;
use crate::config::ListConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::socket::{SocketRef, Sockopt};
use crate::subflow::{
    OptionValue, Priority, SubflowId, SubflowSnapshot, SubflowStatus, SubflowTuple,
};
use crate::types::{
    MptcpCloseSubId, MptcpSubIds, MptcpSubStatus, MptcpSubTuple, Operation, SOL_TCP,
    SUB_IDS_HDRLEN, SUB_STATUS_LEN, SUB_TUPLE_HDRLEN,
};

/// Slack added after the address pair when inspecting a subflow.
const INSPECT_SLACK: usize = 40;

/// Reply buffer size for an inspect request.
const INSPECT_REPLY_SIZE: usize = SUB_TUPLE_HDRLEN + 2 * SOCKADDR_IN6_LEN + INSPECT_SLACK;

/// Subflow operations on an MPTCP connection socket.
///
/// Every method issues its own kernel calls and returns owned values; no
/// state is kept between calls apart from the list policy.
///
/// # Example
///
/// ```ignore
/// use std::net::TcpStream;
/// use mptcp_subflow::{Priority, Subflows};
///
/// let stream = TcpStream::connect("10.0.0.2:6000")?;
/// let subflows = Subflows::new(&stream);
///
/// let id = subflows.open(
///     "10.0.1.1:0".parse()?,
///     "10.0.0.2:6000".parse()?,
///     Priority::Low,
/// )?;
/// for status in subflows.list()? {
///     println!("subflow {} {:?}", status.id, status.priority);
/// }
/// subflows.close(id)?;
/// ```
#[derive(Debug, Clone)]
pub struct Subflows<S> {
    sock: S,
    config: ListConfig,
}

impl<'a> Subflows<SocketRef<'a>> {
    /// Operate on the subflows of `sock`.
    ///
    /// The socket is borrowed and never closed.
    pub fn new(sock: &'a impl AsFd) -> Self {
        Self::with_backend(SocketRef::new(sock))
    }
}

impl<S: Sockopt> Subflows<S> {
    /// Operate through any socket option backend.
    pub fn with_backend(sock: S) -> Self {
        Self {
            sock,
            config: ListConfig::default(),
        }
    }

    /// Set the policy used by [`list`](Self::list).
    pub fn with_list_config(mut self, config: ListConfig) -> Self {
        self.config = config;
        self
    }

    /// The policy used by [`list`](Self::list).
    pub fn list_config(&self) -> &ListConfig {
        &self.config
    }

    /// The socket option backend.
    pub fn backend(&self) -> &S {
        &self.sock
    }

    /// Take back the socket option backend.
    pub fn into_backend(self) -> S {
        self.sock
    }

    /// Open a new subflow between `local` and `remote`.
    ///
    /// The endpoints may be of different address families; whether the
    /// kernel accepts such a pair is up to the kernel.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let id = subflows.open(
    ///     "10.0.1.1:0".parse()?,
    ///     "10.0.0.2:6000".parse()?,
    ///     Priority::Normal,
    /// )?;
    /// ```
    pub fn open(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
        priority: Priority,
    ) -> Result<SubflowId> {
        let header = MptcpSubTuple {
            id: 0,
            prio: priority.to_raw(),
        };
        let mut request = header.as_bytes().to_vec();
        request.extend_from_slice(&addr::encode_pair(&local, &remote));

        let reply = channel::get_option(
            &self.sock,
            Operation::Open,
            SOL_TCP,
            Operation::Open.optname(),
            &request,
            0,
        )?;

        let (header, _) = MptcpSubTuple::read_from_prefix(&reply).map_err(|_| Error::Truncated {
            expected: SUB_TUPLE_HDRLEN,
            actual: reply.len(),
        })?;

        debug!(id = header.id, %local, %remote, ?priority, "opened subflow");
        Ok(SubflowId(header.id))
    }

    /// Close subflow `id` in both directions.
    ///
    /// Closing an id that is not open fails with
    /// [`ErrorKind::UnknownSubflow`].
    pub fn close(&self, id: SubflowId) -> Result<()> {
        self.close_with(id, Shutdown::Both)
    }

    /// Shut down subflow `id` in the given direction(s).
    ///
    /// The kernel takes this request through getsockopt, not setsockopt:
    /// the close request is read by the kernel and the call has no reply.
    ///
    /// The direction is passed along, but kernels may ignore it and close
    /// the subflow fully whatever `how` says. Do not rely on a half-close
    /// leaving the subflow listed.
    pub fn close_with(&self, id: SubflowId, how: Shutdown) -> Result<()> {
        let how = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        let request = MptcpCloseSubId::new(id.get(), how);

        channel::get_option(
            &self.sock,
            Operation::Close,
            SOL_TCP,
            Operation::Close.optname(),
            request.as_bytes(),
            0,
        )?;

        debug!(%id, how, "closed subflow");
        Ok(())
    }

    /// List the connection's subflows using the configured policy.
    pub fn list(&self) -> Result<SubflowSnapshot> {
        self.list_with(&self.config)
    }

    /// List the connection's subflows using `config`.
    ///
    /// The kernel cannot report the list size up front, so the request is
    /// repeated with a larger buffer each time the kernel answers "too
    /// small", until it fits or `config` runs out of attempts or size.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let snapshot = subflows.list_with(&ListConfig::new().max_attempts(4))?;
    /// println!("{} subflows: {:?}", snapshot.len(), snapshot.ids());
    /// ```
    pub fn list_with(&self, config: &ListConfig) -> Result<SubflowSnapshot> {
        config.validate()?;

        let mut attempts = 0;
        let mut size = config.initial_size;

        loop {
            attempts += 1;

            match channel::get_option(
                &self.sock,
                Operation::List,
                SOL_TCP,
                Operation::List.optname(),
                &[],
                size,
            ) {
                Ok(reply) => return parse_sub_ids(&reply),
                Err(e) if e.kind() == ErrorKind::BufferTooSmall => {}
                Err(e) => return Err(e),
            }

            let next = config.size_for_attempt(attempts);
            if attempts >= config.max_attempts || next > config.max_size {
                warn!(attempts, size, "subflow list still too small, giving up");
                return Err(Error::ListOverflow { attempts, size });
            }

            debug!(attempts, size, next, "subflow list buffer too small, growing");
            size = next;
        }
    }

    /// Read the endpoints and priority of subflow `id`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let tuple = subflows.inspect(SubflowId(3))?;
    /// println!("{}", tuple);
    /// ```
    pub fn inspect(&self, id: SubflowId) -> Result<SubflowTuple> {
        let request = MptcpSubTuple {
            id: id.get(),
            prio: 0,
        };

        let reply = channel::get_option(
            &self.sock,
            Operation::Inspect,
            SOL_TCP,
            Operation::Inspect.optname(),
            request.as_bytes(),
            INSPECT_REPLY_SIZE,
        )?;

        let (header, _) = MptcpSubTuple::read_from_prefix(&reply).map_err(|_| Error::Truncated {
            expected: SUB_TUPLE_HDRLEN,
            actual: reply.len(),
        })?;
        let (local, remote) = addr::decode_pair(&reply, SUB_TUPLE_HDRLEN)?;

        Ok(SubflowTuple {
            id,
            priority: Priority::from_raw(header.prio),
            local,
            remote,
        })
    }

    /// Read socket option (`level`, `optname`) of subflow `id`.
    ///
    /// `expected_size` bytes are offered for the value; the result holds
    /// only as many as the kernel wrote.
    pub fn get_option(
        &self,
        id: SubflowId,
        level: i32,
        optname: i32,
        expected_size: usize,
    ) -> Result<OptionValue> {
        channel::get_sub_option(&self.sock, id.get(), level, optname, expected_size)
            .map(OptionValue::from)
    }

    /// Write socket option (`level`, `optname`) of subflow `id`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// subflows.set_option(id, libc::IPPROTO_TCP, libc::TCP_NODELAY, &OptionValue::from_i32(1))?;
    /// ```
    pub fn set_option(
        &self,
        id: SubflowId,
        level: i32,
        optname: i32,
        value: &OptionValue,
    ) -> Result<()> {
        channel::set_sub_option(&self.sock, id.get(), level, optname, value.as_bytes())
    }

    /// Read an `int` socket option of subflow `id`.
    pub fn get_option_int(&self, id: SubflowId, level: i32, optname: i32) -> Result<i32> {
        let value = self.get_option(id, level, optname, size_of::<i32>())?;
        value.as_i32().ok_or(Error::Truncated {
            expected: size_of::<i32>(),
            actual: value.len(),
        })
    }

    /// Write an `int` socket option of subflow `id`.
    pub fn set_option_int(
        &self,
        id: SubflowId,
        level: i32,
        optname: i32,
        value: i32,
    ) -> Result<()> {
        self.set_option(id, level, optname, &OptionValue::from_i32(value))
    }
}

/// Decode a `mptcp_sub_ids` reply.
fn parse_sub_ids(reply: &[u8]) -> Result<SubflowSnapshot> {
    let (header, records) = MptcpSubIds::read_from_prefix(reply).map_err(|_| Error::Truncated {
        expected: SUB_IDS_HDRLEN,
        actual: reply.len(),
    })?;

    let count = header.sub_count as usize;
    let expected = SUB_IDS_HDRLEN + count * SUB_STATUS_LEN;
    if reply.len() < expected {
        return Err(Error::Truncated {
            expected,
            actual: reply.len(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    for chunk in records.chunks_exact(SUB_STATUS_LEN).take(count) {
        let raw = MptcpSubStatus::read_from_bytes(chunk).map_err(|_| Error::Truncated {
            expected,
            actual: reply.len(),
        })?;
        entries.push(SubflowStatus::from_raw(&raw));
    }

    Ok(SubflowSnapshot::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimKernel;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_open_inspect_close_scenario() {
        let kernel = SimKernel::new();
        kernel.set_next_id(3);
        let subflows = Subflows::with_backend(&kernel);

        let id = subflows
            .open(addr("10.0.0.1:5000"), addr("10.0.0.2:6000"), Priority::Normal)
            .unwrap();
        assert_eq!(id, SubflowId(3));

        let tuple = subflows.inspect(id).unwrap();
        assert_eq!(tuple.id, SubflowId(3));
        assert_eq!(tuple.priority, Priority::Normal);
        assert_eq!(tuple.local, addr("10.0.0.1:5000"));
        assert_eq!(tuple.remote, addr("10.0.0.2:6000"));

        subflows.close(id).unwrap();

        let err = subflows.inspect(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSubflow);
        assert_eq!(err.errno(), Some(libc::EINVAL));
    }

    #[test]
    fn test_open_mixed_families() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);

        let local = addr("10.0.0.1:5000");
        let remote = addr("[2001:db8::2]:443");
        let id = subflows.open(local, remote, Priority::Low).unwrap();

        let tuple = subflows.inspect(id).unwrap();
        assert_eq!((tuple.local, tuple.remote), (local, remote));
        assert!(tuple.priority.is_low());
        assert!(!tuple.is_same_family());
    }

    #[test]
    fn test_open_rejected() {
        let kernel = SimKernel::new();
        kernel.set_max_subflows(0);
        let subflows = Subflows::with_backend(&kernel);

        let err = subflows
            .open(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
            .unwrap_err();
        assert!(err.is_resource_exhausted());
        assert_eq!(err.errno(), Some(libc::ENOSPC));
    }

    #[test]
    fn test_close_twice() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);
        let id = subflows
            .open(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
            .unwrap();

        subflows.close(id).unwrap();
        let err = subflows.close(id).unwrap_err();
        assert!(err.is_unknown_subflow());
        assert_eq!(kernel.calls(Operation::Close), 2);
    }

    #[test]
    fn test_close_with_direction() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);
        let id = subflows
            .open(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
            .unwrap();

        subflows.close_with(id, Shutdown::Write).unwrap();
        assert!(!kernel.has_subflow(id));
    }

    #[test]
    fn test_list_in_kernel_order() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);

        let a = subflows
            .open(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
            .unwrap();
        let b = subflows
            .open(addr("10.0.0.1:2"), addr("10.0.0.2:2"), Priority::Low)
            .unwrap();
        let c = subflows
            .open(addr("10.0.0.1:3"), addr("10.0.0.2:3"), Priority::Normal)
            .unwrap();
        subflows.close(b).unwrap();

        let snapshot = subflows.list().unwrap();
        assert_eq!(snapshot.ids(), vec![a, c]);
        assert!(!snapshot[0].slave_sk);
        assert!(snapshot[1].slave_sk);
    }

    #[test]
    fn test_list_empty() {
        let kernel = SimKernel::new();
        let snapshot = Subflows::with_backend(&kernel).list().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_list_grows_buffer() {
        // 20 subflows need 82 bytes: 40 and 60 are too small, 80 as well.
        let kernel = SimKernel::new();
        for port in 1..=20 {
            kernel
                .add_subflow(
                    addr(&format!("10.0.0.1:{port}")),
                    addr("10.0.0.2:80"),
                    Priority::Normal,
                )
                .unwrap();
        }

        let snapshot = Subflows::with_backend(&kernel).list().unwrap();
        assert_eq!(snapshot.len(), 20);
        assert_eq!(kernel.calls(Operation::List), 4);
    }

    #[test]
    fn test_list_recovers_after_too_small() {
        for k in [0u32, 1, 5] {
            let kernel = SimKernel::new()
                .with_subflow(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
                .with_subflow(addr("10.0.0.1:2"), addr("10.0.0.2:2"), Priority::Low);
            kernel.report_too_small(k);

            let snapshot = Subflows::with_backend(&kernel).list().unwrap();
            assert_eq!(snapshot.len(), 2);
            assert!(snapshot[1].priority.is_low());
            assert_eq!(kernel.calls(Operation::List), k + 1);
        }
    }

    #[test]
    fn test_list_overflow_cap() {
        let kernel = SimKernel::new();
        kernel.report_too_small(100);

        let config = ListConfig::new().max_attempts(5);
        let err = Subflows::with_backend(&kernel)
            .with_list_config(config)
            .list()
            .unwrap_err();

        assert!(matches!(err, Error::ListOverflow { attempts: 5, size: 120 }));
        assert!(err.is_resource_exhausted());
        assert_eq!(kernel.calls(Operation::List), 5);
    }

    #[test]
    fn test_list_size_cap() {
        let kernel = SimKernel::new();
        kernel.report_too_small(100);

        let config = ListConfig::new().max_size(100);
        let err = Subflows::with_backend(&kernel).list_with(&config).unwrap_err();

        // 40, 60, 80 and 100 are tried; 120 is over the cap.
        assert!(matches!(err, Error::ListOverflow { attempts: 4, size: 100 }));
        assert_eq!(kernel.calls(Operation::List), 4);
    }

    #[test]
    fn test_list_other_error_not_retried() {
        let kernel = SimKernel::new();
        kernel.fail(Operation::List, libc::EPERM);

        let err = Subflows::with_backend(&kernel).list().unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(kernel.calls(Operation::List), 1);
    }

    #[test]
    fn test_list_invalid_config() {
        let kernel = SimKernel::new();
        let err = Subflows::with_backend(&kernel)
            .list_with(&ListConfig::new().increment(0))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(kernel.calls(Operation::List), 0);
    }

    #[test]
    fn test_parse_sub_ids_truncated() {
        let mut reply = MptcpSubIds::new(3).as_bytes().to_vec();
        reply.extend_from_slice(MptcpSubStatus::new(1, 0).as_bytes());

        let err = parse_sub_ids(&reply).unwrap_err();
        assert!(matches!(
            err,
            Error::Truncated {
                expected: 14,
                actual: 6
            }
        ));

        let err = parse_sub_ids(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncated);
    }

    #[test]
    fn test_option_passthrough() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);
        let id = subflows
            .open(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
            .unwrap();

        let value = OptionValue::new(vec![1, 2, 3, 4, 5, 6]);
        subflows.set_option(id, SOL_TCP, libc::TCP_CONGESTION, &value).unwrap();
        let back = subflows.get_option(id, SOL_TCP, libc::TCP_CONGESTION, 16).unwrap();
        assert_eq!(back, value);

        // Short buffer: only what fits comes back.
        let short = subflows.get_option(id, SOL_TCP, libc::TCP_CONGESTION, 2).unwrap();
        assert_eq!(short.as_bytes(), &[1, 2]);
    }

    #[test]
    fn test_option_int() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);
        let id = subflows
            .open(addr("10.0.0.1:1"), addr("10.0.0.2:1"), Priority::Normal)
            .unwrap();

        subflows.set_option_int(id, SOL_TCP, libc::TCP_NODELAY, 1).unwrap();
        assert_eq!(subflows.get_option_int(id, SOL_TCP, libc::TCP_NODELAY).unwrap(), 1);

        subflows
            .set_option(id, SOL_TCP, libc::TCP_MAXSEG, &OptionValue::new(vec![7, 7]))
            .unwrap();
        let err = subflows.get_option_int(id, SOL_TCP, libc::TCP_MAXSEG).unwrap_err();
        assert!(matches!(err, Error::Truncated { expected: 4, actual: 2 }));
    }

    #[test]
    fn test_option_unknown_subflow() {
        let kernel = SimKernel::new();
        let subflows = Subflows::with_backend(&kernel);

        let err = subflows
            .get_option(SubflowId(9), SOL_TCP, libc::TCP_NODELAY, 4)
            .unwrap_err();
        assert_eq!(err.errno(), Some(libc::EINVAL));
        assert!(err.is_unknown_subflow());
        assert!(matches!(
            err,
            Error::Os {
                operation: Operation::GetOption,
                ..
            }
        ));

        let err = subflows
            .set_option_int(SubflowId(9), SOL_TCP, libc::TCP_NODELAY, 1)
            .unwrap_err();
        assert!(err.is_unknown_subflow());
        assert!(matches!(
            err,
            Error::Os {
                operation: Operation::SetOption,
                ..
            }
        ));
    }

    /// Backend that answers every getsockopt with fixed reply bytes.
    struct FixedReply(Vec<u8>);

    impl Sockopt for FixedReply {
        fn getsockopt(
            &self,
            _level: i32,
            _optname: i32,
            buf: &mut [u8],
        ) -> std::io::Result<usize> {
            let n = self.0.len().min(buf.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            Ok(n)
        }

        fn setsockopt(&self, _level: i32, _optname: i32, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_inspect_bad_reply() {
        // Valid header, then a record with an unknown family.
        let mut reply = MptcpSubTuple { id: 4, prio: 0 }.as_bytes().to_vec();
        reply.extend_from_slice(&99u16.to_ne_bytes());
        reply.extend_from_slice(&[0; 14]);
        reply.extend_from_slice(&addr::encode_pair(&addr("10.0.0.2:1"), &addr("10.0.0.3:1")));

        let err = Subflows::with_backend(FixedReply(reply))
            .inspect(SubflowId(4))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedAddress { offset: 2, .. }));
        assert_eq!(err.errno(), None);

        let err = Subflows::with_backend(FixedReply(vec![4]))
            .inspect(SubflowId(4))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Truncated {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_config_accessors() {
        let kernel = SimKernel::new();
        let config = ListConfig::new().initial_size(64);
        let subflows = Subflows::with_backend(&kernel).with_list_config(config);
        assert_eq!(subflows.list_config().initial_size, 64);
        assert_eq!(subflows.backend().subflow_count(), 0);
    }
}
