//! Single-shot socket option calls.
//!
//! Each function issues exactly one call and reports exactly what the
//! kernel did. Nothing here retries: whether "too small" is worth another
//! try depends on the request, which only the caller knows.

use tracing::trace;

use crate::error::{Error, Result};
use crate::socket::Sockopt;
use crate::types::Operation;

/// Issue one getsockopt.
///
/// The value buffer is `max(request.len(), reply_size)` bytes with
/// `request` copied to its start; the kernel may rewrite any of it. On
/// success the buffer is cut to the length the kernel reported.
pub fn get_option<S: Sockopt + ?Sized>(
    sock: &S,
    operation: Operation,
    level: i32,
    optname: i32,
    request: &[u8],
    reply_size: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; request.len().max(reply_size)];
    buf[..request.len()].copy_from_slice(request);

    trace!(%operation, level, optname, request = request.len(), size = buf.len(), "getsockopt");

    let written = sock
        .getsockopt(level, optname, &mut buf)
        .map_err(|e| Error::from_io(operation, e))?;

    trace!(%operation, written, "getsockopt done");
    buf.truncate(written);
    Ok(buf)
}

/// Issue one setsockopt.
pub fn set_option<S: Sockopt + ?Sized>(
    sock: &S,
    operation: Operation,
    level: i32,
    optname: i32,
    value: &[u8],
) -> Result<()> {
    trace!(%operation, level, optname, size = value.len(), "setsockopt");

    sock.setsockopt(level, optname, value)
        .map_err(|e| Error::from_io(operation, e))
}

/// Read one option of subflow `id`, offering `size` bytes for the value.
///
/// Returns the bytes the kernel wrote, which may be fewer than `size`.
pub fn get_sub_option<S: Sockopt + ?Sized>(
    sock: &S,
    id: u8,
    level: i32,
    optname: i32,
    size: usize,
) -> Result<Vec<u8>> {
    let mut value = vec![0u8; size];

    trace!(id, level, optname, size, "subflow getsockopt");

    let written = sock
        .sub_getsockopt(id, level, optname, &mut value)
        .map_err(|e| Error::from_io(Operation::GetOption, e))?;

    value.truncate(written);
    Ok(value)
}

/// Write one option of subflow `id`.
pub fn set_sub_option<S: Sockopt + ?Sized>(
    sock: &S,
    id: u8,
    level: i32,
    optname: i32,
    value: &[u8],
) -> Result<()> {
    trace!(id, level, optname, size = value.len(), "subflow setsockopt");

    sock.sub_setsockopt(id, level, optname, value)
        .map_err(|e| Error::from_io(Operation::SetOption, e))
}
