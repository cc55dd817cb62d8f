//! Subflow control for Multipath TCP connections on Linux.
//!
//! This crate drives the subflow socket options of the multipath-tcp.org
//! kernel: open a subflow between two endpoints, close one, list the
//! subflows of a connection, read a subflow's endpoints, and get or set
//! socket options on an individual subflow. All calls are synchronous
//! `getsockopt(2)`/`setsockopt(2)` on the connection's own socket.
//!
//! # Features
//!
//! - `serde` - `Serialize`/`Deserialize` on the subflow value types
//! - `sim` - In-process simulated kernel ([`sim::SimKernel`])
//! - `integration` - Tests against a real MPTCP kernel
//!
//! # Example
//!
//! ```ignore
//! use std::net::TcpStream;
//! use mptcp_subflow::{Priority, Subflows};
//!
//! fn main() -> mptcp_subflow::Result<()> {
//!     let stream = TcpStream::connect("10.0.0.2:6000")?;
//!     let subflows = Subflows::new(&stream);
//!
//!     // Add a backup path from a second interface.
//!     let id = subflows.open(
//!         "10.0.1.1:0".parse().unwrap(),
//!         "10.0.0.2:6000".parse().unwrap(),
//!         Priority::Low,
//!     )?;
//!
//!     for status in subflows.list()? {
//!         let tuple = subflows.inspect(status.id)?;
//!         println!("{tuple}");
//!     }
//!
//!     subflows.close(id)?;
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Kernel failures keep their errno and are classified by the operation
//! that produced them:
//!
//! ```ignore
//! match subflows.close(id) {
//!     Ok(()) => {}
//!     Err(e) if e.is_unknown_subflow() => println!("already gone"),
//!     Err(e) if e.is_unsupported() => println!("kernel has no subflow API"),
//!     Err(e) => return Err(e),
//! }
//! ```

pub mod addr;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod socket;
pub mod subflow;
pub mod types;

// Feature-gated modules
#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Re-export common types at crate root for convenience
pub use config::ListConfig;
pub use connection::Subflows;
pub use error::{Error, ErrorKind, Result};
pub use socket::{SocketRef, Sockopt};
pub use subflow::{
    OptionValue, Priority, SubflowId, SubflowSnapshot, SubflowStatus, SubflowTuple,
};
pub use types::Operation;
