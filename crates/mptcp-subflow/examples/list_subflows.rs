//! List the subflows of an MPTCP connection.
//!
//! Connects to the given address and prints every subflow with its
//! endpoints and status.
//!
//! Run: cargo run -p mptcp-subflow --example list_subflows -- 10.0.0.2:80
//!
//! Set `RUST_LOG=mptcp_subflow=debug` to see the list negotiation.

use std::net::{SocketAddr, TcpStream};

use mptcp_subflow::{SubflowStatus, Subflows};

fn flags(status: &SubflowStatus) -> String {
    let mut flags = Vec::new();
    if !status.slave_sk {
        flags.push("master");
    }
    if status.fully_established {
        flags.push("established");
    }
    if status.attached {
        flags.push("attached");
    }
    if status.pre_established {
        flags.push("pre-established");
    }
    if status.priority.is_low() {
        flags.push("backup");
    }
    flags.join(",")
}

fn main() -> mptcp_subflow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let target: SocketAddr = match std::env::args().nth(1).map(|s| s.parse()) {
        Some(Ok(addr)) => addr,
        Some(Err(e)) => {
            eprintln!("invalid address: {}", e);
            std::process::exit(2);
        }
        None => {
            eprintln!("usage: list_subflows <host:port>");
            std::process::exit(2);
        }
    };

    let stream = TcpStream::connect(target)?;
    let subflows = Subflows::new(&stream);

    let snapshot = match subflows.list() {
        Ok(snapshot) => snapshot,
        Err(e) if e.is_unsupported() => {
            println!("This kernel does not support MPTCP subflow control.");
            println!("Error: {}", e);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("=== {} subflow(s) to {} ===\n", snapshot.len(), target);

    for status in &snapshot {
        match subflows.inspect(status.id) {
            Ok(tuple) => println!("  {} [{}]", tuple, flags(status)),
            Err(e) if e.is_unknown_subflow() => {
                println!("  {}: closed while listing", status.id)
            }
            Err(e) => println!("  {}: {}", status.id, e),
        }
    }

    Ok(())
}
