//! Local TCP port allocation for daemons started without a configured port.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, PoisonError};

use crate::utils::{Result, SupervisorError};

/// How many times to ask the OS for a port we have not handed out yet.
const MAX_ATTEMPTS: usize = 32;

/// Hands out OS-assigned ephemeral ports, never the same one twice.
///
/// The OS is free to reuse a port as soon as the probing listener is closed,
/// so the allocator remembers what it already issued. Controllers that must
/// not collide should be built from the same allocator.
#[derive(Debug, Default)]
pub struct PortAllocator {
    issued: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a port that was free at the time of the call.
    pub fn allocate(&self) -> Result<u16> {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);

        for _ in 0..MAX_ATTEMPTS {
            let port = ephemeral_port().map_err(SupervisorError::NoFreePort)?;
            if issued.insert(port) {
                tracing::debug!("Allocated ephemeral port {port}");
                return Ok(port);
            }
            tracing::debug!("OS reused already issued port {port}, retrying");
        }

        Err(SupervisorError::NoFreePort(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("no unused ephemeral port after {MAX_ATTEMPTS} attempts"),
        )))
    }

    /// Number of ports handed out so far.
    pub fn issued(&self) -> usize {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Bind port 0 on loopback and report what the OS picked.
pub fn ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
