use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fmt;
use std::net::TcpListener;

// Upper bound on binds per requested port before giving up
const MAX_BIND_ATTEMPTS_PER_PORT: usize = 64;

/// The two ports a sidecar listens on for one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    /// Control plane, used for binding invocations.
    pub grpc: u16,
    /// Data plane, used for health and metadata.
    pub http: u16,
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grpc={} http={}", self.grpc, self.http)
    }
}

/// Hands out free local ports and never issues the same port twice.
///
/// Every flow asks the allocator for its own pair, so a port that belonged to
/// an earlier flow's sidecar cannot be handed to a later one even if the OS
/// would offer it again.
#[derive(Debug, Default)]
pub struct PortAllocator {
    issued: HashSet<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `count` distinct free ports that this allocator has not issued before.
    pub fn free_ports(&mut self, count: usize) -> Result<Vec<u16>> {
        // Listeners stay bound until every port is picked so the OS cannot
        // return the same ephemeral port twice within one request.
        let mut held = Vec::with_capacity(count);
        let mut ports = Vec::with_capacity(count);
        let max_attempts = MAX_BIND_ATTEMPTS_PER_PORT * count.max(1);
        let mut attempts = 0;

        while ports.len() < count {
            if attempts >= max_attempts {
                bail!(
                    "Could not find {count} unused ports after {attempts} attempts ({} found)",
                    ports.len()
                );
            }
            attempts += 1;

            let listener =
                TcpListener::bind("127.0.0.1:0").context("Failed to bind an ephemeral port")?;
            let port = listener
                .local_addr()
                .context("Failed to read local address of ephemeral listener")?
                .port();

            if !self.issued.contains(&port) {
                ports.push(port);
            }
            held.push(listener);
        }

        self.issued.extend(ports.iter().copied());
        log::debug!("Allocated ports {ports:?}");
        Ok(ports)
    }

    /// Allocates a fresh control/data plane pair for one flow.
    pub fn allocate_pair(&mut self) -> Result<PortPair> {
        let ports = self.free_ports(2)?;
        Ok(PortPair {
            grpc: ports[0],
            http: ports[1],
        })
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    pub fn was_issued(&self, port: u16) -> bool {
        self.issued.contains(&port)
    }
}
