//! Address book and validation for the fixed set of parties.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, PartyId};

/// Network address of a single party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    /// The party's dense, 1-based ID.
    pub id: PartyId,
    /// Hostname or IP address the party listens on.
    pub host: String,
    /// Port the party listens on.
    pub port: u16,
}

impl Party {
    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for bootstrapping a [`tcp::TcpNetwork`](super::tcp::TcpNetwork).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The ID of the local party.
    pub my_id: PartyId,
    /// All parties of the computation, including the local one.
    pub parties: Vec<Party>,
    /// Overall deadline for establishing all connections.
    pub timeout: Duration,
}

impl NetworkConfig {
    /// A configuration where all parties run on `127.0.0.1`, with IDs
    /// `1..=ports.len()` assigned in port order. Mostly useful for tests and
    /// local simulations.
    pub fn localhost(my_id: PartyId, ports: &[u16]) -> Self {
        let parties = ports
            .iter()
            .enumerate()
            .map(|(i, &port)| Party {
                id: i + 1,
                host: "127.0.0.1".to_string(),
                port,
            })
            .collect();
        Self {
            my_id,
            parties,
            timeout: Duration::from_secs(10),
        }
    }

    /// Checks that the party list is dense (IDs exactly `1..=n`, no
    /// duplicates), contains the local party, and is small enough for the
    /// one-byte handshake.
    pub fn validate(&self) -> Result<(), Error> {
        let n = self.parties.len();
        if n == 0 {
            return Err(Error::InvalidConfig("empty party list".to_string()));
        }
        if n > u8::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "{n} parties, but the handshake identifies parties in one byte (max {})",
                u8::MAX
            )));
        }
        let mut seen = vec![false; n];
        for party in &self.parties {
            if party.id == 0 || party.id > n {
                return Err(Error::InvalidConfig(format!(
                    "party id {} outside the dense range 1..={n}",
                    party.id
                )));
            }
            if seen[party.id - 1] {
                return Err(Error::InvalidConfig(format!(
                    "duplicate party id {}",
                    party.id
                )));
            }
            seen[party.id - 1] = true;
        }
        if self.my_id == 0 || self.my_id > n {
            return Err(Error::InvalidConfig(format!(
                "own id {} is not in the party list",
                self.my_id
            )));
        }
        Ok(())
    }

    /// The entry for the given party ID. Only call with validated IDs.
    pub(crate) fn party(&self, id: PartyId) -> &Party {
        self.parties
            .iter()
            .find(|p| p.id == id)
            .expect("validated config contains every id")
    }
}
