//! Point-to-point byte transport between the parties of a computation.
//!
//! Every pair of parties shares one logical full-duplex channel carrying
//! length-prefixed byte messages; message order per channel is FIFO and is
//! the only ordering guarantee. Parties are identified by dense 1-based IDs
//! assigned before the computation starts. A party's channel to itself is a
//! local loopback queue that never touches the network.
//!
//! [`tcp::TcpNetwork`] is the production transport; [`local::LocalNetwork`]
//! wires all parties up in memory for tests and simulations. The free
//! functions [`send_to`] and [`recv_from`] layer serde/bincode message
//! (de)serialization over any [`Network`].

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub mod config;
pub mod local;
pub mod tcp;

/// Identifies one party of the computation; dense, 1-based.
pub type PartyId = usize;

/// Errors raised by the network transport.
#[derive(Debug, Error)]
pub enum Error {
    /// The party ID is outside `1..=parties`; rejected before any I/O.
    #[error("invalid party id {party}, expected 1..={parties}")]
    InvalidParty {
        /// The offending ID.
        party: PartyId,
        /// The number of parties in the computation.
        parties: usize,
    },
    /// The party list or own ID passed at construction is malformed.
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),
    /// Bootstrap did not establish all connections within the timeout.
    #[error("network bootstrap timed out")]
    BootstrapTimeout,
    /// A peer could not be reached within the retry budget.
    #[error("could not connect to party {party}")]
    Connect {
        /// The unreachable peer.
        party: PartyId,
        /// The underlying connection error.
        #[source]
        source: std::io::Error,
    },
    /// An accepted connection announced an ID that is unexpected here.
    #[error("handshake announced unexpected party id {0}")]
    Handshake(PartyId),
    /// An I/O error occurred while setting up the network.
    #[error("i/o error during bootstrap")]
    Io(#[from] std::io::Error),
    /// The channel to the peer has been shut down or its loop has died.
    #[error("channel to party {0} is closed")]
    Closed(PartyId),
    /// The payload does not fit into a length-prefixed frame.
    #[error("message of {0} bytes exceeds the maximum frame size")]
    MessageTooLarge(usize),
    /// A message could not be serialized before sending it out.
    #[error("could not serialize message while {phase}: {reason}")]
    Serialize {
        /// The protocol phase during which the error occurred.
        phase: String,
        /// The underlying serialization error.
        reason: String,
    },
    /// A received message could not be deserialized.
    #[error("could not deserialize message while {phase}: {reason}")]
    Deserialize {
        /// The protocol phase during which the error occurred.
        phase: String,
        /// The underlying deserialization error.
        reason: String,
    },
    /// A received vector does not have the expected number of elements.
    #[error("expected {expected} items while {phase}, received {actual}")]
    InvalidLength {
        /// The protocol phase during which the error occurred.
        phase: String,
        /// The expected element count.
        expected: usize,
        /// The received element count.
        actual: usize,
    },
}

/// A transport exchanging byte messages with every party of a computation.
///
/// `send` enqueues without blocking (outgoing queues are unbounded, so
/// backpressure is the caller's responsibility); `receive` waits for the
/// next message from the given peer. Sending to or receiving from one's own
/// ID uses the loopback queue.
pub trait Network: Send + Sync {
    /// The number of parties in the computation.
    fn parties(&self) -> usize;

    /// The ID of the local party.
    fn my_id(&self) -> PartyId;

    /// Enqueues `data` for delivery to `party`; never blocks.
    fn send(&self, party: PartyId, data: Vec<u8>) -> Result<(), Error>;

    /// Awaits the next message from `party`, in FIFO order per channel.
    fn receive(&self, party: PartyId) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Gracefully shuts the transport down; idempotent. Per-peer shutdown
    /// failures are logged, never propagated, so one unreachable peer cannot
    /// block releasing the others' resources.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Serializes `msg` and enqueues it for `party`.
pub fn send_to<N: Network>(
    net: &N,
    party: PartyId,
    phase: &str,
    msg: &impl Serialize,
) -> Result<(), Error> {
    let bytes = bincode::serialize(msg).map_err(|e| Error::Serialize {
        phase: phase.to_string(),
        reason: format!("{e:?}"),
    })?;
    net.send(party, bytes)
}

/// Awaits and deserializes the next message from `party`.
pub async fn recv_from<T: DeserializeOwned, N: Network>(
    net: &N,
    party: PartyId,
    phase: &str,
) -> Result<T, Error> {
    let bytes = net.receive(party).await?;
    bincode::deserialize(&bytes).map_err(|e| Error::Deserialize {
        phase: phase.to_string(),
        reason: format!("{e:?}"),
    })
}

/// Awaits a `Vec` from `party`, checking that it has exactly `len` elements.
pub async fn recv_vec_from<T: DeserializeOwned, N: Network>(
    net: &N,
    party: PartyId,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(net, party, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error::InvalidLength {
            phase: phase.to_string(),
            expected: len,
            actual: v.len(),
        })
    }
}

/// Validates a party ID against the number of parties.
pub(crate) fn check_party(party: PartyId, parties: usize) -> Result<(), Error> {
    if party == 0 || party > parties {
        Err(Error::InvalidParty { party, parties })
    } else {
        Ok(())
    }
}
