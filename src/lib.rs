//! Composition and networking engine for secret-sharing based secure
//! multi-party computation (MPC).
//!
//! Multiple mutually distrusting parties jointly evaluate a function over
//! secret-shared inputs without revealing them. This crate provides the two
//! layers every such protocol suite is built on:
//!
//! * a **composition engine** that turns a declarative description of a
//!   secure computation into a lazily evaluated tree of atomic protocol
//!   steps with explicit sequential, parallel and looping structure and
//!   deferred results, and
//! * a **network transport** that reliably frames, orders and delivers the
//!   byte messages those steps exchange, including connection bootstrap and
//!   graceful shutdown under concurrent senders and receivers.
//!
//! The concrete cryptographic protocols (SPDZ-style arithmetic, boolean
//! gates, preprocessing) live outside this crate: they implement
//! [`step::Step`] and talk to their peers through [`net::Network`].
//!
//! # Main Components
//!
//! * [`builder`]: [`builder::ProtocolBuilder`] and the chainable
//!   [`builder::BuildStep`], which application code drives to describe a
//!   computation.
//! * [`producer`]: the [`producer::Producer`] tree the builder emits,
//!   harvested in batches by a round-based evaluator (the "round pump",
//!   external to this crate; its contract is documented on [`producer`]).
//! * [`value`]: [`value::Deferred`] result cells connecting steps to their
//!   consumers.
//! * [`step`]: the [`step::Step`] trait and batching types at the boundary
//!   to the protocol suites.
//! * [`net`]: the [`net::Network`] trait, the TCP transport
//!   ([`net::tcp::TcpNetwork`]), an in-memory variant
//!   ([`net::local::LocalNetwork`]) and serde-based message helpers.
//!
//! # Example
//!
//! ```ignore
//! use rondo::{builder::ProtocolBuilder, net::{config::NetworkConfig, tcp::TcpNetwork, Network}};
//!
//! # async fn example(suite: MySuite) -> Result<(), Box<dyn std::error::Error>> {
//! let network = TcpNetwork::connect(&NetworkConfig::localhost(1, &[9001, 9002])).await?;
//!
//! let mut builder = ProtocolBuilder::sequential(suite);
//! let result = builder
//!     .seq(|b| b.factory().share_input(b, 42))
//!     .while_loop(|v| !v.converged(), |v, b| b.factory().refine(b, v))
//!     .seq(|v, b| b.factory().open(b, v));
//! let out = result.out();
//! let root = builder.build();
//!
//! // Hand `root` to the round pump; once it reports exhaustion:
//! println!("result: {:?}", out.out());
//! network.close().await;
//! # Ok(())
//! # }
//! ```
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod builder;
pub mod net;
pub mod producer;
pub mod step;
pub mod value;
