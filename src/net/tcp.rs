//! TCP transport with one dedicated send and receive task per peer.
//!
//! Bootstrap follows an asymmetric rule that yields exactly one connection
//! per unordered pair without a central rendezvous: every party connects to
//! all parties with a *higher* ID (announcing itself with a single handshake
//! byte) and accepts connections from all parties with a *lower* ID. Both
//! halves run concurrently under one overall timeout; any failure aborts the
//! whole bootstrap, since a partial network is unusable.
//!
//! In steady state each peer link is served by two background tasks: the
//! send loop drains an unbounded outgoing queue and writes length-prefixed
//! frames, the receive loop reads frames and feeds an unbounded incoming
//! queue. A loop that dies takes its queue endpoint with it, so later
//! `send`/`receive` calls against that peer fail immediately instead of
//! blocking forever, and the other peers are unaffected.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::{try_join, try_join_all};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::config::{NetworkConfig, Party};
use super::{Error, Network, PartyId, check_party};

/// Delay before the first reconnection attempt during bootstrap.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Upper bound for the exponential backoff between connection attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_millis(3200);
/// Connection attempts per peer before bootstrap gives up.
const MAX_CONNECT_ATTEMPTS: u32 = 10;
/// How long `close` waits for each background loop to stop on its own
/// before cancelling it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Queues and background tasks serving one remote peer.
struct Link {
    /// Dropped on close to signal the send loop to flush and stop.
    outgoing: Mutex<Option<UnboundedSender<Vec<u8>>>>,
    incoming: AsyncMutex<UnboundedReceiver<Vec<u8>>>,
    send_task: Mutex<Option<JoinHandle<()>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    /// Fired on close to interrupt a receive loop blocked in a read.
    recv_stop: Mutex<Option<oneshot::Sender<()>>>,
}

/// A [`Network`] over one TCP connection per remote peer.
pub struct TcpNetwork {
    my_id: PartyId,
    parties: usize,
    /// Indexed by `party - 1`; the own slot stays `None` (loopback).
    links: Vec<Option<Link>>,
    loopback_send: UnboundedSender<Vec<u8>>,
    loopback_recv: AsyncMutex<UnboundedReceiver<Vec<u8>>>,
    closed: AtomicBool,
}

impl TcpNetwork {
    /// Establishes connections to all other parties and starts the per-peer
    /// send and receive loops.
    ///
    /// Fails if the configuration is malformed, if any connection cannot be
    /// established within the retry budget, or if the whole bootstrap does
    /// not finish within `config.timeout`.
    pub async fn connect(config: &NetworkConfig) -> Result<Self, Error> {
        config.validate()?;
        let streams = timeout(config.timeout, Self::establish(config))
            .await
            .map_err(|_| Error::BootstrapTimeout)??;

        let n = config.parties.len();
        let mut links: Vec<Option<Link>> = (0..n).map(|_| None).collect();
        for (peer, stream) in streams {
            let (reader, writer) = stream.into_split();
            let (out_tx, out_rx) = unbounded_channel();
            let (in_tx, in_rx) = unbounded_channel();
            let (stop_tx, stop_rx) = oneshot::channel();
            links[peer - 1] = Some(Link {
                outgoing: Mutex::new(Some(out_tx)),
                incoming: AsyncMutex::new(in_rx),
                send_task: Mutex::new(Some(tokio::spawn(send_loop(peer, out_rx, writer)))),
                recv_task: Mutex::new(Some(tokio::spawn(recv_loop(
                    peer, reader, in_tx, stop_rx,
                )))),
                recv_stop: Mutex::new(Some(stop_tx)),
            });
        }
        let (loopback_send, loopback_recv) = unbounded_channel();
        debug!(my_id = config.my_id, parties = n, "network established");
        Ok(Self {
            my_id: config.my_id,
            parties: n,
            links,
            loopback_send,
            loopback_recv: AsyncMutex::new(loopback_recv),
            closed: AtomicBool::new(false),
        })
    }

    /// Runs the client and server halves of the bootstrap concurrently and
    /// returns one stream per remote peer.
    async fn establish(config: &NetworkConfig) -> Result<Vec<(PartyId, TcpStream)>, Error> {
        let my_id = config.my_id;
        let lower_peers = my_id - 1;
        let listen_addr = config.party(my_id).addr();

        let accept_all = async move {
            let mut accepted = Vec::with_capacity(lower_peers);
            if lower_peers == 0 {
                return Ok(accepted);
            }
            let listener = TcpListener::bind(&listen_addr).await?;
            let mut seen = vec![false; lower_peers];
            while accepted.len() < lower_peers {
                let (mut stream, addr) = listener.accept().await?;
                let mut id = [0u8; 1];
                stream.read_exact(&mut id).await?;
                let peer = id[0] as PartyId;
                if peer == 0 || peer >= my_id || seen[peer - 1] {
                    return Err(Error::Handshake(peer));
                }
                seen[peer - 1] = true;
                stream.set_nodelay(true)?;
                debug!(peer, %addr, "accepted connection");
                accepted.push((peer, stream));
            }
            Ok::<_, Error>(accepted)
        };

        let connect_all = try_join_all(
            config
                .parties
                .iter()
                .filter(|p| p.id > my_id)
                .map(|p| Self::connect_to(my_id, p)),
        );

        let (mut streams, outbound) = try_join(accept_all, connect_all).await?;
        streams.extend(outbound);
        Ok(streams)
    }

    /// Connects to a peer with a higher ID, retrying with exponential
    /// backoff while its listener is not up yet, then announces the own
    /// party ID as a single handshake byte.
    async fn connect_to(my_id: PartyId, peer: &Party) -> Result<(PartyId, TcpStream), Error> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        let mut stream = loop {
            match TcpStream::connect(peer.addr()).await {
                Ok(stream) => break stream,
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused
                    && attempt < MAX_CONNECT_ATTEMPTS =>
                {
                    debug!(peer = peer.id, attempt, ?delay, "connection refused, retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(Error::Connect {
                        party: peer.id,
                        source,
                    });
                }
            }
        };
        stream.set_nodelay(true)?;
        stream.write_all(&[my_id as u8]).await?;
        debug!(peer = peer.id, "connected");
        Ok((peer.id, stream))
    }

    fn link(&self, party: PartyId) -> Result<&Link, Error> {
        self.links[party - 1].as_ref().ok_or(Error::Closed(party))
    }
}

impl Network for TcpNetwork {
    fn parties(&self) -> usize {
        self.parties
    }

    fn my_id(&self) -> PartyId {
        self.my_id
    }

    fn send(&self, party: PartyId, data: Vec<u8>) -> Result<(), Error> {
        check_party(party, self.parties)?;
        if data.len() > u32::MAX as usize {
            return Err(Error::MessageTooLarge(data.len()));
        }
        if party == self.my_id {
            return self
                .loopback_send
                .send(data)
                .map_err(|_| Error::Closed(party));
        }
        let link = self.link(party)?;
        let outgoing = link.outgoing.lock().expect("lock poisoned");
        match outgoing.as_ref() {
            Some(queue) => queue.send(data).map_err(|_| Error::Closed(party)),
            None => Err(Error::Closed(party)),
        }
    }

    async fn receive(&self, party: PartyId) -> Result<Vec<u8>, Error> {
        check_party(party, self.parties)?;
        if party == self.my_id {
            let mut loopback = self.loopback_recv.lock().await;
            return loopback.recv().await.ok_or(Error::Closed(party));
        }
        let link = self.link(party)?;
        let mut incoming = link.incoming.lock().await;
        incoming.recv().await.ok_or(Error::Closed(party))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(my_id = self.my_id, "closing network");
        for (slot, link) in self.links.iter().enumerate() {
            let Some(link) = link else { continue };
            let peer = slot + 1;
            // Dropping the sender wakes the send loop, which flushes any
            // queued payloads, half-closes the write side and exits.
            drop(link.outgoing.lock().expect("lock poisoned").take());
            let send_task = link.send_task.lock().expect("lock poisoned").take();
            if let Some(mut task) = send_task {
                match timeout(SHUTDOWN_GRACE, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(peer, "send loop terminated abnormally: {e}"),
                    Err(_) => {
                        warn!(peer, "send loop did not stop in time, cancelling it");
                        task.abort();
                    }
                }
            }
            // Interrupt the receive loop even if the peer never half-closes
            // its write side.
            if let Some(stop) = link.recv_stop.lock().expect("lock poisoned").take() {
                let _ = stop.send(());
            }
            let recv_task = link.recv_task.lock().expect("lock poisoned").take();
            if let Some(mut task) = recv_task {
                match timeout(SHUTDOWN_GRACE, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(peer, "receive loop terminated abnormally: {e}"),
                    Err(_) => {
                        debug!(peer, "receive loop still blocked, cancelling it");
                        task.abort();
                    }
                }
            }
        }
    }
}

/// Writes queued payloads as length-prefixed frames until the queue is
/// closed, then flushes and half-closes the write side.
async fn send_loop(peer: PartyId, mut queue: UnboundedReceiver<Vec<u8>>, mut writer: OwnedWriteHalf) {
    while let Some(payload) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!(peer, "stopping send loop after write error: {e}");
            queue.close();
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(peer, "could not shut down write half: {e}");
    }
}

/// Reads length-prefixed frames and forwards the payloads until the peer
/// closes the connection, the consumer goes away or `stop` fires.
async fn recv_loop(
    peer: PartyId,
    mut reader: OwnedReadHalf,
    queue: UnboundedSender<Vec<u8>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            _ = &mut stop => {
                debug!(peer, "receive loop stopped");
                return;
            }
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(payload) => {
                if queue.send(payload).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer, "peer closed the connection");
                return;
            }
            Err(e) => {
                warn!(peer, "stopping receive loop after read error: {e}");
                return;
            }
        }
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let mut payload = vec![0u8; payload_length(header)];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame(writer: &mut OwnedWriteHalf, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&length_header(payload)).await?;
    writer.write_all(payload).await
}

/// The 4-byte big-endian length prefix for a payload. Callers must have
/// checked that the payload fits into a `u32`.
fn length_header(payload: &[u8]) -> [u8; 4] {
    (payload.len() as u32).to_be_bytes()
}

fn payload_length(header: [u8; 4]) -> usize {
    u32::from_be_bytes(header) as usize
}
