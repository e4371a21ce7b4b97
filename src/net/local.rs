//! An in-memory network wiring all parties up inside one process.
//!
//! Useful for tests and simulations: the full [`Network`] contract (FIFO per
//! channel, loopback, validation) without sockets or framing.

use std::sync::Mutex;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::{Error, Network, PartyId, check_party};

/// A [`Network`] backed by in-memory queues instead of sockets.
pub struct LocalNetwork {
    my_id: PartyId,
    parties: usize,
    /// `senders[p - 1]` carries messages to party `p`; the own slot is the
    /// loopback queue. Slots are taken on close.
    senders: Vec<Mutex<Option<UnboundedSender<Vec<u8>>>>>,
    /// `receivers[p - 1]` yields messages from party `p`.
    receivers: Vec<AsyncMutex<UnboundedReceiver<Vec<u8>>>>,
}

impl LocalNetwork {
    /// Creates the fully wired networks for `parties` parties; the network
    /// at index `i` belongs to party `i + 1`.
    pub fn channels(parties: usize) -> Vec<Self> {
        let mut senders: Vec<Vec<Option<UnboundedSender<Vec<u8>>>>> =
            (0..parties).map(|_| (0..parties).map(|_| None).collect()).collect();
        let mut receivers: Vec<Vec<Option<UnboundedReceiver<Vec<u8>>>>> =
            (0..parties).map(|_| (0..parties).map(|_| None).collect()).collect();
        for from in 0..parties {
            for to in 0..parties {
                let (tx, rx) = unbounded_channel();
                senders[from][to] = Some(tx);
                receivers[to][from] = Some(rx);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(i, (senders, receivers))| LocalNetwork {
                my_id: i + 1,
                parties,
                senders: senders.into_iter().map(Mutex::new).collect(),
                receivers: receivers
                    .into_iter()
                    .map(|rx| AsyncMutex::new(rx.expect("fully wired mesh")))
                    .collect(),
            })
            .collect()
    }
}

impl Network for LocalNetwork {
    fn parties(&self) -> usize {
        self.parties
    }

    fn my_id(&self) -> PartyId {
        self.my_id
    }

    fn send(&self, party: PartyId, data: Vec<u8>) -> Result<(), Error> {
        check_party(party, self.parties)?;
        let sender = self.senders[party - 1].lock().expect("lock poisoned");
        match sender.as_ref() {
            Some(queue) => queue.send(data).map_err(|_| Error::Closed(party)),
            None => Err(Error::Closed(party)),
        }
    }

    async fn receive(&self, party: PartyId) -> Result<Vec<u8>, Error> {
        check_party(party, self.parties)?;
        let mut receiver = self.receivers[party - 1].lock().await;
        receiver.recv().await.ok_or(Error::Closed(party))
    }

    async fn close(&self) {
        for sender in &self.senders {
            drop(sender.lock().expect("lock poisoned").take());
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::*;

    proptest! {
        /// Messages on a fixed channel arrive exactly in send order.
        #[test]
        fn fifo_per_channel(payloads in vec(vec(any::<u8>(), 0..64), 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            rt.block_on(async {
                let mut nets = LocalNetwork::channels(2);
                let second = nets.pop().expect("two networks");
                let first = nets.pop().expect("two networks");
                for payload in &payloads {
                    first.send(2, payload.clone()).expect("send");
                }
                for payload in &payloads {
                    prop_assert_eq!(&second.receive(1).await.expect("receive"), payload);
                }
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn loopback_stays_local() {
        let nets = LocalNetwork::channels(3);
        let net = &nets[1];
        net.send(2, b"to myself".to_vec()).expect("send");
        assert_eq!(net.receive(2).await.expect("receive"), b"to myself");
    }

    #[tokio::test]
    async fn close_makes_sends_fail() {
        let nets = LocalNetwork::channels(2);
        nets[0].close().await;
        nets[0].close().await;
        assert!(matches!(
            nets[0].send(2, vec![1]),
            Err(Error::Closed(2))
        ));
    }
}
