//! Bounded single-producer/single-consumer relay between fetching and writing.
//!
//! The relay holds at most `capacity` records. A producer pushing into a full
//! relay waits until the consumer takes one, which keeps memory bounded when
//! disk writes are slower than the network.
//!
//! Closing is tied to ownership: the relay closes when the `RelaySender` is
//! dropped or closed, so every producer exit path closes it exactly once.

use futures_util::stream::{self, Stream};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::record::Record;

/// Returned by `push` when the consumer side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("relay receiver dropped")]
pub struct RelayClosed;

/// Creates a relay holding at most `capacity` records (minimum 1).
pub fn channel(capacity: usize) -> (RelaySender, RelayReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (
        RelaySender { tx, pushed: 0 },
        RelayReceiver { rx },
    )
}

/// Producer half of the relay.
#[derive(Debug)]
pub struct RelaySender {
    tx: mpsc::Sender<Record>,
    pushed: u64,
}

impl RelaySender {
    /// Pushes one record, waiting while the relay is full.
    pub async fn push(&mut self, record: Record) -> Result<(), RelayClosed> {
        self.tx.send(record).await.map_err(|_| RelayClosed)?;
        self.pushed += 1;
        Ok(())
    }

    /// Records successfully pushed so far.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Signals that no more records will arrive. Records already in the
    /// relay remain available to the receiver.
    pub fn close(self) {
        drop(self);
    }
}

/// Consumer half of the relay.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<Record>,
}

impl RelayReceiver {
    /// Receives the next record, or `None` once the relay is closed and empty.
    pub async fn recv(&mut self) -> Option<Record> {
        self.rx.recv().await
    }

    /// Consumes the receiver into a finite stream of the remaining records.
    pub fn drain(self) -> impl Stream<Item = Record> {
        stream::unfold(self, |mut relay| async move {
            relay.recv().await.map(|record| (record, relay))
        })
    }
}
