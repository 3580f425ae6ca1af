use tokio::sync::mpsc;

use crate::protocol::{NetronError, Packet, Result};

/// Sending half of a peer channel. Cloneable so the engine can hand writers
/// to dispatch tasks without serializing them through one lock.
#[derive(Clone)]
pub struct PacketSink {
    tx: mpsc::Sender<Packet>,
}

impl PacketSink {
    /// Queues a packet for delivery. Fails with `ConnectionLost` once the
    /// receiving half is gone.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| NetronError::ConnectionLost)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a peer channel. `None` from [`recv`](Self::recv) means
/// the other side closed; the engine treats that as an unexpected disconnect.
pub struct PacketStream {
    rx: mpsc::Receiver<Packet>,
}

impl PacketStream {
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Closes the receiving half, which surfaces as `ConnectionLost` to the
    /// other side's sink.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// One endpoint of a bidirectional packet channel.
pub struct PacketDuplex {
    pub sink: PacketSink,
    pub stream: PacketStream,
}

impl PacketDuplex {
    pub fn split(self) -> (PacketSink, PacketStream) {
        (self.sink, self.stream)
    }
}

/// Creates two connected in-memory endpoints, each seeing the other's sends.
///
/// This is the reference implementation of the channel contract, used by the
/// test suites and by local transports; network transports produce the same
/// shape by pumping decoded frames into an `mpsc` pair.
pub fn memory_pair(capacity: usize) -> (PacketDuplex, PacketDuplex) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        PacketDuplex {
            sink: PacketSink { tx: a_tx },
            stream: PacketStream { rx: b_rx },
        },
        PacketDuplex {
            sink: PacketSink { tx: b_tx },
            stream: PacketStream { rx: a_rx },
        },
    )
}
