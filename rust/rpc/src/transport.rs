//! `Transport`: a reliable, ordered byte channel carrying framed
//! messages. The only implementation today is an in-process duplex
//! built on `crossbeam-channel`, standing in for the PCIe/gRPC
//! transport a real device would use (spec.md §4.4 calls this the
//! "software reference device").

use crate::kind::RpcKind;
use crossbeam_channel::{Receiver, Sender};
use ivf_error::EngineError;

pub struct Frame {
    pub kind: RpcKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: RpcKind, payload: Vec<u8>) -> Self {
        Frame { kind, payload }
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, frame: Frame) -> Result<(), EngineError>;
    fn recv(&self) -> Result<Frame, EngineError>;
}

/// Two `ChannelTransport`s wired crossed, so the host end's sends are
/// the device end's receives and vice versa.
pub struct ChannelTransport {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (host_tx, device_rx) = crossbeam_channel::unbounded();
        let (device_tx, host_rx) = crossbeam_channel::unbounded();
        (
            ChannelTransport {
                tx: host_tx,
                rx: host_rx,
            },
            ChannelTransport {
                tx: device_tx,
                rx: device_rx,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Frame) -> Result<(), EngineError> {
        self.tx
            .send(frame)
            .map_err(|e| EngineError::TransportFailure(e.to_string()))
    }

    fn recv(&self) -> Result<Frame, EngineError> {
        self.rx
            .recv()
            .map_err(|e| EngineError::TransportFailure(e.to_string()))
    }
}
