//! `Session`: the client side of a [`crate::Transport`]. Enforces
//! spec.md §4.4's "at most one in-flight request per session" rule by
//! holding the transport behind a mutex for the duration of a
//! send-and-receive.

use crate::kind::RpcKind;
use crate::protocol::{IntegrityProbeRequest, IntegrityProbeResponse};
use crate::transport::{Frame, Transport};
use crate::wire::{Reader, Writer};
use ivf_error::EngineError;
use parking_lot::Mutex;

pub struct Session {
    transport: Mutex<Box<dyn Transport>>,
}

impl Session {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Session {
            transport: Mutex::new(transport),
        }
    }

    /// Send `kind` with `payload`, wait for the paired reply, and hand
    /// back its raw bytes for the caller to decode with the matching
    /// response type. Held behind the session mutex end to end so a
    /// second caller's request cannot interleave with this reply.
    pub fn send_and_receive(&self, kind: RpcKind, payload: Vec<u8>) -> Result<Vec<u8>, EngineError> {
        let transport = self.transport.lock();
        transport.send(Frame::new(kind, payload))?;
        let reply = transport.recv()?;
        if reply.kind != RpcKind::Reply {
            return Err(EngineError::TransportFailure(format!(
                "expected a reply frame, got {:?}",
                reply.kind
            )));
        }
        Ok(reply.payload)
    }

    /// Consume a `IndexIvfFastGetListCodes` stream: keeps pulling reply
    /// frames until one is marked last, without re-sending the request
    /// mutex between chunks.
    pub fn send_and_receive_stream(
        &self,
        kind: RpcKind,
        payload: Vec<u8>,
        mut on_chunk: impl FnMut(Vec<u8>) -> Result<bool, EngineError>,
    ) -> Result<(), EngineError> {
        let transport = self.transport.lock();
        transport.send(Frame::new(kind, payload))?;
        loop {
            let reply = transport.recv()?;
            if reply.kind != RpcKind::Reply {
                return Err(EngineError::TransportFailure(format!(
                    "expected a reply frame, got {:?}",
                    reply.kind
                )));
            }
            let is_last = on_chunk(reply.payload)?;
            if is_last {
                return Ok(());
            }
        }
    }

    /// Round-trip an arbitrary payload through the peer and verify its
    /// checksum, exercising `TestDataIntegrity` (spec.md §6).
    pub fn integrity_probe(&self, payload: Vec<u8>) -> Result<(), EngineError> {
        let expected = crc32fast::hash(&payload);
        let mut w = Writer::new();
        IntegrityProbeRequest { payload }.encode(&mut w);
        let reply = self.send_and_receive(RpcKind::TestDataIntegrity, w.into_bytes())?;
        let mut r = Reader::new(&reply);
        let resp = IntegrityProbeResponse::decode(&mut r)?;
        if resp.checksum != expected || crc32fast::hash(&resp.echoed) != expected {
            return Err(EngineError::TransportFailure(
                "integrity probe checksum mismatch".into(),
            ));
        }
        Ok(())
    }
}
