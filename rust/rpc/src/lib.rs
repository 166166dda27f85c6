//! C4: RPC Transport.
//!
//! A session is a reliable, ordered byte channel to one device. Every
//! message is `(u16 kind, u32 length, payload)`, little-endian
//! (spec.md §6). The session supports send-and-receive (mutex-guarded,
//! one in-flight request), fast bulk (a secondary data channel used
//! only by `INDEX_IVF_FAST_GET_LIST_CODES`), and an integrity probe.
//!
//! Grounded on `original_source/ascendfaiss/ascend/rpc/AscendRpc.cpp`
//! and `AscendRpcIndexIVF.cpp` for the kind catalogue and framing
//! shape; the mutex-guarded single-client-per-session pattern mirrors
//! how chroma wraps its storage/memberlist clients.

pub mod kind;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod wire;

pub use kind::RpcKind;
pub use protocol::*;
pub use session::Session;
pub use transport::{ChannelTransport, Frame, Transport};
