//! C2/C3/C5/C6: the device side of the engine — flag/size channels,
//! operator dispatch, the inverted-list store, and the distance +
//! top-K search engine — plus [`device::Device`], the software
//! reference server that answers the wire protocol from `ivf-rpc`
//! using all four beneath it.

pub mod device;
pub mod dispatch;
pub mod flags;
pub mod search;
pub mod store;

pub use device::Device;
