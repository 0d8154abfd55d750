//! Swarm coordination core: chunk bookkeeping, peer pairing, transfer verification and trust.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod chunk;
pub mod coordinator;
pub mod core;
pub mod file;
pub mod peer;
pub mod protocol;
pub mod scheduler;
pub mod status;
pub mod transfer;
pub mod trust;
pub mod wire;

pub use crate::core::{CoreConfig, OutboundAction, ProtocolError, SwarmCore};
pub use file::{hash_chunk, FileInfo, FileLookup, FileService, DEFAULT_CHUNK_SIZE};
pub use peer::ConnectionId;
pub use protocol::{ByteRange, Message, Method};
pub use scheduler::{GiverSelector, SchedulerConfig, UniformSelector};
pub use status::StatusSnapshot;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
