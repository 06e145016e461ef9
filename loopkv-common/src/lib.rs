// loopkv-common - Wire protocol pieces shared by the LoopKV client runtime
//
// RESP2 request encoding, incremental reply decoding and pre-formatted
// request buffers.

pub mod error;
pub mod format;
pub mod resp;

// Re-export for convenience
pub use error::*;
pub use format::*;
pub use resp::*;
