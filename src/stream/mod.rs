//! Streaming mode: reassembly of the event-stream body and the per-request
//! session controller that drives it.

pub mod assembler;
pub mod session;

pub use assembler::FragmentAssembler;
pub use session::{
    CollectingObserver, SessionState, SessionSummary, StreamObserver, StreamSession,
};
