//! Market data: stream interface, frames, the ingestor, synthetic fallback.

pub mod frames;
pub mod ingestor;
pub mod stream;
pub mod synthetic;

pub use frames::{FrameKind, MidUpdate, RawFrame};
pub use ingestor::{Ingestor, IngestorStats};
pub use stream::{MarketConnection, MarketStream, StreamError};
pub use synthetic::SyntheticWalk;
