//! Station client core: resilient metadata and feed acquisition, the
//! playback state machine and cast target resolution for one live stream.

pub mod cast;
pub mod error;
pub mod fallback;
pub mod feeds;
pub mod metadata;
pub mod playback;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{CastError, FetchError, PlaybackError};
pub use session::{SessionEvent, StationSession};
pub use state::StateManager;
