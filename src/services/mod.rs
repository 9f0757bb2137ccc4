//! Renderer services and their published state

pub mod radio;
pub mod receiver;
mod relay;
pub mod state;
pub mod volume;

pub use radio::{RadioError, RadioService};
pub use receiver::{ReceiverError, ReceiverSession, ReceiverSettings, TransportState};
pub use state::{NotificationSink, StateMap, StatePublisher, StatefulService};
pub use volume::{VolumeError, VolumeService};
