//! Server-pushed workspace events: framing, classification and subscription.

pub mod classify;
pub mod frame;
pub mod stream;

pub use classify::{classify, ArtifactKind, Event};
pub use frame::{Frame, FrameCodec};
pub use stream::EventSubscription;
