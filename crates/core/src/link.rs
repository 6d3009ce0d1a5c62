//! Channel endpoints modelling one peer's link to the coordinator
//!
//! The link is the "reliable ordered bidirectional message channel" the
//! facade rides on. In-process use gets one from
//! [`SignalingEngine::open_local_link`](crate::engine::SignalingEngine::open_local_link);
//! a network transport builds one by pumping its socket into these halves.

use crate::protocol::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

/// Client-side endpoints of a peer↔coordinator channel
///
/// The outbound half is unbounded so one-way sends (`answer`,
/// `send_candidate`, `disconnect`) never suspend; the inbound half is
/// bounded and drained by the facade's reader task.
#[derive(Debug)]
pub struct ClientLink {
    /// Frames toward the coordinator
    pub tx: mpsc::UnboundedSender<ClientFrame>,

    /// Frames from the coordinator, in delivery order
    pub rx: mpsc::Receiver<ServerFrame>,
}
