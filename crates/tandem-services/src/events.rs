//! Events a client session reports to whatever is presenting it.

use serde::Serialize;

use crate::file_transfer::ReceiveOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    PeerJoined {
        name: String,
    },
    /// Only seen when the relay announces departures.
    PeerLeft {
        name: String,
    },
    ChatReceived {
        sender: String,
        text: String,
    },
    FileStarted {
        name: String,
        size: u64,
        sender: String,
    },
    FileProgress {
        name: String,
        received: u64,
        total: u64,
    },
    FileCompleted {
        name: String,
        saved_location: String,
    },
    /// A peer's own account of how far its upload has got. Advisory.
    RemoteProgress {
        sender: String,
        received: u64,
        total: u64,
    },
    /// Local progress of an outgoing file.
    SendProgress {
        name: String,
        sent: u64,
        total: u64,
    },
    FileSent {
        name: String,
        size: u64,
    },
    /// Something worth telling the user that does not end the session.
    Notice {
        message: String,
    },
    Disconnected,
}

impl From<ReceiveOutcome> for ClientEvent {
    fn from(outcome: ReceiveOutcome) -> Self {
        match outcome {
            ReceiveOutcome::Started {
                file_name,
                total_size,
                sender,
            } => ClientEvent::FileStarted {
                name: file_name,
                size: total_size,
                sender,
            },
            ReceiveOutcome::Progress {
                file_name,
                received,
                total,
            } => ClientEvent::FileProgress {
                name: file_name,
                received,
                total,
            },
            ReceiveOutcome::Completed {
                file_name,
                saved_location,
                ..
            } => ClientEvent::FileCompleted {
                name: file_name,
                saved_location,
            },
            ReceiveOutcome::Discarded { file_name, reason } => ClientEvent::Notice {
                message: format!("discarded chunk of {file_name}: {reason}"),
            },
            ReceiveOutcome::SinkFailed { file_name, error } => ClientEvent::Notice {
                message: format!("cannot save {file_name}: {error}"),
            },
        }
    }
}
