//! Envelope message definitions
//!
//! A reference `Protocol` whose messages are opaque envelopes: a case tag,
//! the status side channel and a raw payload. The payload schema belongs to
//! whoever builds the requests.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{CodecError, Protocol, MAX_MESSAGE_SIZE};

/// Variant tag shared by a request and the response it elicits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Case {
    CreateGame = 1,
    JoinGame = 2,
    RestartGame = 3,
    StartReplay = 4,
    LeaveGame = 5,
    QuickSave = 6,
    QuickLoad = 7,
    Quit = 8,
    GameInfo = 9,
    Observation = 10,
    Action = 11,
    ObsAction = 12,
    Step = 13,
    Data = 14,
    Query = 15,
    SaveReplay = 16,
    ReplayInfo = 17,
    AvailableMaps = 18,
    SaveMap = 19,
    MapCommand = 20,
    Ping = 21,
    Debug = 22,
}

impl Case {
    /// Whether the remote side may take a long time to answer this case
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Case::CreateGame
                | Case::JoinGame
                | Case::RestartGame
                | Case::StartReplay
                | Case::LeaveGame
                | Case::Quit
                | Case::Data
                | Case::SaveMap
        )
    }
}

/// Protocol status reported by the remote peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    Launched = 1,
    InitGame = 2,
    InGame = 3,
    InReplay = 4,
    Ended = 5,
    Quit = 6,
    #[default]
    Unknown = 99,
}

/// An outbound or inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Which variant this message is
    pub case: Case,
    /// Status side channel (meaningful on responses only)
    pub status: Status,
    /// Opaque payload owned by the message schema
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(case: Case, payload: impl Into<Bytes>) -> Self {
        Self {
            case,
            status: Status::Unknown,
            payload: payload.into(),
        }
    }

    /// A request without payload
    pub fn request(case: Case) -> Self {
        Self::new(case, Bytes::new())
    }

    /// A response carrying a status
    pub fn response(case: Case, status: Status, payload: impl Into<Bytes>) -> Self {
        Self {
            case,
            status,
            payload: payload.into(),
        }
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = bincode::serialize(self)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(bytes.len(), MAX_MESSAGE_SIZE));
        }
        Ok(bytes)
    }

    /// Parse from wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// `Protocol` implementation for [`Envelope`] messages
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeProtocol;

impl Protocol for EnvelopeProtocol {
    type Request = Envelope;
    type Response = Envelope;
    type Case = Case;
    type Status = Status;

    fn encode_request(request: &Envelope) -> Result<Vec<u8>, CodecError> {
        request.to_bytes()
    }

    fn decode_response(bytes: &[u8]) -> Result<Envelope, CodecError> {
        Envelope::from_bytes(bytes)
    }

    fn request_case(request: &Envelope) -> Case {
        request.case
    }

    fn response_case(response: &Envelope) -> Case {
        response.case
    }

    fn status(response: &Envelope) -> Status {
        response.status
    }
}
