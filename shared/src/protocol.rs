//! Packet kind ids, input/equip flag bits and websocket close codes.
//!
//! Ids are the single leading byte of every payload; there is no version
//! negotiation. New kinds append, existing ids never change meaning.

/// Client-bound packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientBound {
    Pong = 0,
    RemoveEntity = 1,
    Init = 2,
    Spawn = 3,
    MeetEntities = 4,
    Update = 5,
    Chat = 6,
    UpdateResources = 7,
}

/// Server-bound packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerBound {
    Ping = 0,
    Spawn = 1,
    Input = 2,
    Chat = 3,
    Equip = 4,
}

impl ServerBound {
    /// Maps a leading type byte to a kind; `None` is a protocol violation.
    pub fn from_u8(v: u8) -> Option<ServerBound> {
        match v {
            0 => Some(ServerBound::Ping),
            1 => Some(ServerBound::Spawn),
            2 => Some(ServerBound::Input),
            3 => Some(ServerBound::Chat),
            4 => Some(ServerBound::Equip),
            _ => None,
        }
    }
}

// Input packet flag bits.
pub const INPUT_ROTATE: u8 = 0b1;
pub const INPUT_MOVE: u8 = 0b10;
pub const INPUT_STOP: u8 = 0b100;
pub const INPUT_SECONDARY: u8 = 0b1000;
pub const INPUT_PRIMARY: u8 = 0b10000;

// Equip packet flag bits.
pub const EQUIP_ITEM: u8 = 0b1;
pub const EQUIP_HAT: u8 = 0b10;
pub const EQUIP_TAIL: u8 = 0b100;

/// Sentinel wire id meaning "no item".
pub const ITEM_NONE: u8 = 255;

/// Why the server closed a connection. Each maps to a distinct close code in
/// the private websocket range so clients can tell the cases apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Well-formed transport frame with nonsensical content (unknown packet
    /// kind, text frame, over-long name).
    BadRequest,
    /// Payload could not be decoded (truncated, bad UTF-8, oversized text).
    ReadFail,
    /// No player slot or entity id available.
    ServerFull,
    /// Frame violated transport-level limits (oversized payload).
    ProtocolError,
}

impl DisconnectReason {
    pub fn close_code(self) -> u16 {
        match self {
            DisconnectReason::BadRequest => 4000,
            DisconnectReason::ReadFail => 4001,
            DisconnectReason::ServerFull => 4002,
            DisconnectReason::ProtocolError => 4003,
        }
    }
}

impl From<crate::codec::ReadError> for DisconnectReason {
    fn from(_: crate::codec::ReadError) -> Self {
        DisconnectReason::ReadFail
    }
}
