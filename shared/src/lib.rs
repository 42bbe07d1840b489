//! Protocol layer shared between the authoritative server and any client:
//! world tuning constants, the fixed-layout binary codec, packet kind ids
//! and websocket close codes.

pub mod codec;
pub mod protocol;

pub use codec::{decode_angle, encode_angle, ReadError, Reader, StaticBuffer, Writer};
pub use protocol::{ClientBound, DisconnectReason, ServerBound};

pub const MAX_PLAYERS: usize = 50;
pub const MAX_NAME_LEN: usize = 16;
pub const MAX_CHAT_LEN: usize = 32;
pub const CHAT_COOLDOWN_MS: u64 = 500;
pub const MAX_PAYLOAD_LEN: usize = 64;

pub const MAP_SIZE: f32 = 14400.0;
pub const HALF_MAP: f32 = MAP_SIZE / 2.0;
/// Largest collision radius any body may have; pads the spatial index bounds
/// so no body can ever fall outside the root node.
pub const MAX_ENTITY_SIZE: f32 = 1000.0;

pub const MAX_QUAD_DEPTH: u8 = 5;
pub const QUAD_LEAF_CAPACITY: usize = 4;

/// Per-millisecond exponential velocity damping base.
pub const FRICTION: f32 = 0.993;
pub const COLLISION_STRENGTH: f32 = 1.1;
/// Converts movement intent into velocity per elapsed millisecond.
pub const VELOCITY_SCALE: f32 = 1.0 / 350.0;
/// Restoring acceleration per unit of boundary penetration.
pub const BOUND_FORCE: f32 = 0.01;
pub const KNOCKBACK_SCALE: f32 = 100.0 * VELOCITY_SCALE;

pub const VIEWPORT_WIDTH: f32 = 1920.0;
pub const VIEWPORT_HEIGHT: f32 = 1080.0;
pub const VIEWPORT_OVERSCAN: f32 = 100.0;

pub const SKIN_COLORS: [u32; 5] = [0xff6961, 0xa7c7e7, 0x77dd77, 0xfaf8f6, 0x836953];
