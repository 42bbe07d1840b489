//! Authoritative entity records.
//!
//! One flat `Entity` record carries everything the physics and broadcast
//! paths touch; per-kind extras hang off it as optional components (a
//! `Loadout` for anything that owns resources and items, `Cosmetics` for
//! players) so collision code operates uniformly on the base record. Each
//! entity pre-serializes its identity ("meet") and per-tick ("update") wire
//! records into fixed-offset buffers that are patched in place when a source
//! field changes.

use std::collections::HashMap;

use shared::codec::StaticBuffer;
use shared::KNOCKBACK_SCALE;

use crate::items::{self, ItemKind};

pub type EntityId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    Base = 0,
    Player = 1,
}

/// Cosmetic slots replicated in the player meet/update records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cosmetics {
    pub skin: u8,
    pub hat: u8,
    pub tail: u8,
}

/// Resource wallet, inventory and held-action state for entities that can
/// use items. Cooldown state is per holder, keyed by item kind; the
/// inventory is re-cloned from the kind's template on every spawn.
#[derive(Debug, Clone)]
pub struct Loadout {
    pub wood: u16,
    pub stone: u16,
    pub food: u16,
    pub gold: u16,
    pub kills: u16,
    pub items: Vec<ItemKind>,
    pub held: ItemKind,
    pub cooldowns: HashMap<ItemKind, f32>,
    pub use_primary: bool,
    pub keep_primary: bool,
    pub use_secondary: bool,
    pub keep_secondary: bool,
}

impl Loadout {
    /// `None` for kinds whose item template is empty.
    pub fn new(kind: EntityKind) -> Option<Loadout> {
        let template = items::starting_items(kind);
        let held = *template.first()?;
        Some(Loadout {
            wood: 0,
            stone: 0,
            food: 0,
            gold: 0,
            kills: 0,
            items: template.to_vec(),
            held,
            cooldowns: HashMap::new(),
            use_primary: false,
            keep_primary: false,
            use_secondary: false,
            keep_secondary: false,
        })
    }

    /// Full reset applied on every spawn, not on construction.
    pub fn reset(&mut self, kind: EntityKind) {
        let template = items::starting_items(kind);
        self.items = template.to_vec();
        if let Some(&first) = template.first() {
            self.held = first;
        }
        self.cooldowns.clear();
        self.use_primary = false;
        self.keep_primary = false;
        self.use_secondary = false;
        self.keep_secondary = false;
        self.kills = 0;
        self.wood = 0;
        self.stone = 0;
        self.food = 100;
        self.gold = 0;
    }
}

// Update record layout: id u16, kind u8, x f32, y f32, rot angle, hp f32,
// then held/hat/tail u8 for players.
const UPDATE_X_AT: usize = 3;
const UPDATE_Y_AT: usize = 7;
const UPDATE_ROT_AT: usize = 11;
const UPDATE_HP_AT: usize = 12;
const UPDATE_GEAR_AT: usize = 16;
const UPDATE_BASE_LEN: usize = 16;
const UPDATE_PLAYER_LEN: usize = 19;

#[derive(Debug, Clone)]
pub struct Entity {
    /// Assigned by the world on insertion; unique among live entities.
    pub id: EntityId,
    pub kind: EntityKind,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub x_vel: f32,
    pub y_vel: f32,
    /// Movement intent set by input, consumed by integration every tick.
    pub x_delta: f32,
    pub y_delta: f32,
    pub rot: f32,
    pub speed: f32,
    /// Collision radius.
    pub size: f32,
    pub hp: f32,
    pub max_hp: f32,
    pub dmg_mult: f32,
    pub is_static: bool,
    /// Velocity retained by a dynamic body colliding with this one when
    /// this is the static side.
    pub friction: f32,
    /// Owned by the world; false means pending removal.
    pub active: bool,
    pub alive: bool,
    /// Edge detector for a just-died transition, cleared after the removal
    /// broadcast.
    pub was_alive: bool,
    /// Connection slot of the owning controller, if any.
    pub controller: Option<u8>,
    pub loadout: Option<Loadout>,
    pub cosmetics: Option<Cosmetics>,
    meet_buf: StaticBuffer,
    update_buf: StaticBuffer,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Entity {
        let mut entity = Entity {
            id: 0,
            kind,
            name: name.into(),
            x: 0.0,
            y: 0.0,
            x_vel: 0.0,
            y_vel: 0.0,
            x_delta: 0.0,
            y_delta: 0.0,
            rot: 0.0,
            speed: 1.0,
            size: 35.0,
            hp: 100.0,
            max_hp: 100.0,
            dmg_mult: 1.0,
            is_static: false,
            friction: 0.75,
            active: true,
            alive: false,
            was_alive: false,
            controller: None,
            loadout: Loadout::new(kind),
            cosmetics: None,
            meet_buf: StaticBuffer::new(0),
            update_buf: StaticBuffer::new(0),
        };
        if kind == EntityKind::Player {
            entity.cosmetics = Some(Cosmetics::default());
        }
        entity.rebuild_buffers();
        entity
    }

    pub fn player(name: impl Into<String>) -> Entity {
        Entity::new(EntityKind::Player, name)
    }

    /// Re-encodes both wire records from scratch. Called after id
    /// assignment and on spawn, when identity fields may have changed.
    pub fn rebuild_buffers(&mut self) {
        self.encode_meet();
        self.encode_update();
    }

    fn encode_meet(&mut self) {
        let mut buf;
        match self.cosmetics {
            Some(c) => {
                // id, kind, size, skin, max hp, name
                buf = StaticBuffer::new(2 + 1 + 1 + 1 + 4 + 2 + self.name.len());
                buf.set_u16(0, self.id)
                    .set_u8(2, self.kind as u8)
                    .set_u8(3, self.size as u8)
                    .set_u8(4, c.skin)
                    .set_f32(5, self.max_hp)
                    .set_text(9, &self.name);
            }
            None => {
                // id, kind, size, max hp, name
                buf = StaticBuffer::new(2 + 1 + 1 + 4 + 2 + self.name.len());
                buf.set_u16(0, self.id)
                    .set_u8(2, self.kind as u8)
                    .set_u8(3, self.size as u8)
                    .set_f32(4, self.max_hp)
                    .set_text(8, &self.name);
            }
        }
        self.meet_buf = buf;
    }

    fn encode_update(&mut self) {
        let len = if self.cosmetics.is_some() {
            UPDATE_PLAYER_LEN
        } else {
            UPDATE_BASE_LEN
        };
        let mut buf = StaticBuffer::new(len);
        buf.set_u16(0, self.id)
            .set_u8(2, self.kind as u8)
            .set_f32(UPDATE_X_AT, self.x)
            .set_f32(UPDATE_Y_AT, self.y)
            .set_angle(UPDATE_ROT_AT, self.rot)
            .set_f32(UPDATE_HP_AT, self.hp);
        self.update_buf = buf;
        self.write_gear();
    }

    /// Patches the motion fields into the update record; runs every tick.
    pub fn serialize_motion(&mut self) {
        self.update_buf
            .set_f32(UPDATE_X_AT, self.x)
            .set_f32(UPDATE_Y_AT, self.y)
            .set_angle(UPDATE_ROT_AT, self.rot);
    }

    /// Patches held/hat/tail into the update record.
    pub fn write_gear(&mut self) {
        if let (Some(c), Some(l)) = (self.cosmetics, self.loadout.as_ref()) {
            self.update_buf
                .set_u8(UPDATE_GEAR_AT, l.held.wire_id())
                .set_u8(UPDATE_GEAR_AT + 1, c.hat)
                .set_u8(UPDATE_GEAR_AT + 2, c.tail);
        }
    }

    pub fn meet_bytes(&self) -> &[u8] {
        self.meet_buf.bytes()
    }

    pub fn update_bytes(&self) -> &[u8] {
        self.update_buf.bytes()
    }

    /// Brings the entity (back) to life at a position, fully resetting
    /// motion, health and loadout state.
    pub fn spawn(&mut self, x: f32, y: f32) {
        self.x_vel = 0.0;
        self.y_vel = 0.0;
        self.x_delta = 0.0;
        self.y_delta = 0.0;
        self.x = x;
        self.y = y;
        self.hp = self.max_hp;
        self.alive = true;
        self.was_alive = true;
        let kind = self.kind;
        if let Some(loadout) = self.loadout.as_mut() {
            loadout.reset(kind);
        }
        self.rebuild_buffers();
    }

    /// Applies damage (negative amounts heal) through the damage
    /// multiplier. Dropping to zero kills; overshooting caps at capacity.
    /// Returns true when this call was lethal.
    pub fn damage(&mut self, amount: f32) -> bool {
        self.hp -= amount * self.dmg_mult;
        let mut died = false;
        if self.hp <= 0.0 {
            self.alive = false;
            died = true;
        } else if self.hp > self.max_hp {
            self.hp = self.max_hp;
        }
        self.update_buf.set_f32(UPDATE_HP_AT, self.hp);
        died
    }

    pub fn apply_knockback(&mut self, dir: f32, strength: f32) {
        self.x_vel += dir.cos() * strength * KNOCKBACK_SCALE;
        self.y_vel += dir.sin() * strength * KNOCKBACK_SCALE;
    }

    /// Per-viewer visibility predicate on top of viewport containment.
    pub fn can_be_seen(&self, _viewer: &Entity) -> bool {
        true
    }

    /// Contact hook fired by the collision resolver with the closing speed
    /// along the collision normal, the direction toward the other body and
    /// the penetration depth.
    pub fn collide(&mut self, _other: EntityId, _closing_speed: f32, _impact_dir: f32, _depth: f32) {
    }
}
