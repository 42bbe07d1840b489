//! Authoritative world state and the fixed-period simulation loop.
//!
//! The simulation owns the world, the spatial index and the controller
//! table, and passes references down to the physics and broadcast functions
//! it calls; nothing reaches back into ambient global state. Inbound
//! session events mutate state immediately on receipt; the tick then reads
//! the result.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

use shared::codec::{Reader, StaticBuffer, Writer};
use shared::protocol::{ClientBound, DisconnectReason, ServerBound};
use shared::{MAP_SIZE, MAX_PLAYERS};

use crate::controller::{close_message, Controller, PlayerController};
use crate::entity::{Entity, EntityId};
use crate::items;
use crate::physics;
use crate::quadtree::QuadNode;

/// The entity map plus the live-id set backing random id allocation.
pub struct World {
    pub entities: HashMap<EntityId, Entity>,
    live_ids: HashSet<EntityId>,
}

impl World {
    pub fn new() -> World {
        World {
            entities: HashMap::new(),
            live_ids: HashSet::new(),
        }
    }

    /// Random 16-bit id, collision-checked against every id currently held.
    /// `None` when the id space is exhausted; callers block the spawn until
    /// an id frees up.
    fn allocate_id(&mut self) -> Option<EntityId> {
        if self.live_ids.len() > EntityId::MAX as usize {
            return None;
        }
        let mut rng = rand::thread_rng();
        loop {
            let id: EntityId = rng.gen();
            if self.live_ids.insert(id) {
                return Some(id);
            }
        }
    }

    /// Assigns an id, re-encodes the entity's wire records under it and
    /// takes ownership.
    pub fn insert(&mut self, mut entity: Entity) -> Option<EntityId> {
        let id = self.allocate_id()?;
        entity.id = id;
        entity.rebuild_buffers();
        self.entities.insert(id, entity);
        Some(id)
    }

    /// Removes the entity and frees its id in the same step.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id);
        if entity.is_some() {
            self.live_ids.remove(&id);
        }
        entity
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

/// Drives the per-tick pipeline and the per-connection visibility diffing.
pub struct Simulation {
    pub world: World,
    tree: QuadNode,
    pub controllers: HashMap<u8, PlayerController>,
    /// Epoch milliseconds at server start, replicated in the Init packet.
    started_at: f64,
}

impl Simulation {
    pub fn new() -> Simulation {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as f64;
        Simulation {
            world: World::new(),
            tree: QuadNode::world_root(),
            controllers: HashMap::new(),
            started_at,
        }
    }

    pub fn player_count(&self) -> u8 {
        self.controllers.len().min(u8::MAX as usize) as u8
    }

    /// Admits a new connection: lowest free slot, a fresh player entity and
    /// the Init packet. The connection is closed server-full when either
    /// slots or entity ids have run out.
    pub fn connect(&mut self, tx: UnboundedSender<Message>) -> Option<u8> {
        let slot = (1..MAX_PLAYERS as u8).find(|s| !self.controllers.contains_key(s));
        let Some(slot) = slot else {
            warn!("rejecting connection: no free slot");
            let _ = tx.send(close_message(DisconnectReason::ServerFull));
            return None;
        };
        let mut entity = Entity::player("Unknown");
        entity.controller = Some(slot);
        let Some(eid) = self.world.insert(entity) else {
            warn!("rejecting connection: entity id space exhausted");
            let _ = tx.send(close_message(DisconnectReason::ServerFull));
            return None;
        };

        let controller = PlayerController::new(slot, eid, tx);
        let mut init = StaticBuffer::new(15);
        init.set_u8(0, ClientBound::Init as u8)
            .set_u8(1, self.player_count() + 1)
            .set_u16(2, MAP_SIZE as u16)
            .set_u8(4, slot)
            .set_u16(5, eid)
            .set_f64(7, self.started_at);
        controller.send(init.to_vec());
        self.controllers.insert(slot, controller);
        info!("slot {} connected (entity {})", slot, eid);
        Some(slot)
    }

    /// A closed connection deactivates its entity; the next tick removes it
    /// and frees the id.
    pub fn disconnect(&mut self, slot: u8) {
        if let Some(controller) = self.controllers.remove(&slot) {
            if let Some(entity) = self.world.entities.get_mut(&controller.entity) {
                entity.active = false;
            }
            info!("slot {} disconnected", slot);
        }
    }

    /// Decodes and dispatches one inbound frame. A malformed payload or an
    /// unknown leading type byte closes the offending connection; state is
    /// only mutated by fully decoded packets.
    pub fn handle_frame(&mut self, slot: u8, data: &[u8]) {
        let mut r = Reader::new(data);
        let type_byte = match r.u8() {
            Ok(b) => b,
            Err(_) => {
                self.kick(slot, DisconnectReason::ReadFail);
                return;
            }
        };
        let Some(kind) = ServerBound::from_u8(type_byte) else {
            self.kick(slot, DisconnectReason::BadRequest);
            return;
        };

        let count = self.player_count();
        let result = {
            let Some(controller) = self.controllers.get_mut(&slot) else {
                return;
            };
            match kind {
                ServerBound::Ping => {
                    let mut pong = StaticBuffer::new(2);
                    pong.set_u8(0, ClientBound::Pong as u8).set_u8(1, count);
                    controller.send(pong.to_vec());
                    Ok(None)
                }
                ServerBound::Spawn => controller.handle_spawn(&mut self.world, &mut r).map(|_| None),
                ServerBound::Input => controller.handle_input(&mut self.world, &mut r).map(|_| None),
                ServerBound::Chat => controller.handle_chat(&mut self.world, &mut r),
                ServerBound::Equip => controller.handle_equip(&mut self.world, &mut r).map(|_| None),
            }
        };
        match result {
            Ok(Some(payload)) => self.broadcast(&payload),
            Ok(None) => {}
            Err(reason) => self.kick(slot, reason),
        }
    }

    fn kick(&mut self, slot: u8, reason: DisconnectReason) {
        if let Some(controller) = self.controllers.get(&slot) {
            controller.kick(reason);
        }
    }

    fn broadcast(&self, payload: &[u8]) {
        for controller in self.controllers.values() {
            controller.send(payload.to_vec());
        }
    }

    /// One fixed-period step. Order: integrate movement, rebuild the index,
    /// resolve collisions, advance per-entity state, flush removals as one
    /// batched packet, then diff per-player visibility into meet/update
    /// packets.
    pub fn tick(&mut self, delta: f32) {
        physics::movement_tick(&mut self.world, delta);
        physics::rebuild_index(&mut self.tree, &self.world);
        physics::resolve_collisions(&mut self.world, &self.tree, delta);

        let ids: Vec<EntityId> = self.world.entities.keys().copied().collect();
        let mut removals = Writer::packet(ClientBound::RemoveEntity as u8);
        let mut removed_any = false;
        for id in ids {
            let Some(entity) = self.world.entities.get(&id) else {
                continue;
            };
            if entity.active && entity.alive {
                self.advance_entity(id, delta);
            } else if !entity.active {
                removals.put_u16(id);
                removed_any = true;
                self.world.remove(id);
                self.purge_seen(id);
            } else if entity.was_alive {
                // Just died: broadcast the removal once, keep the record
                // around for a future respawn.
                removals.put_u16(id);
                removed_any = true;
                if let Some(entity) = self.world.entities.get_mut(&id) {
                    entity.was_alive = false;
                }
                self.purge_seen(id);
            }
        }
        if removed_any {
            self.broadcast(&removals.into_bytes());
        }

        self.broadcast_visibility();
    }

    /// Per-entity update: re-serialize motion, run the controller's on-tick
    /// hook, age the held item's cooldown and fire the primary-use latch.
    fn advance_entity(&mut self, id: EntityId, delta: f32) {
        let (slot, fire) = {
            let Some(entity) = self.world.entities.get_mut(&id) else {
                return;
            };
            entity.serialize_motion();
            let slot = entity.controller;
            let mut fire = false;
            if let Some(loadout) = entity.loadout.as_mut() {
                let held = loadout.held;
                match loadout.cooldowns.get_mut(&held) {
                    Some(cd) => *cd -= delta,
                    None => {
                        loadout.cooldowns.insert(held, 0.0);
                    }
                }
                fire = loadout.use_primary;
            }
            (slot, fire)
        };

        if let Some(slot) = slot {
            if let Some(controller) = self.controllers.get_mut(&slot) {
                if let Some(entity) = self.world.entities.get_mut(&id) {
                    controller.on_tick(entity, delta);
                }
            }
        }

        if fire {
            let resources_changed = items::try_use(&mut self.world, &self.tree, id);
            if resources_changed {
                if let Some(slot) = slot {
                    if let Some(controller) = self.controllers.get_mut(&slot) {
                        if let Some(entity) = self.world.entities.get(&id) {
                            controller.on_resources_changed(entity);
                        }
                    }
                }
            }
        }

        if let Some(entity) = self.world.entities.get_mut(&id) {
            if let Some(loadout) = entity.loadout.as_mut() {
                if loadout.use_primary && !loadout.keep_primary {
                    loadout.use_primary = false;
                }
                if loadout.use_secondary && !loadout.keep_secondary {
                    loadout.use_secondary = false;
                }
            }
        }
    }

    fn purge_seen(&mut self, id: EntityId) {
        for controller in self.controllers.values_mut() {
            controller.seen.remove(&id);
        }
    }

    /// Splits each spawned player's visible set against its seen set:
    /// newly seen entities get their identity record appended to a meet
    /// packet (sent only when non-empty); every visible entity's per-tick
    /// record goes into the update packet, which is always sent.
    fn broadcast_visibility(&mut self) {
        let slots: Vec<u8> = self.controllers.keys().copied().collect();
        for slot in slots {
            let Some(controller) = self.controllers.get_mut(&slot) else {
                continue;
            };
            if !controller.has_spawned {
                continue;
            }
            let Some(player) = self.world.entities.get(&controller.entity) else {
                continue;
            };
            if !player.active {
                continue;
            }

            let visible = physics::visible_entities(&self.world, &self.tree, player);
            let mut meet = Writer::packet(ClientBound::MeetEntities as u8);
            let mut update = Writer::packet(ClientBound::Update as u8);
            let mut newly_seen = 0;
            for vid in visible {
                let Some(entity) = self.world.entities.get(&vid) else {
                    continue;
                };
                if controller.seen.insert(vid) {
                    meet.put_bytes(entity.meet_bytes());
                    newly_seen += 1;
                }
                update.put_bytes(entity.update_bytes());
            }
            if newly_seen > 0 {
                controller.send(meet.into_bytes());
            }
            controller.send(update.into_bytes());
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation::new()
    }
}
