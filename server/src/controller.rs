//! Controllers bind one connection to one entity and react to simulation
//! lifecycle events by emitting protocol packets.
//!
//! The simulation never touches wire code on an entity directly: it routes
//! every notification through the entity's controller slot, and entities
//! without one silently no-op. Inbound player messages are decoded and
//! applied here, immediately on receipt, outside the tick boundary.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::debug;
use rand::Rng;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use shared::codec::{Reader, StaticBuffer, Writer};
use shared::protocol::{
    ClientBound, DisconnectReason, EQUIP_HAT, EQUIP_ITEM, EQUIP_TAIL, INPUT_MOVE, INPUT_PRIMARY,
    INPUT_ROTATE, INPUT_SECONDARY, INPUT_STOP, ITEM_NONE,
};
use shared::{CHAT_COOLDOWN_MS, HALF_MAP, MAX_CHAT_LEN, MAX_NAME_LEN, SKIN_COLORS};

use crate::entity::{Entity, EntityId};
use crate::game::World;
use crate::items::ItemKind;

/// Lifecycle hooks a controller may implement. Defaults no-op so
/// implementations only override what they emit.
pub trait Controller {
    /// The bound entity just (re)spawned.
    fn on_spawn(&mut self, entity: &Entity);

    /// Periodic per-tick behavior.
    fn on_tick(&mut self, _entity: &mut Entity, _delta: f32) {}

    /// The bound entity's resource wallet changed.
    fn on_resources_changed(&mut self, entity: &Entity);
}

/// Builds the close frame for an application-level disconnect.
pub fn close_message(reason: DisconnectReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::from(reason.close_code()),
        reason: "".into(),
    }))
}

/// One player connection: a slot, its entity, the set of entities this
/// viewer already knows, and the outbound message channel.
pub struct PlayerController {
    pub slot: u8,
    pub entity: EntityId,
    /// Gates participation in the visibility broadcast.
    pub has_spawned: bool,
    /// Entities this viewer has received a meet record for.
    pub seen: HashSet<EntityId>,
    last_chat: Option<Instant>,
    tx: UnboundedSender<Message>,
}

impl PlayerController {
    pub fn new(slot: u8, entity: EntityId, tx: UnboundedSender<Message>) -> PlayerController {
        PlayerController {
            slot,
            entity,
            has_spawned: false,
            seen: HashSet::new(),
            last_chat: None,
            tx,
        }
    }

    /// Queues a payload for this connection. A closed channel means the
    /// connection is already going away; the entity gets deactivated by the
    /// disconnect path, so the send result is deliberately ignored.
    pub fn send(&self, payload: Vec<u8>) {
        let _ = self.tx.send(Message::Binary(payload));
    }

    pub fn kick(&self, reason: DisconnectReason) {
        debug!("kicking slot {} ({:?})", self.slot, reason);
        let _ = self.tx.send(close_message(reason));
    }

    /// Spawn request: name, skin. An over-long name is a bad request; an
    /// out-of-palette skin falls back to the first color.
    pub fn handle_spawn(
        &mut self,
        world: &mut World,
        r: &mut Reader,
    ) -> Result<(), DisconnectReason> {
        let name = r.text()?;
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DisconnectReason::BadRequest);
        }
        let skin = r.u8()?;

        let Some(entity) = world.entities.get_mut(&self.entity) else {
            return Ok(());
        };
        entity.name = name;
        if let Some(c) = entity.cosmetics.as_mut() {
            c.skin = if (skin as usize) < SKIN_COLORS.len() {
                skin
            } else {
                0
            };
        }
        let mut rng = rand::thread_rng();
        let x = rng.gen_range(-HALF_MAP..HALF_MAP);
        let y = rng.gen_range(-HALF_MAP..HALF_MAP);
        entity.spawn(x, y);
        self.on_spawn(entity);
        Ok(())
    }

    /// Input flags: rotation angle, movement direction, cancel movement,
    /// secondary/primary button state. All fields decode before anything is
    /// applied, so a truncated packet mutates nothing.
    pub fn handle_input(
        &mut self,
        world: &mut World,
        r: &mut Reader,
    ) -> Result<(), DisconnectReason> {
        let flags = r.u8()?;
        let rot = if flags & INPUT_ROTATE != 0 {
            Some(r.angle()?)
        } else {
            None
        };
        let move_dir = if flags & INPUT_MOVE != 0 {
            Some(r.angle()?)
        } else {
            None
        };

        let Some(entity) = world.entities.get_mut(&self.entity) else {
            return Ok(());
        };
        if let Some(rot) = rot {
            entity.rot = rot;
        }
        if let Some(dir) = move_dir {
            entity.x_delta = dir.cos();
            entity.y_delta = dir.sin();
        }
        if flags & INPUT_STOP != 0 {
            entity.x_delta = 0.0;
            entity.y_delta = 0.0;
        }
        if let Some(loadout) = entity.loadout.as_mut() {
            if flags & INPUT_SECONDARY != 0 {
                loadout.use_secondary = true;
                loadout.keep_secondary = true;
            } else {
                loadout.keep_secondary = false;
            }
            if flags & INPUT_PRIMARY != 0 {
                loadout.use_primary = true;
                loadout.keep_primary = true;
            } else {
                loadout.keep_primary = false;
            }
        }
        Ok(())
    }

    /// Chat: gated on being alive and the per-connection cooldown, capped in
    /// length, otherwise silently dropped. Returns the broadcast payload.
    /// Carries the original `/tp x y` debug teleport.
    pub fn handle_chat(
        &mut self,
        world: &mut World,
        r: &mut Reader,
    ) -> Result<Option<Vec<u8>>, DisconnectReason> {
        let alive = world
            .entities
            .get(&self.entity)
            .map(|e| e.alive)
            .unwrap_or(false);
        let throttled = self
            .last_chat
            .map(|at| at.elapsed() < Duration::from_millis(CHAT_COOLDOWN_MS))
            .unwrap_or(false);
        if !alive || throttled {
            return Ok(None);
        }
        let message = r.text()?;
        if message.chars().count() > MAX_CHAT_LEN {
            return Ok(None);
        }
        self.last_chat = Some(Instant::now());

        if let Some(rest) = message.strip_prefix("/tp ") {
            let mut parts = rest.split_whitespace();
            let x = parts.next().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
            let y = parts.next().and_then(|v| v.parse::<i32>().ok()).unwrap_or(0);
            if let Some(entity) = world.entities.get_mut(&self.entity) {
                entity.x = x as f32;
                entity.y = y as f32;
            }
        }

        let name = world
            .entities
            .get(&self.entity)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        let mut w = Writer::packet(ClientBound::Chat as u8);
        w.put_u16(self.entity).put_text(&name).put_text(&message);
        Ok(Some(w.into_bytes()))
    }

    /// Equip flags: held item (validated against the inventory, the 255
    /// sentinel never matches), hat, tail. Re-encodes the gear bytes of the
    /// update record in place.
    pub fn handle_equip(
        &mut self,
        world: &mut World,
        r: &mut Reader,
    ) -> Result<(), DisconnectReason> {
        let alive = world
            .entities
            .get(&self.entity)
            .map(|e| e.alive)
            .unwrap_or(false);
        if !alive {
            return Ok(());
        }
        let flags = r.u8()?;
        let item = if flags & EQUIP_ITEM != 0 {
            Some(r.u8()?)
        } else {
            None
        };
        let hat = if flags & EQUIP_HAT != 0 {
            Some(r.u8()?)
        } else {
            None
        };
        let tail = if flags & EQUIP_TAIL != 0 {
            Some(r.u8()?)
        } else {
            None
        };

        let Some(entity) = world.entities.get_mut(&self.entity) else {
            return Ok(());
        };
        if let (Some(id), Some(loadout)) = (item, entity.loadout.as_mut()) {
            if id != ITEM_NONE {
                if let Some(kind) = ItemKind::from_wire(id) {
                    if loadout.items.contains(&kind) {
                        loadout.held = kind;
                    }
                }
            }
        }
        if let Some(c) = entity.cosmetics.as_mut() {
            if let Some(hat) = hat {
                c.hat = hat;
            }
            if let Some(tail) = tail {
                c.tail = tail;
            }
        }
        entity.write_gear();
        Ok(())
    }
}

impl Controller for PlayerController {
    /// Sends the spawn packet (position plus starting resources) and opens
    /// the broadcast gate.
    fn on_spawn(&mut self, entity: &Entity) {
        let (wood, stone, food, gold) = entity
            .loadout
            .as_ref()
            .map(|l| (l.wood, l.stone, l.food, l.gold))
            .unwrap_or_default();
        let mut b = StaticBuffer::new(17);
        b.set_u8(0, ClientBound::Spawn as u8)
            .set_f32(1, entity.x)
            .set_f32(5, entity.y)
            .set_u16(9, wood)
            .set_u16(11, stone)
            .set_u16(13, food)
            .set_u16(15, gold);
        self.send(b.to_vec());
        self.has_spawned = true;
    }

    fn on_resources_changed(&mut self, entity: &Entity) {
        let Some(loadout) = entity.loadout.as_ref() else {
            return;
        };
        let mut b = StaticBuffer::new(9);
        b.set_u8(0, ClientBound::UpdateResources as u8)
            .set_u16(1, loadout.wood)
            .set_u16(3, loadout.stone)
            .set_u16(5, loadout.food)
            .set_u16(7, loadout.gold);
        self.send(b.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;
    use shared::protocol::ServerBound;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn setup() -> (World, PlayerController, UnboundedReceiver<Message>) {
        let mut world = World::new();
        let mut entity = Entity::player("Unknown");
        entity.controller = Some(1);
        let id = world.insert(entity).unwrap();
        let (tx, rx) = unbounded_channel();
        (world, PlayerController::new(1, id, tx), rx)
    }

    fn binary(rx: &mut UnboundedReceiver<Message>) -> Vec<u8> {
        match rx.try_recv().expect("expected a queued message") {
            Message::Binary(payload) => payload,
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    #[test]
    fn spawn_request_spawns_and_replies() {
        let (mut world, mut c, mut rx) = setup();
        let mut payload = Writer::packet(ServerBound::Spawn as u8);
        payload.put_text("alice").put_u8(2);
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();

        c.handle_spawn(&mut world, &mut r).unwrap();
        assert!(c.has_spawned);

        let entity = &world.entities[&c.entity];
        assert!(entity.alive);
        assert_eq!(entity.name, "alice");
        assert_eq!(entity.cosmetics.unwrap().skin, 2);
        assert!(entity.x.abs() <= HALF_MAP);

        let spawn = binary(&mut rx);
        let mut r = Reader::new(&spawn);
        assert_eq!(r.u8().unwrap(), ClientBound::Spawn as u8);
        assert_eq!(r.f32().unwrap(), entity.x);
        assert_eq!(r.f32().unwrap(), entity.y);
        assert_eq!(r.u16().unwrap(), 0); // wood
        assert_eq!(r.u16().unwrap(), 0); // stone
        assert_eq!(r.u16().unwrap(), 100); // food
        assert_eq!(r.u16().unwrap(), 0); // gold
    }

    #[test]
    fn over_long_name_is_bad_request() {
        let (mut world, mut c, _rx) = setup();
        let mut payload = Writer::packet(ServerBound::Spawn as u8);
        payload.put_text("this-name-is-way-too-long").put_u8(0);
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        assert_eq!(
            c.handle_spawn(&mut world, &mut r),
            Err(DisconnectReason::BadRequest)
        );
        assert!(!world.entities[&c.entity].alive, "nothing spawned");
    }

    #[test]
    fn out_of_palette_skin_falls_back() {
        let (mut world, mut c, _rx) = setup();
        let mut payload = Writer::packet(ServerBound::Spawn as u8);
        payload.put_text("bob").put_u8(200);
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        c.handle_spawn(&mut world, &mut r).unwrap();
        assert_eq!(world.entities[&c.entity].cosmetics.unwrap().skin, 0);
    }

    #[test]
    fn input_sets_motion_and_latches() {
        let (mut world, mut c, _rx) = setup();
        let mut payload = Writer::packet(ServerBound::Input as u8);
        payload
            .put_u8(INPUT_ROTATE | INPUT_MOVE | INPUT_PRIMARY)
            .put_angle(std::f32::consts::FRAC_PI_2)
            .put_angle(0.0);
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        c.handle_input(&mut world, &mut r).unwrap();

        let entity = &world.entities[&c.entity];
        assert!((entity.rot - std::f32::consts::FRAC_PI_2).abs() < 0.05);
        assert!((entity.x_delta - 1.0).abs() < 0.01);
        assert!(entity.y_delta.abs() < 0.01);
        let l = entity.loadout.as_ref().unwrap();
        assert!(l.use_primary && l.keep_primary);
        assert!(!l.use_secondary && !l.keep_secondary);
    }

    #[test]
    fn releasing_button_drops_sticky_flag_only() {
        let (mut world, mut c, _rx) = setup();
        for flags in [INPUT_PRIMARY, 0u8] {
            let mut payload = Writer::packet(ServerBound::Input as u8);
            payload.put_u8(flags);
            let bytes = payload.into_bytes();
            let mut r = Reader::new(&bytes);
            r.u8().unwrap();
            c.handle_input(&mut world, &mut r).unwrap();
        }
        let l = world.entities[&c.entity].loadout.as_ref().unwrap();
        // The pending use survives until the tick consumes it; only the
        // sticky flag cleared with the button.
        assert!(l.use_primary);
        assert!(!l.keep_primary);
    }

    #[test]
    fn truncated_input_mutates_nothing() {
        let (mut world, mut c, _rx) = setup();
        let mut payload = Writer::packet(ServerBound::Input as u8);
        payload.put_u8(INPUT_ROTATE | INPUT_MOVE).put_angle(1.0);
        // Movement angle promised but missing.
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        assert_eq!(
            c.handle_input(&mut world, &mut r),
            Err(DisconnectReason::ReadFail)
        );
        let entity = &world.entities[&c.entity];
        assert_eq!(entity.rot, 0.0);
        assert_eq!(entity.x_delta, 0.0);
    }

    #[test]
    fn stop_flag_cancels_movement() {
        let (mut world, mut c, _rx) = setup();
        world.entities.get_mut(&c.entity).unwrap().x_delta = 1.0;
        let mut payload = Writer::packet(ServerBound::Input as u8);
        payload.put_u8(INPUT_STOP);
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        c.handle_input(&mut world, &mut r).unwrap();
        let entity = &world.entities[&c.entity];
        assert_eq!((entity.x_delta, entity.y_delta), (0.0, 0.0));
    }

    #[test]
    fn chat_broadcasts_author_and_text() {
        let (mut world, mut c, _rx) = setup();
        world.entities.get_mut(&c.entity).unwrap().spawn(0.0, 0.0);
        world.entities.get_mut(&c.entity).unwrap().name = "carol".into();

        let mut payload = Writer::packet(ServerBound::Chat as u8);
        payload.put_text("hello there");
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        let out = c.handle_chat(&mut world, &mut r).unwrap().unwrap();

        let mut r = Reader::new(&out);
        assert_eq!(r.u8().unwrap(), ClientBound::Chat as u8);
        assert_eq!(r.u16().unwrap(), c.entity);
        assert_eq!(r.text().unwrap(), "carol");
        assert_eq!(r.text().unwrap(), "hello there");
    }

    #[test]
    fn chat_dead_or_throttled_is_dropped() {
        let (mut world, mut c, _rx) = setup();
        // Dead: never spawned.
        let mut payload = Writer::packet(ServerBound::Chat as u8);
        payload.put_text("hi");
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        assert_eq!(c.handle_chat(&mut world, &mut r).unwrap(), None);

        // Alive but chatting twice inside the cooldown window.
        world.entities.get_mut(&c.entity).unwrap().spawn(0.0, 0.0);
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        assert!(c.handle_chat(&mut world, &mut r).unwrap().is_some());
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        assert_eq!(c.handle_chat(&mut world, &mut r).unwrap(), None);
    }

    #[test]
    fn chat_teleport_command_moves_entity() {
        let (mut world, mut c, _rx) = setup();
        world.entities.get_mut(&c.entity).unwrap().spawn(0.0, 0.0);
        let mut payload = Writer::packet(ServerBound::Chat as u8);
        payload.put_text("/tp 100 -250");
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        assert!(c.handle_chat(&mut world, &mut r).unwrap().is_some());
        let entity = &world.entities[&c.entity];
        assert_eq!((entity.x, entity.y), (100.0, -250.0));
    }

    #[test]
    fn equip_validates_item_against_inventory() {
        let (mut world, mut c, _rx) = setup();
        world.entities.get_mut(&c.entity).unwrap().spawn(0.0, 0.0);

        // Valid switch to the apple.
        let mut payload = Writer::packet(ServerBound::Equip as u8);
        payload.put_u8(EQUIP_ITEM | EQUIP_HAT).put_u8(ItemKind::Apple.wire_id()).put_u8(4);
        let bytes = payload.into_bytes();
        let mut r = Reader::new(&bytes);
        r.u8().unwrap();
        c.handle_equip(&mut world, &mut r).unwrap();
        {
            let entity = &world.entities[&c.entity];
            assert_eq!(entity.loadout.as_ref().unwrap().held, ItemKind::Apple);
            assert_eq!(entity.cosmetics.unwrap().hat, 4);
        }

        // The sentinel and unknown ids never match.
        for bogus in [ITEM_NONE, 17] {
            let mut payload = Writer::packet(ServerBound::Equip as u8);
            payload.put_u8(EQUIP_ITEM).put_u8(bogus);
            let bytes = payload.into_bytes();
            let mut r = Reader::new(&bytes);
            r.u8().unwrap();
            c.handle_equip(&mut world, &mut r).unwrap();
            let entity = &world.entities[&c.entity];
            assert_eq!(entity.loadout.as_ref().unwrap().held, ItemKind::Apple);
        }
    }

    #[test]
    fn resources_packet_layout() {
        let (mut world, mut c, mut rx) = setup();
        {
            let entity = world.entities.get_mut(&c.entity).unwrap();
            entity.spawn(0.0, 0.0);
            let l = entity.loadout.as_mut().unwrap();
            l.wood = 11;
            l.stone = 22;
            l.gold = 44;
        }
        let entity = world.entities[&c.entity].clone();
        c.on_resources_changed(&entity);

        let out = binary(&mut rx);
        let mut r = Reader::new(&out);
        assert_eq!(r.u8().unwrap(), ClientBound::UpdateResources as u8);
        assert_eq!(r.u16().unwrap(), 11);
        assert_eq!(r.u16().unwrap(), 22);
        assert_eq!(r.u16().unwrap(), 100);
        assert_eq!(r.u16().unwrap(), 44);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn base_controllerless_entities_exist() {
        let mut world = World::new();
        let id = world.insert(Entity::new(EntityKind::Base, "tree")).unwrap();
        assert!(world.entities[&id].controller.is_none());
    }
}
