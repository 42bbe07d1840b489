//! Item definitions and the use contract.
//!
//! Definitions are immutable data looked up by [`ItemKind`]; all mutable
//! state (cooldown remaining, held slot) lives in the holder's own
//! [`Loadout`](crate::entity::Loadout), so no two entities ever alias item
//! state.

use std::f32::consts::FRAC_PI_2;

use crate::entity::{EntityId, EntityKind};
use crate::game::World;
use crate::physics;
use crate::quadtree::QuadNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Hammer,
    Apple,
}

impl ItemKind {
    pub const fn wire_id(self) -> u8 {
        match self {
            ItemKind::Hammer => 0,
            ItemKind::Apple => 1,
        }
    }

    pub fn from_wire(v: u8) -> Option<ItemKind> {
        match v {
            0 => Some(ItemKind::Hammer),
            1 => Some(ItemKind::Apple),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ItemEffect {
    /// Swings at everything in range within the half-angle of the holder's
    /// facing direction.
    Melee {
        damage: f32,
        range: f32,
        half_angle: f32,
        knockback: f32,
    },
    /// Restores health and switches the holder back to the first inventory
    /// slot.
    Heal { amount: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct ItemDef {
    /// Milliseconds between uses.
    pub cooldown: f32,
    pub wood_cost: u16,
    pub stone_cost: u16,
    pub food_cost: u16,
    pub gold_cost: u16,
    pub effect: ItemEffect,
}

const HAMMER: ItemDef = ItemDef {
    cooldown: 300.0,
    wood_cost: 0,
    stone_cost: 0,
    food_cost: 0,
    gold_cost: 0,
    effect: ItemEffect::Melee {
        damage: 20.0,
        range: 80.0,
        half_angle: FRAC_PI_2,
        knockback: 2.0,
    },
};

const APPLE: ItemDef = ItemDef {
    cooldown: 0.0,
    wood_cost: 0,
    stone_cost: 0,
    food_cost: 10,
    gold_cost: 0,
    effect: ItemEffect::Heal { amount: 15.0 },
};

pub fn def(kind: ItemKind) -> &'static ItemDef {
    match kind {
        ItemKind::Hammer => &HAMMER,
        ItemKind::Apple => &APPLE,
    }
}

/// Inventory template cloned into a fresh loadout on every spawn.
pub fn starting_items(kind: EntityKind) -> &'static [ItemKind] {
    match kind {
        EntityKind::Player => &[ItemKind::Hammer, ItemKind::Apple],
        EntityKind::Base => &[],
    }
}

/// Attempts to use the holder's held item. Proceeds only when the held item
/// has a recorded cooldown entry at or below zero, every resource cost is
/// affordable, and the effect's own gate passes; then costs are deducted,
/// the cooldown resets and the effect runs. Anything short of that is a
/// silent no-op. Returns true when resources changed and the owning
/// controller should be notified.
pub fn try_use(world: &mut World, tree: &QuadNode, user: EntityId) -> bool {
    let (held, d) = {
        let Some(entity) = world.entities.get(&user) else {
            return false;
        };
        let Some(loadout) = entity.loadout.as_ref() else {
            return false;
        };
        let held = loadout.held;
        match loadout.cooldowns.get(&held) {
            Some(cd) if *cd <= 0.0 => {}
            _ => return false,
        }
        let d = def(held);
        if loadout.wood < d.wood_cost
            || loadout.stone < d.stone_cost
            || loadout.food < d.food_cost
            || loadout.gold < d.gold_cost
        {
            return false;
        }
        if let ItemEffect::Heal { .. } = d.effect {
            if entity.hp >= entity.max_hp {
                return false;
            }
        }
        (held, *d)
    };

    if let Some(entity) = world.entities.get_mut(&user) {
        if let Some(loadout) = entity.loadout.as_mut() {
            loadout.wood -= d.wood_cost;
            loadout.stone -= d.stone_cost;
            loadout.food -= d.food_cost;
            loadout.gold -= d.gold_cost;
            loadout.cooldowns.insert(held, d.cooldown);
        }
    }

    match d.effect {
        ItemEffect::Melee {
            damage,
            range,
            half_angle,
            knockback,
        } => {
            physics::run_attack(world, tree, user, damage, range, half_angle, knockback);
        }
        ItemEffect::Heal { amount } => {
            if let Some(entity) = world.entities.get_mut(&user) {
                entity.damage(-amount);
                if let Some(loadout) = entity.loadout.as_mut() {
                    if let Some(&first) = loadout.items.first() {
                        loadout.held = first;
                    }
                }
                entity.write_gear();
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn world_with_player() -> (World, EntityId) {
        let mut world = World::new();
        let mut e = Entity::player("test");
        e.spawn(0.0, 0.0);
        let id = world.insert(e).unwrap();
        (world, id)
    }

    fn ready(world: &mut World, id: EntityId, item: ItemKind) {
        let l = world.entities.get_mut(&id).unwrap().loadout.as_mut().unwrap();
        l.held = item;
        l.cooldowns.insert(item, 0.0);
    }

    #[test]
    fn unaffordable_use_is_a_complete_noop() {
        let (mut world, id) = world_with_player();
        ready(&mut world, id, ItemKind::Apple);
        {
            let e = world.entities.get_mut(&id).unwrap();
            e.hp = 50.0;
            e.loadout.as_mut().unwrap().food = 5; // apple costs 10
        }
        assert!(!try_use(&mut world, &QuadNode::world_root(), id));
        let e = world.entities.get(&id).unwrap();
        assert_eq!(e.hp, 50.0);
        let l = e.loadout.as_ref().unwrap();
        assert_eq!(l.food, 5);
        assert_eq!(l.cooldowns[&ItemKind::Apple], 0.0);
    }

    #[test]
    fn missing_cooldown_entry_blocks_use() {
        let (mut world, id) = world_with_player();
        // Freshly spawned: the held hammer has no recorded cooldown yet.
        assert!(!try_use(&mut world, &QuadNode::world_root(), id));
    }

    #[test]
    fn pending_cooldown_blocks_use() {
        let (mut world, id) = world_with_player();
        ready(&mut world, id, ItemKind::Hammer);
        world
            .entities
            .get_mut(&id)
            .unwrap()
            .loadout
            .as_mut()
            .unwrap()
            .cooldowns
            .insert(ItemKind::Hammer, 120.0);
        assert!(!try_use(&mut world, &QuadNode::world_root(), id));
    }

    #[test]
    fn successful_use_deducts_and_resets_cooldown() {
        let (mut world, id) = world_with_player();
        ready(&mut world, id, ItemKind::Apple);
        world.entities.get_mut(&id).unwrap().hp = 50.0;
        assert!(try_use(&mut world, &QuadNode::world_root(), id));
        let e = world.entities.get(&id).unwrap();
        assert_eq!(e.hp, 65.0);
        let l = e.loadout.as_ref().unwrap();
        assert_eq!(l.food, 90);
        assert_eq!(l.cooldowns[&ItemKind::Apple], def(ItemKind::Apple).cooldown);
        // Eating switches back to the default slot.
        assert_eq!(l.held, ItemKind::Hammer);
    }

    #[test]
    fn heal_gated_when_at_full_health() {
        let (mut world, id) = world_with_player();
        ready(&mut world, id, ItemKind::Apple);
        assert!(!try_use(&mut world, &QuadNode::world_root(), id));
        let l = world.entities.get(&id).unwrap().loadout.as_ref().unwrap();
        assert_eq!(l.food, 100);
    }

    #[test]
    fn wire_ids_roundtrip() {
        for kind in [ItemKind::Hammer, ItemKind::Apple] {
            assert_eq!(ItemKind::from_wire(kind.wire_id()), Some(kind));
        }
        assert_eq!(ItemKind::from_wire(shared::protocol::ITEM_NONE), None);
    }
}
