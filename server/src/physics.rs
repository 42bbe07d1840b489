//! Per-tick physics pipeline: movement integration, pairwise collision
//! resolution over the spatial index, melee attack resolution and the
//! viewport visibility query.
//!
//! All elapsed time is in milliseconds; FRICTION, VELOCITY_SCALE and
//! BOUND_FORCE are calibrated for that unit.

use std::f32::consts::PI;

use shared::{
    BOUND_FORCE, COLLISION_STRENGTH, FRICTION, HALF_MAP, MAX_ENTITY_SIZE, VELOCITY_SCALE,
    VIEWPORT_HEIGHT, VIEWPORT_OVERSCAN, VIEWPORT_WIDTH,
};

use crate::entity::{Entity, EntityId};
use crate::game::World;
use crate::quadtree::{QuadEntry, QuadNode, Region};

/// Sign with a distinct zero, matching the broad-phase gate's three-way
/// comparison.
fn sign(v: f32) -> i32 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Shortest-path angular distance, wrapped to `[0, pi]`.
fn angle_dist(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % (2.0 * PI);
    if d > PI {
        2.0 * PI - d
    } else {
        d
    }
}

/// Integrates movement intent for every active, alive, dynamic body:
/// velocity from intent, boundary restoring force proportional to
/// penetration, frame-rate independent exponential friction, then position.
/// A runaway body (position beyond half the world plus the maximum entity
/// size) is teleported to the origin with all motion zeroed rather than
/// crashing the simulation.
pub fn movement_tick(world: &mut World, delta: f32) {
    let decel = FRICTION.powf(delta);
    let vel_mod = delta * VELOCITY_SCALE;

    for entity in world.entities.values_mut() {
        if !entity.active || !entity.alive || entity.is_static {
            continue;
        }

        entity.x_vel += entity.x_delta * entity.speed * vel_mod;
        entity.y_vel += entity.y_delta * entity.speed * vel_mod;

        if entity.x.abs() + entity.size > HALF_MAP {
            entity.x_vel -=
                sign(entity.x) as f32 * BOUND_FORCE * (entity.x.abs() + entity.size - HALF_MAP) * vel_mod;
        }
        if entity.y.abs() + entity.size > HALF_MAP {
            entity.y_vel -=
                sign(entity.y) as f32 * BOUND_FORCE * (entity.y.abs() + entity.size - HALF_MAP) * vel_mod;
        }

        entity.x_vel *= decel;
        entity.y_vel *= decel;

        entity.x += entity.x_vel * delta;
        entity.y += entity.y_vel * delta;

        if entity.x.abs().max(entity.y.abs()) > HALF_MAP + MAX_ENTITY_SIZE {
            entity.x = 0.0;
            entity.y = 0.0;
            entity.x_vel = 0.0;
            entity.y_vel = 0.0;
            entity.x_delta = 0.0;
            entity.y_delta = 0.0;
        }
    }
}

/// Clears and refills the index from every active, alive entity.
pub fn rebuild_index(tree: &mut QuadNode, world: &World) {
    tree.clear();
    for entity in world.entities.values() {
        if entity.active && entity.alive {
            tree.insert(QuadEntry {
                id: entity.id,
                x: entity.x,
                y: entity.y,
                size: entity.size,
            });
        }
    }
}

/// Resolves every candidate pair from the freshly rebuilt index. One
/// ordering per pair per tick; deep interpenetration at low tick rates
/// relaxes over several ticks instead of instantly.
pub fn resolve_collisions(world: &mut World, tree: &QuadNode, delta: f32) {
    tree.for_each_pair(&mut |a, b| resolve_pair(world, a, b, delta));
}

fn resolve_pair(world: &mut World, a: EntityId, b: EntityId, delta: f32) {
    let (Some(ea), Some(eb)) = (world.entities.get(&a), world.entities.get(&b)) else {
        return;
    };
    if !ea.active || !ea.alive || !eb.active || !eb.alive {
        return;
    }
    if ea.is_static && eb.is_static {
        return;
    }

    let mut ea = ea.clone();
    let mut eb = eb.clone();
    if ea.is_static {
        static_collision(&mut ea, &mut eb);
    } else if eb.is_static {
        static_collision(&mut eb, &mut ea);
    } else {
        dynamic_collision(&mut ea, &mut eb, delta);
    }
    world.entities.insert(a, ea);
    world.entities.insert(b, eb);
}

fn dynamic_collision(a: &mut Entity, b: &mut Entity, delta: f32) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let dvx = a.x_vel - b.x_vel;
    let dvy = a.y_vel - b.y_vel;
    let size = a.size + b.size;
    if (sign(dx) == sign(dvx) || sign(dy) == sign(dvy)) && dx.abs().max(dy.abs()) < size {
        let dist = dx.hypot(dy) - size;
        if dist <= 0.0 {
            let dir = (a.y - b.y).atan2(a.x - b.x);
            let closing = (dvx * dir.cos() + dvy * dir.sin()).abs();
            let stiffness = COLLISION_STRENGTH / ((1.0 + dx.hypot(dy) / 2.0) * delta);
            a.x_vel += (a.x - b.x) / stiffness;
            a.y_vel += (a.y - b.y) / stiffness;
            b.x_vel -= (a.x - b.x) / stiffness;
            b.y_vel -= (a.y - b.y) / stiffness;
            a.collide(b.id, closing, dir - PI, dist);
            b.collide(a.id, closing, dir, dist);
        }
    }
}

/// The dynamic body is snapped to exactly the contact distance on its own
/// side of the static body, and its velocity is scaled by the static body's
/// friction coefficient. No impulse.
fn static_collision(sta: &mut Entity, dynamic: &mut Entity) {
    let dx = sta.x - dynamic.x;
    let dy = sta.y - dynamic.y;
    let size = sta.size + dynamic.size;
    if (sign(dynamic.x_vel) == sign(dx) || sign(dynamic.y_vel) == sign(dy))
        && dx.abs().max(dy.abs()) < size
    {
        let dist = dx.hypot(dy) - size;
        if dist <= 0.0 {
            let dir = (dynamic.y - sta.y).atan2(dynamic.x - sta.x);
            let closing = (dynamic.x_vel * dir.cos() + dynamic.y_vel * dir.sin()).abs();
            dynamic.x = sta.x + size * dir.cos();
            dynamic.y = sta.y + size * dir.sin();
            dynamic.x_vel *= sta.friction;
            dynamic.y_vel *= sta.friction;
            sta.collide(dynamic.id, closing, dir, dist);
            dynamic.collide(sta.id, closing, dir - PI, dist);
        }
    }
}

/// Melee swing: every active, alive entity other than the attacker whose
/// circle penetrates `range + its size` and whose bearing lies within the
/// weapon half-angle of the attacker's facing takes knockback and damage.
/// Lethal hits are credited to the attacker's kill count.
pub fn run_attack(
    world: &mut World,
    tree: &QuadNode,
    attacker: EntityId,
    damage: f32,
    range: f32,
    half_angle: f32,
    knockback: f32,
) {
    let Some(att) = world.entities.get(&attacker) else {
        return;
    };
    let (ax, ay, rot) = (att.x, att.y, att.rot);
    let reach = range + att.size;

    let mut candidates = Vec::new();
    tree.visit(&Region::around(ax, ay, reach, reach), &mut |e| {
        if e.id != attacker {
            candidates.push(e.id);
        }
    });

    let mut kills = 0u16;
    for target in candidates {
        let Some(ent) = world.entities.get_mut(&target) else {
            continue;
        };
        if !ent.active || !ent.alive {
            continue;
        }
        let dx = ent.x - ax;
        let dy = ent.y - ay;
        let size = range + ent.size;
        if dx.abs().max(dy.abs()) < size {
            let dist = dx.hypot(dy) - size;
            let dir = dy.atan2(dx);
            if dist <= 0.0 && angle_dist(dir, rot) <= half_angle {
                ent.apply_knockback(dir, knockback);
                if ent.damage(damage) {
                    kills += 1;
                }
            }
        }
    }

    if kills > 0 {
        if let Some(att) = world.entities.get_mut(&attacker) {
            if let Some(loadout) = att.loadout.as_mut() {
                loadout.kills += kills;
            }
        }
    }
}

/// Entities the viewer currently sees: inside the viewport-plus-overscan
/// window on both axes independently, active, alive, and passing the
/// entity's own visibility predicate. The viewer sees itself.
pub fn visible_entities(world: &World, tree: &QuadNode, viewer: &Entity) -> Vec<EntityId> {
    let view_x = (VIEWPORT_WIDTH + VIEWPORT_OVERSCAN) / 2.0;
    let view_y = (VIEWPORT_HEIGHT + VIEWPORT_OVERSCAN) / 2.0;
    let region = Region::around(viewer.x, viewer.y, view_x, view_y);

    let mut seen = Vec::new();
    tree.visit(&region, &mut |e| {
        let Some(ent) = world.entities.get(&e.id) else {
            return;
        };
        if !ent.active || !ent.alive || !ent.can_be_seen(viewer) {
            return;
        }
        let dx = ent.x - viewer.x;
        let dy = ent.y - viewer.y;
        if dx.abs() + ent.size < view_x && dy.abs() + ent.size < view_y {
            seen.push(ent.id);
        }
    });
    seen
}
