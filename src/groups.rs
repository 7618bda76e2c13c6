//! Entity ownership and the per-frame update pass.
//!
//! Entities live in a generational arena and are addressed by [`EntityId`]; an
//! id whose slot has been freed and reused no longer resolves. Groups are
//! ordered lists of ids. "Quad" groups are spatially partitioned: their list is
//! rebuilt every full update from the activity index, so only entities near
//! the view are updated.
//!
//! While an update pass runs the container is locked. Additions made during
//! the pass (including spawns from inside entity updates) are queued and
//! applied in FIFO order on unlock; removals take effect on the group lists
//! immediately, and the matching activity-index deletes are applied on unlock.

use log::trace;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::activity::EntityActivityIndex;
use crate::api::Located;
use crate::types::*;

/// Generational entity handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage that reuses freed slots under a bumped generation.
pub struct EntityArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for EntityArena<T> {
    fn default() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), live: 0 }
    }
}

impl<T> EntityArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> EntityId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return EntityId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, value: Some(value) });
        EntityId { index, generation: 0 }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation += 1;
        self.free.push(id.index);
        self.live -= 1;
        Some(value)
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_mut())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Collects entities created from inside an update callback.
pub struct Spawner<T> {
    pending: Vec<(T, String)>,
}

impl<T> Spawner<T> {
    fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn spawn(&mut self, entity: T, group: impl Into<String>) {
        self.pending.push((entity, group.into()));
    }
}

/// Named groups of entities with a reentrant-safe update pass.
pub struct EntityGroups<T> {
    arena: EntityArena<T>,
    groups: BTreeMap<String, Vec<EntityId>>,
    membership: HashMap<EntityId, String>,
    quad_groups: BTreeSet<String>,
    index: EntityActivityIndex<EntityId>,
    locked: bool,
    add_queue: VecDeque<(EntityId, String)>,
    index_deletes: Vec<EntityId>,
}

impl<T: Located> EntityGroups<T> {
    pub fn new(cfg: ActivityConfig, quad_groups: &[&str]) -> Self {
        Self {
            arena: EntityArena::new(),
            groups: BTreeMap::new(),
            membership: HashMap::new(),
            quad_groups: quad_groups.iter().map(|g| g.to_string()).collect(),
            index: EntityActivityIndex::new(cfg),
            locked: false,
            add_queue: VecDeque::new(),
            index_deletes: Vec::new(),
        }
    }

    pub fn set_quad_groups(&mut self, quad_groups: &[&str]) {
        self.quad_groups = quad_groups.iter().map(|g| g.to_string()).collect();
    }

    pub fn is_quad_group(&self, group: &str) -> bool {
        self.quad_groups.contains(group)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Take ownership of `entity` and put it in `group`. While locked, the
    /// group placement waits for [`EntityGroups::unlock`]; the id is valid
    /// immediately.
    pub fn add(&mut self, entity: T, group: &str) -> EntityId {
        let id = self.arena.insert(entity);
        if self.locked {
            self.add_queue.push_back((id, group.to_string()));
        } else {
            self.place(id, group);
        }
        id
    }

    fn place(&mut self, id: EntityId, group: &str) {
        let Some(pos) = self.arena.get(id).map(Located::position) else {
            return;
        };
        if self.quad_groups.contains(group) {
            self.index.insert(id, pos, group);
        } else {
            self.groups.entry(group.to_string()).or_default().push(id);
        }
        self.membership.insert(id, group.to_string());
    }

    /// Drop an entity from its group and return it. Unknown ids are a no-op.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let value = self.arena.remove(id)?;
        self.add_queue.retain(|(queued, _)| *queued != id);
        if let Some(group) = self.membership.remove(&id) {
            if let Some(list) = self.groups.get_mut(&group) {
                list.retain(|e| *e != id);
            }
            if self.quad_groups.contains(&group) {
                if self.locked {
                    self.index_deletes.push(id);
                } else {
                    self.index.delete(id);
                }
            }
        }
        Some(value)
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Leave locked mode: apply deferred index deletes, then queued additions
    /// in the order they were made.
    pub fn unlock(&mut self) {
        self.locked = false;
        for id in std::mem::take(&mut self.index_deletes) {
            self.index.delete(id);
        }
        if !self.add_queue.is_empty() {
            trace!("flushing {} queued entities", self.add_queue.len());
        }
        while let Some((id, group)) = self.add_queue.pop_front() {
            self.place(id, &group);
        }
    }

    /// Update every group. Quad groups are first refreshed from the entities
    /// near `view`. `f` returns true to kill the entity.
    pub fn update<F>(&mut self, dt: f32, view: Rect, mut f: F)
    where
        F: FnMut(&mut T, &mut Spawner<T>, f32) -> bool,
    {
        if !self.quad_groups.is_empty() {
            let arena = &self.arena;
            self.index.update_active(view, |id| arena.get(id).map(Located::position));
            for group in &self.quad_groups {
                self.groups.insert(group.clone(), self.index.active(group).to_vec());
            }
        }
        self.lock();
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for group in &names {
            self.run_group(group, dt, &mut f);
        }
        self.unlock();
    }

    /// Update a single group without refreshing quad groups.
    pub fn update_group<F>(&mut self, group: &str, dt: f32, mut f: F)
    where
        F: FnMut(&mut T, &mut Spawner<T>, f32) -> bool,
    {
        self.lock();
        self.run_group(group, dt, &mut f);
        self.unlock();
    }

    fn run_group<F>(&mut self, group: &str, dt: f32, f: &mut F)
    where
        F: FnMut(&mut T, &mut Spawner<T>, f32) -> bool,
    {
        let Some(members) = self.groups.get(group).cloned() else {
            return;
        };
        let mut spawner = Spawner::new();
        for id in members {
            let Some(entity) = self.arena.get_mut(id) else {
                continue;
            };
            let kill = f(entity, &mut spawner, dt);
            for (spawned, target) in spawner.pending.drain(..) {
                self.add(spawned, &target);
            }
            if kill {
                self.remove(id);
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.arena.get_mut(id)
    }

    /// Ids currently listed in `group`, in update order.
    pub fn members(&self, group: &str) -> &[EntityId] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter_group<'a>(&'a self, group: &str) -> impl Iterator<Item = (EntityId, &'a T)> + 'a {
        let arena = &self.arena;
        self.members(group)
            .iter()
            .filter_map(move |id| arena.get(*id).map(|e| (*id, e)))
    }

    /// Visit the listed entities of one group, or of every group in name order.
    pub fn render(&self, group: Option<&str>, mut draw: impl FnMut(&str, &T)) {
        match group {
            Some(g) => self.iter_group(g).for_each(|(_, e)| draw(g, e)),
            None => {
                for g in self.groups.keys() {
                    self.iter_group(g).for_each(|(_, e)| draw(g, e));
                }
            }
        }
    }

    /// Live entities, including ones still waiting in the add queue.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn activity(&self) -> &EntityActivityIndex<EntityId> {
        &self.index
    }
}
