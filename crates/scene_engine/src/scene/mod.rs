//! Scene core - light/primitive interaction graph and entity lifecycle
//!
//! The [`Scene`] owns every bookkeeping structure the renderer needs about
//! which lights affect which primitives: the entity records, the interaction
//! edge slab, the derived counters that surface editor warnings, and the
//! [`GpuScene`] dirty tracking that mirrors primitive state into GPU buffers.
//!
//! All mutation happens on the scene-owning thread. `&mut self` everywhere;
//! no internal locking.

pub mod interaction;
pub mod lights;
pub mod primitives;

#[cfg(test)]
mod tests;

pub use interaction::{InteractionIter, InteractionKey, LightPrimitiveInteraction};
pub use lights::{LightId, LightProxy, LightSceneInfo, LightType, Mobility};
pub use primitives::{
    LightRelevance, LightmapRecordData, LightmapType, PrimitiveKey, PrimitiveProxy,
    PrimitiveRecordData, PrimitiveSceneInfo,
};

use std::collections::HashSet;

use slotmap::SlotMap;

use crate::config::{FeatureLevel, SceneConfig};
use crate::foundation::collections::FreeList;
use crate::gpu_scene::{FlushStats, GpuScene, ScatterUploadTarget, UploadError};
use interaction::{
    link_into_light_list, link_into_primitive_list, unlink_from_light_list,
    unlink_from_primitive_list, InteractionFlags, InteractionSlab, ListKind,
};

/// Callback fired when an interaction change flips a primitive's applicable
/// shader path, so the host can rebuild its cached draw state
pub type DrawStateListener = Box<dyn FnMut(PrimitiveKey)>;

/// Scene-graph bookkeeping: entities, interaction edges, GPU sync state
pub struct Scene {
    config: SceneConfig,

    /// Lights, by stable id
    lights: FreeList<LightSceneInfo>,

    /// Primitives, by stable key
    primitives: SlotMap<PrimitiveKey, PrimitiveSceneInfo>,

    /// Packed primitive order; position is the GPU buffer slot
    packed_primitives: Vec<PrimitiveKey>,

    /// Edge slab; interactions reference each other by key through the
    /// intrusive lists
    interactions: InteractionSlab,

    gpu_scene: GpuScene,

    /// Scene-wide count of interactions with unbuilt static lighting;
    /// surfaces as the editor's "lighting needs to be rebuilt" warning
    num_uncached_static_lighting_interactions: i32,

    /// Lights whose whole-scene shadow map is currently cached. Interaction
    /// churn with non-often-moving primitives invalidates the entry.
    cached_shadow_maps: HashSet<LightId>,

    draw_state_listener: Option<DrawStateListener>,
}

impl Scene {
    /// Create an empty scene
    pub fn new(config: SceneConfig) -> Self {
        log::info!(
            "Creating scene (feature level {:?}, editor: {})",
            config.feature_level,
            config.is_editor_scene
        );
        let gpu_scene = GpuScene::new(&config);
        Self {
            config,
            lights: FreeList::new(),
            primitives: SlotMap::with_key(),
            packed_primitives: Vec::new(),
            interactions: InteractionSlab::with_key(),
            gpu_scene,
            num_uncached_static_lighting_interactions: 0,
            cached_shadow_maps: HashSet::new(),
            draw_state_listener: None,
        }
    }

    /// Install the draw-state rebuild callback
    pub fn set_draw_state_listener(&mut self, listener: DrawStateListener) {
        self.draw_state_listener = Some(listener);
    }

    // ========================================================================
    // Entity lifecycle
    // ========================================================================

    /// Register a light. Interactions with every existing primitive are
    /// evaluated immediately.
    pub fn add_light(&mut self, proxy: Box<dyn LightProxy>) -> LightId {
        let id = self.lights.insert(LightSceneInfo::new(proxy));
        log::debug!("Light {id} added");

        let keys: Vec<PrimitiveKey> = self.packed_primitives.clone();
        for key in keys {
            self.create_interaction(id, key);
        }
        id
    }

    /// Remove a light, destroying all its interactions first so the id is
    /// never recycled while edges still reference it.
    pub fn remove_light(&mut self, id: LightId) -> bool {
        let Some(light) = self.lights.get(id) else {
            return false;
        };

        let mut edges: Vec<InteractionKey> = InteractionIter::new(
            &self.interactions,
            light.often_moving_primitive_list,
            ListKind::PrimitiveList,
        )
        .map(|(key, _)| key)
        .collect();
        edges.extend(
            InteractionIter::new(
                &self.interactions,
                light.static_primitive_list,
                ListKind::PrimitiveList,
            )
            .map(|(key, _)| key),
        );

        for edge in edges {
            self.destroy_interaction(edge);
        }

        self.cached_shadow_maps.remove(&id);
        self.lights.remove(id);
        log::debug!("Light {id} removed");
        true
    }

    /// Register a primitive. Its lightmap span is allocated, its GPU slot is
    /// marked dirty, and interactions with every existing light are evaluated.
    pub fn add_primitive(&mut self, proxy: Box<dyn PrimitiveProxy>) -> PrimitiveKey {
        let num_lightmap_entries = u32::try_from(proxy.num_lightmap_entries()).unwrap_or(0);
        let lightmap_data_offset = if num_lightmap_entries > 0 {
            self.gpu_scene
                .lightmap_allocator_mut()
                .allocate(num_lightmap_entries)
        } else {
            0
        };

        let packed_index = self.packed_primitives.len();
        let key = self.primitives.insert(PrimitiveSceneInfo::new(
            proxy,
            packed_index,
            lightmap_data_offset,
            num_lightmap_entries,
        ));
        self.packed_primitives.push(key);
        self.gpu_scene.mark_dirty(packed_index);
        log::debug!("Primitive {key:?} added at packed index {packed_index}");

        for light_id in self.lights.indices() {
            self.create_interaction(light_id, key);
        }
        key
    }

    /// Remove a primitive: unlink all its interactions, free its lightmap
    /// span, swap-fill its packed slot and leave a dirty mark on the stale
    /// tail slot so the GPU record is zeroed on the next flush.
    pub fn remove_primitive(&mut self, key: PrimitiveKey) -> bool {
        let Some(info) = self.primitives.get(key) else {
            return false;
        };

        let edges: Vec<InteractionKey> =
            InteractionIter::new(&self.interactions, info.light_list, ListKind::LightList)
                .map(|(key, _)| key)
                .collect();
        for edge in edges {
            self.destroy_interaction(edge);
        }

        if let Some(info) = self.primitives.remove(key) {
            if info.num_lightmap_entries > 0 {
                self.gpu_scene
                    .lightmap_allocator_mut()
                    .free(info.lightmap_data_offset, info.num_lightmap_entries);
            }

            let index = info.packed_index;
            self.packed_primitives.swap_remove(index);
            if index < self.packed_primitives.len() {
                // Another primitive was swapped into this slot: re-upload it
                let moved = self.packed_primitives[index];
                self.primitives[moved].packed_index = index;
                self.gpu_scene.mark_dirty(index);
            }
            // The vacated tail slot gets a zero record on the next flush
            self.gpu_scene.mark_dirty(self.packed_primitives.len());
            log::debug!("Primitive {key:?} removed from packed index {index}");
        }
        true
    }

    // ========================================================================
    // Interaction re-evaluation
    // ========================================================================

    /// Re-evaluate a primitive's interactions after a lighting-relevant
    /// property change on it. Existing edges are destroyed and relevance is
    /// evaluated afresh against every light.
    pub fn reevaluate_primitive_interactions(&mut self, key: PrimitiveKey) {
        let Some(info) = self.primitives.get(key) else {
            return;
        };
        let edges: Vec<InteractionKey> =
            InteractionIter::new(&self.interactions, info.light_list, ListKind::LightList)
                .map(|(key, _)| key)
                .collect();
        for edge in edges {
            self.destroy_interaction(edge);
        }
        for light_id in self.lights.indices() {
            self.create_interaction(light_id, key);
        }
        self.mark_primitive_dirty(key);
    }

    /// Re-evaluate a light's interactions after a property change on it
    pub fn reevaluate_light_interactions(&mut self, id: LightId) {
        let Some(light) = self.lights.get(id) else {
            return;
        };
        let mut edges: Vec<InteractionKey> = InteractionIter::new(
            &self.interactions,
            light.often_moving_primitive_list,
            ListKind::PrimitiveList,
        )
        .map(|(key, _)| key)
        .collect();
        edges.extend(
            InteractionIter::new(
                &self.interactions,
                light.static_primitive_list,
                ListKind::PrimitiveList,
            )
            .map(|(key, _)| key),
        );
        for edge in edges {
            self.destroy_interaction(edge);
        }
        let keys: Vec<PrimitiveKey> = self.packed_primitives.clone();
        for key in keys {
            self.create_interaction(id, key);
        }
    }

    // ========================================================================
    // GPU sync
    // ========================================================================

    /// Mark a primitive's GPU record as needing upload
    pub fn mark_primitive_dirty(&mut self, key: PrimitiveKey) {
        if let Some(info) = self.primitives.get(key) {
            self.gpu_scene.mark_dirty(info.packed_index);
        }
    }

    /// Mark every primitive's GPU record as needing upload
    pub fn mark_all_primitives_dirty(&mut self) {
        self.gpu_scene.mark_all_dirty();
    }

    /// Number of primitive slots pending upload
    pub fn num_dirty_primitives(&self) -> usize {
        self.gpu_scene.num_dirty()
    }

    /// Push all pending primitive state to the destination buffers in one
    /// batched transfer each. On failure the dirty set is preserved and the
    /// next flush retries everything; no pending update is lost silently.
    pub fn flush(
        &mut self,
        primitive_buffer: &mut dyn ScatterUploadTarget,
        lightmap_buffer: &mut dyn ScatterUploadTarget,
    ) -> Result<FlushStats, UploadError> {
        match self.gpu_scene.flush(
            &mut self.primitives,
            &self.packed_primitives,
            primitive_buffer,
            lightmap_buffer,
        ) {
            Ok(stats) => Ok(stats),
            Err(err) => {
                log::warn!(
                    "GPU scene flush failed, keeping {} dirty primitives for retry: {err}",
                    self.gpu_scene.num_dirty()
                );
                Err(err)
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up a light's bookkeeping record
    pub fn light(&self, id: LightId) -> Option<&LightSceneInfo> {
        self.lights.get(id)
    }

    /// Look up a primitive's bookkeeping record
    pub fn primitive(&self, key: PrimitiveKey) -> Option<&PrimitiveSceneInfo> {
        self.primitives.get(key)
    }

    /// Number of live lights
    pub fn num_lights(&self) -> usize {
        self.lights.len()
    }

    /// Number of live primitives
    pub fn num_primitives(&self) -> usize {
        self.packed_primitives.len()
    }

    /// Number of live interactions
    pub fn num_interactions(&self) -> usize {
        self.interactions.len()
    }

    /// All interactions touching the given light, often-moving list first
    pub fn light_interactions(
        &self,
        id: LightId,
    ) -> impl Iterator<Item = (InteractionKey, &LightPrimitiveInteraction)> {
        let (often_moving, rarely_moving) = self.lights.get(id).map_or((None, None), |light| {
            (
                light.often_moving_primitive_list,
                light.static_primitive_list,
            )
        });
        InteractionIter::new(&self.interactions, often_moving, ListKind::PrimitiveList).chain(
            InteractionIter::new(&self.interactions, rarely_moving, ListKind::PrimitiveList),
        )
    }

    /// All interactions touching the given primitive
    pub fn primitive_interactions(
        &self,
        key: PrimitiveKey,
    ) -> impl Iterator<Item = (InteractionKey, &LightPrimitiveInteraction)> {
        let head = self.primitives.get(key).and_then(|info| info.light_list);
        InteractionIter::new(&self.interactions, head, ListKind::LightList)
    }

    /// Number of lights applying dynamically to the primitive, skipping
    /// light-mapped interactions
    pub fn num_dynamic_lights_affecting_primitive(&self, key: PrimitiveKey) -> usize {
        self.primitive_interactions(key)
            .filter(|(_, edge)| !edge.is_light_mapped)
            .count()
    }

    /// Scene-wide count of interactions with unbuilt static lighting
    pub fn num_uncached_static_lighting_interactions(&self) -> i32 {
        self.num_uncached_static_lighting_interactions
    }

    /// Note that the host rendered and cached a whole-scene shadow map for
    /// this light. Interaction churn invalidates the entry.
    pub fn mark_shadow_map_cached(&mut self, id: LightId) {
        self.cached_shadow_maps.insert(id);
    }

    /// Whether the light's cached whole-scene shadow map is still valid
    pub fn has_cached_shadow_map(&self, id: LightId) -> bool {
        self.cached_shadow_maps.contains(&id)
    }

    /// High-water mark of the lightmap span address space, in entries
    pub fn lightmap_data_max_size(&self) -> u32 {
        self.gpu_scene.lightmap_data_max_size()
    }

    // ========================================================================
    // Interaction construction/destruction
    // ========================================================================

    /// Evaluate one light/primitive pairing and materialize the edge if the
    /// relevance test passes. Recomputed only here; property changes need an
    /// explicit re-evaluation trigger.
    fn create_interaction(&mut self, light_id: LightId, primitive_key: PrimitiveKey) {
        let Some(light) = self.lights.get(light_id) else {
            return;
        };
        let Some(primitive) = self.primitives.get(primitive_key) else {
            return;
        };

        let Some(flags) = InteractionFlags::evaluate(light.proxy(), primitive.proxy()) else {
            return;
        };

        let mut casts_shadow = flags.casts_shadow;
        let mut uncached_static_lighting = false;

        // A shadow-casting dynamic edge on a static-lighting primitive means
        // the light's baked data is not built yet. Movable primitives that
        // force surface lightmaps keep their baked data when moved into a new
        // light's influence and must not be counted.
        if casts_shadow
            && flags.is_dynamic
            && primitive.proxy.has_static_lighting()
            && primitive.proxy.casts_static_shadow()
            && primitive.proxy.lightmap_type() != LightmapType::ForceSurface
            && (light.proxy.has_static_lighting()
                || (light.proxy.has_static_shadowing() && !flags.is_shadow_mapped))
        {
            uncached_static_lighting = true;

            if !self.config.unbuilt_preview_shadows_in_game && !self.config.is_editor_scene {
                casts_shadow = false;
            }
        }

        let on_often_moving_list = primitive.proxy.is_often_moving();
        let is_movable_point_light = flags.is_dynamic
            && self.config.feature_level == FeatureLevel::Mobile
            && light.proxy.light_type() == LightType::Point
            && light.proxy.is_movable();

        let edge_key = self.interactions.insert(LightPrimitiveInteraction {
            light_id,
            primitive: primitive_key,
            is_dynamic: flags.is_dynamic,
            is_light_mapped: flags.is_light_mapped,
            is_shadow_mapped: flags.is_shadow_mapped,
            casts_shadow,
            has_translucent_object_shadow: flags.has_translucent_object_shadow,
            has_inset_object_shadow: flags.has_inset_object_shadow,
            self_shadow_only: flags.self_shadow_only,
            uncached_static_lighting,
            is_movable_point_light,
            on_often_moving_list,
            prev_primitive: None,
            next_primitive: None,
            prev_light: None,
            next_light: None,
        });

        // Link into the light's list for this movability class
        let head = self.lights.get(light_id).and_then(|light| {
            if on_often_moving_list {
                light.often_moving_primitive_list
            } else {
                light.static_primitive_list
            }
        });
        let new_head = link_into_primitive_list(&mut self.interactions, head, edge_key);
        if let Some(light) = self.lights.get_mut(light_id) {
            if on_often_moving_list {
                light.often_moving_primitive_list = new_head;
            } else {
                light.static_primitive_list = new_head;
            }
            if uncached_static_lighting {
                light.num_unbuilt_interactions += 1;
            }
        }

        // Link into the primitive's light list
        let head = self
            .primitives
            .get(primitive_key)
            .and_then(|info| info.light_list);
        let new_head = link_into_light_list(&mut self.interactions, head, edge_key);
        if let Some(info) = self.primitives.get_mut(primitive_key) {
            info.light_list = new_head;
            if is_movable_point_light {
                info.num_movable_point_lights += 1;
            }
        }

        if uncached_static_lighting {
            self.num_uncached_static_lighting_interactions += 1;
        }

        // A new shadow caster under this light invalidates its cached
        // whole-scene shadow map, unless the primitive moves every frame
        // anyway
        if casts_shadow && !on_often_moving_list {
            self.cached_shadow_maps.remove(&light_id);
        }

        if is_movable_point_light {
            self.on_shader_path_changed(primitive_key);
        }
    }

    /// Unlink and destroy one interaction, rolling back every counter it
    /// contributed to
    fn destroy_interaction(&mut self, edge_key: InteractionKey) {
        let Some(edge) = self.interactions.get(edge_key) else {
            return;
        };
        let light_id = edge.light_id;
        let primitive_key = edge.primitive;
        let on_often_moving_list = edge.on_often_moving_list;
        let uncached_static_lighting = edge.uncached_static_lighting;
        let is_movable_point_light = edge.is_movable_point_light;
        let casts_shadow = edge.casts_shadow;

        // Unlink from the light's list
        let head = self.lights.get(light_id).and_then(|light| {
            if on_often_moving_list {
                light.often_moving_primitive_list
            } else {
                light.static_primitive_list
            }
        });
        let new_head = unlink_from_primitive_list(&mut self.interactions, head, edge_key);
        if let Some(light) = self.lights.get_mut(light_id) {
            if on_often_moving_list {
                light.often_moving_primitive_list = new_head;
            } else {
                light.static_primitive_list = new_head;
            }
            if uncached_static_lighting {
                light.num_unbuilt_interactions -= 1;
            }
        }

        // Unlink from the primitive's light list
        let head = self
            .primitives
            .get(primitive_key)
            .and_then(|info| info.light_list);
        let new_head = unlink_from_light_list(&mut self.interactions, head, edge_key);
        if let Some(info) = self.primitives.get_mut(primitive_key) {
            info.light_list = new_head;
            if is_movable_point_light {
                info.num_movable_point_lights -= 1;
            }
        }

        if uncached_static_lighting {
            self.num_uncached_static_lighting_interactions -= 1;
        }

        if casts_shadow && !on_often_moving_list {
            self.cached_shadow_maps.remove(&light_id);
        }

        self.interactions.remove(edge_key);

        if is_movable_point_light {
            self.on_shader_path_changed(primitive_key);
        }
    }

    /// The primitive's applicable shader path changed: its record flag word
    /// is stale and the host's cached draw state needs a rebuild
    fn on_shader_path_changed(&mut self, key: PrimitiveKey) {
        if let Some(info) = self.primitives.get(key) {
            self.gpu_scene.mark_dirty(info.packed_index);
        }
        if let Some(listener) = self.draw_state_listener.as_mut() {
            listener(key);
        }
    }
}
