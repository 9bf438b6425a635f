//! Primitive scene bookkeeping
//!
//! Primitives live in a slot map with stable keys, plus a packed array whose
//! order is the GPU buffer slot order. The packed index moves on removal
//! (swap-remove); the key never does, so interactions reference primitives by
//! key.

use nalgebra::{Matrix4, Vector3, Vector4};
use slotmap::new_key_type;

use crate::scene::interaction::InteractionKey;
use crate::scene::lights::LightProxy;

new_key_type! {
    /// Stable key of a primitive within the scene
    pub struct PrimitiveKey;
}

/// How a primitive's lightmaps were authored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightmapType {
    /// Lightmap usage follows the primitive's mobility
    Default,
    /// Surface lightmaps forced on, even for movable primitives. Such
    /// primitives keep their baked data when moved into a new light's
    /// influence and must not be counted as unbuilt.
    ForceSurface,
    /// Volumetric/per-object lighting samples forced on
    ForceVolumetric,
}

/// A primitive's relevance to one specific light
///
/// Produced by [`PrimitiveProxy::light_relevance`]. The defaults match an
/// unknown pairing: assumed dynamic and light-mapped until the host's
/// lighting cache says otherwise, and not relevant at all unless the host
/// opts in.
#[derive(Debug, Clone, Copy)]
pub struct LightRelevance {
    /// The pair affects each other at all (bounds overlap, channels match)
    pub is_relevant: bool,
    /// The light applies dynamically rather than through fully baked data
    pub is_dynamic: bool,
    /// The light is represented in the primitive's lightmap
    pub is_light_mapped: bool,
    /// The light's shadowing onto this primitive is baked into a shadow map
    pub is_shadow_mapped: bool,
}

impl Default for LightRelevance {
    fn default() -> Self {
        Self {
            is_relevant: false,
            is_dynamic: true,
            is_light_mapped: true,
            is_shadow_mapped: false,
        }
    }
}

/// Fixed-size scene data a primitive contributes to its GPU record
#[derive(Debug, Clone, Copy)]
pub struct PrimitiveRecordData {
    /// Object-to-world transform
    pub local_to_world: Matrix4<f32>,
    /// World-space bounds center
    pub bounds_origin: Vector3<f32>,
    /// World-space bounds half-extent
    pub bounds_extent: Vector3<f32>,
}

/// One variable-length lightmap sub-record of a primitive
#[derive(Debug, Clone, Copy)]
pub struct LightmapRecordData {
    /// Lightmap UV scale (xy) and bias (zw)
    pub coord_scale_bias: Vector4<f32>,
    /// Shadow map UV scale (xy) and bias (zw)
    pub shadow_map_coord_scale_bias: Vector4<f32>,
}

/// Capabilities the scene requires from the host's primitive objects
///
/// Injected at [`Scene::add_primitive`](crate::scene::Scene::add_primitive).
/// Relevance is consulted only when interactions are (re)built, never
/// continuously; a host that changes a primitive's lighting properties must
/// trigger re-evaluation itself.
pub trait PrimitiveProxy {
    /// This primitive's relevance to the given light
    fn light_relevance(&self, light: &dyn LightProxy) -> LightRelevance;

    /// Whether the primitive uses baked lighting
    fn has_static_lighting(&self) -> bool;

    /// Whether the primitive's static lighting setup is usable (nonzero
    /// lightmap resolution, valid UVs). Primitives failing this must not keep
    /// lighting unbuilt forever after a build.
    fn has_valid_settings_for_static_lighting(&self) -> bool;

    /// Whether the primitive casts baked shadows
    fn casts_static_shadow(&self) -> bool;

    /// Whether the primitive casts dynamically rendered shadows
    fn casts_dynamic_shadow(&self) -> bool;

    /// Whether the primitive casts a volumetric shadow when translucent
    fn casts_volumetric_translucent_shadow(&self) -> bool;

    /// Whether the primitive wants a per-object inset shadow
    fn casts_inset_shadow(&self) -> bool;

    /// Whether the primitive only shadows itself
    fn casts_self_shadow_only(&self) -> bool;

    /// Hint that this primitive moves most frames, so per-light caches keyed
    /// on it are not worth keeping
    fn is_often_moving(&self) -> bool;

    /// How the primitive's lightmaps were authored
    fn lightmap_type(&self) -> LightmapType {
        LightmapType::Default
    }

    /// Current fixed-size record contents
    fn primitive_record(&self) -> PrimitiveRecordData;

    /// Number of lightmap sub-records this primitive currently carries
    fn num_lightmap_entries(&self) -> usize {
        0
    }

    /// Serialize lightmap sub-record `index`, `0..num_lightmap_entries()`
    fn lightmap_record(&self, index: usize) -> LightmapRecordData {
        let _ = index;
        LightmapRecordData {
            coord_scale_bias: Vector4::zeros(),
            shadow_map_coord_scale_bias: Vector4::zeros(),
        }
    }
}

/// Per-primitive bookkeeping owned by the scene
pub struct PrimitiveSceneInfo {
    /// Capability proxy supplied by the host
    pub(crate) proxy: Box<dyn PrimitiveProxy>,

    /// Slot in the packed primitive array, and therefore in the GPU buffer.
    /// Changes when another primitive's removal swap-fills this one in.
    pub(crate) packed_index: usize,

    /// Head of this primitive's interaction list
    pub(crate) light_list: Option<InteractionKey>,

    /// Movable point lights currently affecting this primitive; nonzero
    /// selects the specialized dynamic-lighting shader path on mobile
    pub(crate) num_movable_point_lights: u32,

    /// Base offset of this primitive's lightmap span in the packed buffer
    pub(crate) lightmap_data_offset: u32,

    /// Lightmap entry count the current span was sized for
    pub(crate) num_lightmap_entries: u32,
}

impl PrimitiveSceneInfo {
    pub(crate) fn new(
        proxy: Box<dyn PrimitiveProxy>,
        packed_index: usize,
        lightmap_data_offset: u32,
        num_lightmap_entries: u32,
    ) -> Self {
        Self {
            proxy,
            packed_index,
            light_list: None,
            num_movable_point_lights: 0,
            lightmap_data_offset,
            num_lightmap_entries,
        }
    }

    /// The injected capability proxy
    pub fn proxy(&self) -> &dyn PrimitiveProxy {
        &*self.proxy
    }

    /// Current slot in the packed primitive array / GPU buffer
    pub fn packed_index(&self) -> usize {
        self.packed_index
    }

    /// Movable point lights currently affecting this primitive
    pub fn num_movable_point_lights(&self) -> u32 {
        self.num_movable_point_lights
    }

    /// Base offset of this primitive's lightmap span
    pub fn lightmap_data_offset(&self) -> u32 {
        self.lightmap_data_offset
    }
}
