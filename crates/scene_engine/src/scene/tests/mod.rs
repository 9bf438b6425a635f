//! Integration tests for the interaction graph and GPU scene sync

use std::cell::Cell;
use std::rc::Rc;

use nalgebra::{Matrix4, Vector3, Vector4};

use crate::config::{FeatureLevel, SceneConfig};
use crate::gpu_scene::upload::testing::FakeUploadTarget;
use crate::gpu_scene::{
    PrimitiveRecord, PrimitiveRecordFlags, FLOAT4_SIZE, PRIMITIVE_RECORD_FLOAT4S,
};
use crate::scene::{
    LightProxy, LightRelevance, LightType, LightmapRecordData, LightmapType, Mobility,
    PrimitiveKey, PrimitiveProxy, PrimitiveRecordData, Scene,
};

const RECORD_BYTES: usize = PRIMITIVE_RECORD_FLOAT4S * FLOAT4_SIZE;

struct TestLight {
    light_type: LightType,
    mobility: Mobility,
    casts_static_shadow: bool,
    casts_dynamic_shadow: bool,
    casts_translucent_shadows: bool,
}

impl Default for TestLight {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            mobility: Mobility::Movable,
            casts_static_shadow: false,
            casts_dynamic_shadow: true,
            casts_translucent_shadows: false,
        }
    }
}

impl LightProxy for TestLight {
    fn light_type(&self) -> LightType {
        self.light_type
    }
    fn mobility(&self) -> Mobility {
        self.mobility
    }
    fn casts_static_shadow(&self) -> bool {
        self.casts_static_shadow
    }
    fn casts_dynamic_shadow(&self) -> bool {
        self.casts_dynamic_shadow
    }
    fn casts_translucent_shadows(&self) -> bool {
        self.casts_translucent_shadows
    }
}

struct TestPrimitive {
    /// Distinguishes serialized records in upload assertions
    position: f32,
    relevant: Rc<Cell<bool>>,
    is_light_mapped: bool,
    has_static_lighting: bool,
    casts_static_shadow: bool,
    casts_dynamic_shadow: bool,
    often_moving: bool,
    num_lightmaps: Rc<Cell<usize>>,
}

impl Default for TestPrimitive {
    fn default() -> Self {
        Self {
            position: 0.0,
            relevant: Rc::new(Cell::new(true)),
            is_light_mapped: false,
            has_static_lighting: false,
            casts_static_shadow: false,
            casts_dynamic_shadow: true,
            often_moving: true,
            num_lightmaps: Rc::new(Cell::new(0)),
        }
    }
}

impl PrimitiveProxy for TestPrimitive {
    fn light_relevance(&self, _light: &dyn LightProxy) -> LightRelevance {
        LightRelevance {
            is_relevant: self.relevant.get(),
            is_dynamic: true,
            is_light_mapped: self.is_light_mapped,
            is_shadow_mapped: false,
        }
    }
    fn has_static_lighting(&self) -> bool {
        self.has_static_lighting
    }
    fn has_valid_settings_for_static_lighting(&self) -> bool {
        true
    }
    fn casts_static_shadow(&self) -> bool {
        self.casts_static_shadow
    }
    fn casts_dynamic_shadow(&self) -> bool {
        self.casts_dynamic_shadow
    }
    fn casts_volumetric_translucent_shadow(&self) -> bool {
        false
    }
    fn casts_inset_shadow(&self) -> bool {
        false
    }
    fn casts_self_shadow_only(&self) -> bool {
        false
    }
    fn is_often_moving(&self) -> bool {
        self.often_moving
    }
    fn lightmap_type(&self) -> LightmapType {
        LightmapType::Default
    }
    fn primitive_record(&self) -> PrimitiveRecordData {
        PrimitiveRecordData {
            local_to_world: Matrix4::identity(),
            bounds_origin: Vector3::new(self.position, 0.0, 0.0),
            bounds_extent: Vector3::new(1.0, 1.0, 1.0),
        }
    }
    fn num_lightmap_entries(&self) -> usize {
        self.num_lightmaps.get()
    }
    #[allow(clippy::cast_precision_loss)]
    fn lightmap_record(&self, index: usize) -> LightmapRecordData {
        LightmapRecordData {
            coord_scale_bias: Vector4::new(self.position, index as f32, 0.0, 0.0),
            shadow_map_coord_scale_bias: Vector4::zeros(),
        }
    }
}

fn add_primitive_at(scene: &mut Scene, position: f32) -> PrimitiveKey {
    scene.add_primitive(Box::new(TestPrimitive {
        position,
        ..TestPrimitive::default()
    }))
}

fn record_at(target: &FakeUploadTarget, slot: usize) -> PrimitiveRecord {
    let bytes = &target.bytes[slot * RECORD_BYTES..(slot + 1) * RECORD_BYTES];
    bytemuck::pod_read_unaligned(bytes)
}

#[test]
fn test_end_to_end_interaction_lifecycle() {
    let mut scene = Scene::new(SceneConfig::default());

    let primitive = add_primitive_at(&mut scene, 1.0);
    let light = scene.add_light(Box::new(TestLight::default()));

    assert_eq!(scene.num_interactions(), 1);
    let (_, edge) = scene.primitive_interactions(primitive).next().unwrap();
    assert!(edge.casts_shadow());
    assert_eq!(edge.light_id(), light);
    assert_eq!(edge.primitive(), primitive);

    scene.remove_light(light);
    assert_eq!(scene.primitive_interactions(primitive).count(), 0);
    assert_eq!(scene.num_interactions(), 0);
}

#[test]
fn test_half_edge_symmetry() {
    let mut scene = Scene::new(SceneConfig::default());

    let primitives: Vec<PrimitiveKey> = (0..4)
        .map(|i| {
            scene.add_primitive(Box::new(TestPrimitive {
                position: i as f32,
                often_moving: i % 2 == 0,
                ..TestPrimitive::default()
            }))
        })
        .collect();
    let lights: Vec<_> = (0..3)
        .map(|_| scene.add_light(Box::new(TestLight::default())))
        .collect();

    assert_eq!(scene.num_interactions(), 12);

    // Walking the light lists and walking the primitive lists must describe
    // the same edge set
    let verify = |scene: &Scene| {
        for &primitive in &primitives {
            if scene.primitive(primitive).is_none() {
                continue;
            }
            let from_primitive = scene.primitive_interactions(primitive).count();
            let from_lights: usize = lights
                .iter()
                .map(|&light| {
                    scene
                        .light_interactions(light)
                        .filter(|(_, edge)| edge.primitive() == primitive)
                        .count()
                })
                .sum();
            assert_eq!(from_primitive, from_lights);
        }
    };
    verify(&scene);

    scene.remove_light(lights[1]);
    assert_eq!(scene.num_interactions(), 8);
    verify(&scene);

    scene.remove_primitive(primitives[2]);
    assert_eq!(scene.num_interactions(), 6);
    verify(&scene);

    // Both per-light lists stay consistent with the slab size
    let total: usize = lights
        .iter()
        .map(|&light| scene.light_interactions(light).count())
        .sum();
    assert_eq!(total, scene.num_interactions());
}

#[test]
fn test_unbuilt_counters_restore_on_destroy() {
    let mut scene = Scene::new(SceneConfig::default());

    // Static light over a static-lighting, static-shadow-casting primitive:
    // the baked data does not exist yet, so the edge counts as unbuilt
    let light = scene.add_light(Box::new(TestLight {
        mobility: Mobility::Static,
        casts_static_shadow: true,
        ..TestLight::default()
    }));
    assert_eq!(scene.num_uncached_static_lighting_interactions(), 0);

    let primitive = scene.add_primitive(Box::new(TestPrimitive {
        has_static_lighting: true,
        casts_static_shadow: true,
        often_moving: false,
        ..TestPrimitive::default()
    }));

    assert_eq!(scene.num_uncached_static_lighting_interactions(), 1);
    assert_eq!(scene.light(light).unwrap().num_unbuilt_interactions(), 1);
    let (_, edge) = scene.primitive_interactions(primitive).next().unwrap();
    assert!(edge.has_uncached_static_lighting());
    assert!(edge.casts_shadow());

    scene.remove_primitive(primitive);
    assert_eq!(scene.num_uncached_static_lighting_interactions(), 0);
    assert_eq!(scene.light(light).unwrap().num_unbuilt_interactions(), 0);
}

#[test]
fn test_unbuilt_preview_shadows_disabled_in_game() {
    let mut scene = Scene::new(SceneConfig {
        unbuilt_preview_shadows_in_game: false,
        ..SceneConfig::default()
    });

    let _light = scene.add_light(Box::new(TestLight {
        mobility: Mobility::Static,
        casts_static_shadow: true,
        ..TestLight::default()
    }));
    let primitive = scene.add_primitive(Box::new(TestPrimitive {
        has_static_lighting: true,
        casts_static_shadow: true,
        ..TestPrimitive::default()
    }));

    // Still tracked as unbuilt, but the expensive preview shadow is skipped
    let (_, edge) = scene.primitive_interactions(primitive).next().unwrap();
    assert!(edge.has_uncached_static_lighting());
    assert!(!edge.casts_shadow());
    assert_eq!(scene.num_uncached_static_lighting_interactions(), 1);
}

#[test]
fn test_flush_uploads_latest_state_exactly_once() {
    let mut scene = Scene::new(SceneConfig::default());
    let a = add_primitive_at(&mut scene, 1.0);
    let _b = add_primitive_at(&mut scene, 2.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();

    // Both slots dirty, and marking one again collapses
    scene.mark_primitive_dirty(a);
    assert_eq!(scene.num_dirty_primitives(), 2);

    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_primitive_uploads, 2);
    assert_eq!(scene.num_dirty_primitives(), 0);

    assert_eq!(primitive_buffer.scatter_calls.len(), 1);
    assert_eq!(primitive_buffer.scatter_calls[0].len(), 2);
    assert_eq!(record_at(&primitive_buffer, 0).bounds_origin[0], 1.0);
    assert_eq!(record_at(&primitive_buffer, 1).bounds_origin[0], 2.0);

    // Nothing dirty: the next flush transfers nothing
    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_primitive_uploads, 0);
    assert_eq!(primitive_buffer.scatter_calls.len(), 1);
}

#[test]
fn test_failed_resize_preserves_dirty_set() {
    let mut scene = Scene::new(SceneConfig::default());
    let _a = add_primitive_at(&mut scene, 1.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    primitive_buffer.fail_resize = true;

    let before = scene.num_dirty_primitives();
    assert!(scene.flush(&mut primitive_buffer, &mut lightmap_buffer).is_err());
    assert_eq!(scene.num_dirty_primitives(), before);

    // Retry succeeds and drains the set
    primitive_buffer.fail_resize = false;
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(scene.num_dirty_primitives(), 0);
    assert_eq!(record_at(&primitive_buffer, 0).bounds_origin[0], 1.0);
}

#[test]
fn test_failed_scatter_preserves_dirty_set() {
    let mut scene = Scene::new(SceneConfig::default());
    let _a = add_primitive_at(&mut scene, 1.0);
    let _b = add_primitive_at(&mut scene, 2.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    primitive_buffer.fail_scatter = true;

    assert!(scene.flush(&mut primitive_buffer, &mut lightmap_buffer).is_err());
    assert_eq!(scene.num_dirty_primitives(), 2);

    primitive_buffer.fail_scatter = false;
    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_primitive_uploads, 2);
    assert_eq!(scene.num_dirty_primitives(), 0);
}

#[test]
fn test_failed_lightmap_scatter_preserves_dirty_set() {
    let mut scene = Scene::new(SceneConfig::default());
    let _a = scene.add_primitive(Box::new(TestPrimitive {
        position: 1.0,
        num_lightmaps: Rc::new(Cell::new(2)),
        ..TestPrimitive::default()
    }));

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    lightmap_buffer.fail_scatter = true;

    // The primitive transfer lands first; the lightmap failure still keeps
    // the whole dirty set for retry
    assert!(scene.flush(&mut primitive_buffer, &mut lightmap_buffer).is_err());
    assert_eq!(scene.num_dirty_primitives(), 1);
    assert_eq!(primitive_buffer.scatter_calls.len(), 1);
    assert!(lightmap_buffer.scatter_calls.is_empty());

    // Retry re-writes the primitive record (idempotent) and the lightmaps
    lightmap_buffer.fail_scatter = false;
    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_primitive_uploads, 1);
    assert_eq!(stats.num_lightmap_uploads, 2);
    assert_eq!(scene.num_dirty_primitives(), 0);
    assert_eq!(lightmap_buffer.scatter_calls.len(), 1);
}

#[test]
fn test_stale_dirty_index_writes_zero_record() {
    let mut scene = Scene::new(SceneConfig::default());
    let _a = add_primitive_at(&mut scene, 1.0);
    let b = add_primitive_at(&mut scene, 2.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(record_at(&primitive_buffer, 1).bounds_origin[0], 2.0);

    // Removing the tail primitive leaves a stale mark on slot 1
    scene.remove_primitive(b);
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(record_at(&primitive_buffer, 1), bytemuck::Zeroable::zeroed());
    // The surviving primitive's slot is untouched
    assert_eq!(record_at(&primitive_buffer, 0).bounds_origin[0], 1.0);
}

#[test]
fn test_swap_remove_repacks_moved_primitive() {
    let mut scene = Scene::new(SceneConfig::default());
    let a = add_primitive_at(&mut scene, 1.0);
    let _b = add_primitive_at(&mut scene, 2.0);
    let c = add_primitive_at(&mut scene, 3.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();

    // Removing the head swap-fills the last primitive into slot 0
    scene.remove_primitive(a);
    assert_eq!(scene.primitive(c).unwrap().packed_index(), 0);

    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(record_at(&primitive_buffer, 0).bounds_origin[0], 3.0);
    assert_eq!(record_at(&primitive_buffer, 2), bytemuck::Zeroable::zeroed());
}

#[test]
fn test_movable_point_light_shader_path_tracking() {
    let mut scene = Scene::new(SceneConfig {
        feature_level: FeatureLevel::Mobile,
        ..SceneConfig::default()
    });
    let rebuilds = Rc::new(Cell::new(0u32));
    let listener_rebuilds = Rc::clone(&rebuilds);
    scene.set_draw_state_listener(Box::new(move |_key| {
        listener_rebuilds.set(listener_rebuilds.get() + 1);
    }));

    let primitive = add_primitive_at(&mut scene, 1.0);
    let light = scene.add_light(Box::new(TestLight::default()));

    assert_eq!(scene.primitive(primitive).unwrap().num_movable_point_lights(), 1);
    assert_eq!(rebuilds.get(), 1);

    // The specialized shader path shows up in the uploaded flag word
    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    let flags = PrimitiveRecordFlags::from_bits_truncate(record_at(&primitive_buffer, 0).flags);
    assert!(flags.contains(PrimitiveRecordFlags::HAS_MOVABLE_POINT_LIGHT_INTERACTION));

    scene.remove_light(light);
    assert_eq!(scene.primitive(primitive).unwrap().num_movable_point_lights(), 0);
    assert_eq!(rebuilds.get(), 2);

    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    let flags = PrimitiveRecordFlags::from_bits_truncate(record_at(&primitive_buffer, 0).flags);
    assert!(!flags.contains(PrimitiveRecordFlags::HAS_MOVABLE_POINT_LIGHT_INTERACTION));
}

#[test]
fn test_desktop_feature_level_skips_point_light_tracking() {
    let mut scene = Scene::new(SceneConfig::default());
    let primitive = add_primitive_at(&mut scene, 1.0);
    let _light = scene.add_light(Box::new(TestLight::default()));
    assert_eq!(scene.primitive(primitive).unwrap().num_movable_point_lights(), 0);
}

#[test]
fn test_lightmap_span_reallocation() {
    let mut scene = Scene::new(SceneConfig::default());

    let counts_a = Rc::new(Cell::new(2usize));
    let a = scene.add_primitive(Box::new(TestPrimitive {
        position: 1.0,
        num_lightmaps: Rc::clone(&counts_a),
        ..TestPrimitive::default()
    }));
    let _b = scene.add_primitive(Box::new(TestPrimitive {
        position: 2.0,
        num_lightmaps: Rc::new(Cell::new(3)),
        ..TestPrimitive::default()
    }));

    assert_eq!(scene.primitive(a).unwrap().lightmap_data_offset(), 0);
    assert_eq!(scene.lightmap_data_max_size(), 5);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_lightmap_uploads, 5);
    assert_eq!(lightmap_buffer.scatter_calls.len(), 1);

    // The entry count changed: the old span is freed and a larger one
    // allocated. The freed (0, 2) span cannot fit 4 entries, so the new span
    // comes from the tail.
    counts_a.set(4);
    scene.mark_primitive_dirty(a);
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();

    let info = scene.primitive(a).unwrap();
    assert_eq!(info.lightmap_data_offset(), 5);
    assert_eq!(scene.lightmap_data_max_size(), 9);

    // The uploaded record advertises the new span
    let record = record_at(&primitive_buffer, 0);
    assert_eq!(record.lightmap_data_offset, 5);
    assert_eq!(record.num_lightmap_entries, 4);
}

#[test]
fn test_upload_every_frame_resends_all() {
    let mut scene = Scene::new(SceneConfig {
        upload_every_frame: true,
        ..SceneConfig::default()
    });
    let _a = add_primitive_at(&mut scene, 1.0);
    let _b = add_primitive_at(&mut scene, 2.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();

    // Nothing was marked dirty, but every primitive goes up again
    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_primitive_uploads, 2);
    assert_eq!(primitive_buffer.scatter_calls.len(), 2);
}

#[test]
fn test_mark_all_primitives_dirty() {
    let mut scene = Scene::new(SceneConfig::default());
    let _a = add_primitive_at(&mut scene, 1.0);
    let _b = add_primitive_at(&mut scene, 2.0);

    let mut primitive_buffer = FakeUploadTarget::new();
    let mut lightmap_buffer = FakeUploadTarget::new();
    scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();

    scene.mark_all_primitives_dirty();
    let stats = scene.flush(&mut primitive_buffer, &mut lightmap_buffer).unwrap();
    assert_eq!(stats.num_primitive_uploads, 2);
}

#[test]
fn test_reevaluation_is_explicit() {
    let mut scene = Scene::new(SceneConfig::default());
    let _light = scene.add_light(Box::new(TestLight::default()));

    let relevant = Rc::new(Cell::new(false));
    let primitive = scene.add_primitive(Box::new(TestPrimitive {
        relevant: Rc::clone(&relevant),
        ..TestPrimitive::default()
    }));
    assert_eq!(scene.num_interactions(), 0);

    // Relevance flipping by itself changes nothing; the edge appears only
    // once the caller triggers re-evaluation
    relevant.set(true);
    assert_eq!(scene.num_interactions(), 0);
    scene.reevaluate_primitive_interactions(primitive);
    assert_eq!(scene.num_interactions(), 1);

    relevant.set(false);
    scene.reevaluate_primitive_interactions(primitive);
    assert_eq!(scene.num_interactions(), 0);
}

#[test]
fn test_light_reevaluation() {
    let mut scene = Scene::new(SceneConfig::default());
    let relevant = Rc::new(Cell::new(true));
    let _a = scene.add_primitive(Box::new(TestPrimitive {
        relevant: Rc::clone(&relevant),
        ..TestPrimitive::default()
    }));
    let light = scene.add_light(Box::new(TestLight::default()));
    assert_eq!(scene.num_interactions(), 1);

    relevant.set(false);
    scene.reevaluate_light_interactions(light);
    assert_eq!(scene.num_interactions(), 0);
}

#[test]
fn test_cached_shadow_map_invalidation() {
    let mut scene = Scene::new(SceneConfig::default());
    let light = scene.add_light(Box::new(TestLight::default()));

    scene.mark_shadow_map_cached(light);
    assert!(scene.has_cached_shadow_map(light));

    // A new shadow-casting edge with a rarely-moving primitive invalidates
    // the cached map
    let primitive = scene.add_primitive(Box::new(TestPrimitive {
        often_moving: false,
        ..TestPrimitive::default()
    }));
    assert!(!scene.has_cached_shadow_map(light));

    scene.mark_shadow_map_cached(light);
    scene.remove_primitive(primitive);
    assert!(!scene.has_cached_shadow_map(light));

    // Often-moving primitives never land in the cached map anyway, so they
    // do not invalidate it
    scene.mark_shadow_map_cached(light);
    let _mover = add_primitive_at(&mut scene, 4.0);
    assert!(scene.has_cached_shadow_map(light));
}

#[test]
fn test_num_dynamic_lights_affecting_primitive() {
    let mut scene = Scene::new(SceneConfig::default());
    let _l1 = scene.add_light(Box::new(TestLight::default()));
    let _l2 = scene.add_light(Box::new(TestLight::default()));

    let lit = add_primitive_at(&mut scene, 1.0);
    assert_eq!(scene.num_dynamic_lights_affecting_primitive(lit), 2);

    // Light-mapped interactions are not counted as dynamic lights
    let baked = scene.add_primitive(Box::new(TestPrimitive {
        is_light_mapped: true,
        ..TestPrimitive::default()
    }));
    assert_eq!(scene.num_dynamic_lights_affecting_primitive(baked), 0);
}

#[test]
fn test_light_id_reuse_after_full_unlink() {
    let mut scene = Scene::new(SceneConfig::default());
    let primitive = add_primitive_at(&mut scene, 1.0);

    let first = scene.add_light(Box::new(TestLight::default()));
    scene.remove_light(first);
    assert_eq!(scene.primitive_interactions(primitive).count(), 0);

    // The recycled id starts with a clean interaction list
    let second = scene.add_light(Box::new(TestLight {
        casts_dynamic_shadow: false,
        ..TestLight::default()
    }));
    assert_eq!(second, first);
    let edges: Vec<_> = scene.light_interactions(second).collect();
    assert_eq!(edges.len(), 1);
    assert!(!edges[0].1.casts_shadow());
}
