//! # Scene Engine
//!
//! Scene-graph bookkeeping core for a 3D renderer: light/primitive
//! interaction management and batched GPU scene upload.
//!
//! ## Features
//!
//! - **Interaction Graph**: Intrusive doubly-linked edges between lights and
//!   primitives with O(1) create/destroy, derived shadow-casting flags, and
//!   unbuilt-lighting tracking
//! - **Span Allocator**: Grow-only free-list range allocator for packing
//!   variable-size per-primitive records into one flat GPU buffer
//! - **GPU Scene Sync**: Dirty-set tracking with coalesced once-per-frame
//!   scatter uploads to an injected destination buffer
//!
//! ## Quick Start
//!
//! ```rust
//! use scene_engine::prelude::*;
//! # use scene_engine::scene::PrimitiveRecordData;
//! # use nalgebra::{Matrix4, Vector3};
//! # struct DemoLight;
//! # impl LightProxy for DemoLight {
//! #     fn light_type(&self) -> LightType { LightType::Point }
//! #     fn mobility(&self) -> Mobility { Mobility::Movable }
//! #     fn casts_static_shadow(&self) -> bool { false }
//! #     fn casts_dynamic_shadow(&self) -> bool { true }
//! #     fn casts_translucent_shadows(&self) -> bool { false }
//! # }
//! # struct DemoPrimitive;
//! # impl PrimitiveProxy for DemoPrimitive {
//! #     fn light_relevance(&self, _light: &dyn LightProxy) -> LightRelevance {
//! #         LightRelevance { is_relevant: true, is_dynamic: true, is_light_mapped: false, is_shadow_mapped: false }
//! #     }
//! #     fn has_static_lighting(&self) -> bool { false }
//! #     fn has_valid_settings_for_static_lighting(&self) -> bool { true }
//! #     fn casts_static_shadow(&self) -> bool { false }
//! #     fn casts_dynamic_shadow(&self) -> bool { true }
//! #     fn casts_volumetric_translucent_shadow(&self) -> bool { false }
//! #     fn casts_inset_shadow(&self) -> bool { false }
//! #     fn casts_self_shadow_only(&self) -> bool { false }
//! #     fn is_often_moving(&self) -> bool { true }
//! #     fn primitive_record(&self) -> PrimitiveRecordData {
//! #         PrimitiveRecordData {
//! #             local_to_world: Matrix4::identity(),
//! #             bounds_origin: Vector3::zeros(),
//! #             bounds_extent: Vector3::zeros(),
//! #         }
//! #     }
//! # }
//! # struct DemoBuffer(Vec<u8>);
//! # impl ScatterUploadTarget for DemoBuffer {
//! #     fn resize(&mut self, num_bytes: usize) -> Result<(), UploadError> {
//! #         self.0.resize(num_bytes, 0);
//! #         Ok(())
//! #     }
//! #     fn scatter(&mut self, stride: usize, writes: &[ScatterWrite<'_>]) -> Result<(), UploadError> {
//! #         for w in writes {
//! #             let start = w.element_offset as usize * stride;
//! #             self.0[start..start + stride].copy_from_slice(w.data);
//! #         }
//! #         Ok(())
//! #     }
//! #     fn num_bytes(&self) -> usize { self.0.len() }
//! # }
//!
//! let mut scene = Scene::new(SceneConfig::default());
//!
//! let light = scene.add_light(Box::new(DemoLight));
//! let primitive = scene.add_primitive(Box::new(DemoPrimitive));
//! assert_eq!(scene.num_interactions(), 1);
//!
//! // Once per frame: push everything that changed to the GPU buffers.
//! let mut primitive_buffer = DemoBuffer(Vec::new());
//! let mut lightmap_buffer = DemoBuffer(Vec::new());
//! scene.flush(&mut primitive_buffer, &mut lightmap_buffer)?;
//! assert_eq!(scene.num_dirty_primitives(), 0);
//! # let _ = (light, primitive);
//! # Ok::<(), UploadError>(())
//! ```
//!
//! All mutation happens from one scene-owning thread; `flush` is the only
//! synchronization point with the upload side.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod gpu_scene;
pub mod scene;

pub use config::{Config, ConfigError, FeatureLevel, SceneConfig};
pub use gpu_scene::{GpuScene, GrowOnlySpanAllocator, ScatterUploadTarget, UploadError};
pub use scene::{LightId, LightProxy, PrimitiveKey, PrimitiveProxy, Scene};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, FeatureLevel, SceneConfig},
        gpu_scene::{GpuScene, ScatterUploadTarget, ScatterWrite, UploadError},
        scene::{
            LightId, LightProxy, LightRelevance, LightType, Mobility, PrimitiveKey,
            PrimitiveProxy, Scene,
        },
    };
}
