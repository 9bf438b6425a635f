//! GPU scene synchronization
//!
//! Mirrors CPU-side scene state into flat GPU-resident buffers: one fixed
//! stride record per primitive, indexed by packed primitive index, plus a
//! second buffer of variable-length lightmap sub-records placed by a
//! grow-only span allocator.
//!
//! Changes are tracked in a dirty set and pushed once per frame by
//! [`flush`](crate::scene::Scene::flush) as a single scatter transfer per
//! buffer. A failed flush leaves the dirty set untouched, so no pending
//! update is ever lost; the next flush retries everything.

pub mod span_allocator;
pub mod upload;

pub use span_allocator::GrowOnlySpanAllocator;
pub use upload::{
    LightmapRecord, PrimitiveRecord, PrimitiveRecordFlags, ScatterUploadBuilder,
    ScatterUploadTarget, ScatterWrite, UploadError, FLOAT4_SIZE, LIGHTMAP_RECORD_FLOAT4S,
    PRIMITIVE_RECORD_FLOAT4S,
};

use std::collections::HashSet;

use bytemuck::Zeroable;
use slotmap::SlotMap;

use crate::config::SceneConfig;
use crate::scene::primitives::{PrimitiveKey, PrimitiveSceneInfo};

/// Counts of records transmitted by a successful flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Primitive records written, including zeroed stale slots
    pub num_primitive_uploads: usize,
    /// Lightmap sub-records written
    pub num_lightmap_uploads: usize,
}

/// Dirty tracking and batched upload state for one scene
pub struct GpuScene {
    /// Packed indices whose records changed since the last successful flush
    primitives_to_update: HashSet<usize>,

    /// Replace the dirty set with every live primitive on the next flush
    update_all_primitives: bool,

    upload_every_frame: bool,
    max_pooled_upload_bytes: usize,

    /// Placement of variable-length lightmap spans in the lightmap buffer
    lightmap_data_allocator: GrowOnlySpanAllocator,

    primitives_upload: ScatterUploadBuilder,
    lightmap_upload: ScatterUploadBuilder,
}

impl GpuScene {
    pub(crate) fn new(config: &SceneConfig) -> Self {
        Self {
            primitives_to_update: HashSet::new(),
            update_all_primitives: false,
            upload_every_frame: config.upload_every_frame,
            max_pooled_upload_bytes: config.max_pooled_upload_bytes,
            lightmap_data_allocator: GrowOnlySpanAllocator::new(),
            primitives_upload: ScatterUploadBuilder::new(PRIMITIVE_RECORD_FLOAT4S),
            lightmap_upload: ScatterUploadBuilder::new(LIGHTMAP_RECORD_FLOAT4S),
        }
    }

    /// Mark one packed index as needing upload; duplicates collapse
    pub fn mark_dirty(&mut self, packed_index: usize) {
        self.primitives_to_update.insert(packed_index);
    }

    /// Mark every live primitive as needing upload on the next flush
    pub fn mark_all_dirty(&mut self) {
        self.update_all_primitives = true;
    }

    /// Number of indices currently pending upload
    pub fn num_dirty(&self) -> usize {
        self.primitives_to_update.len()
    }

    /// Whether the given packed index is pending upload
    pub fn is_dirty(&self, packed_index: usize) -> bool {
        self.primitives_to_update.contains(&packed_index)
    }

    /// High-water mark of the lightmap span address space, in entries
    pub fn lightmap_data_max_size(&self) -> u32 {
        self.lightmap_data_allocator.max_size()
    }

    pub(crate) fn lightmap_allocator_mut(&mut self) -> &mut GrowOnlySpanAllocator {
        &mut self.lightmap_data_allocator
    }

    /// Serialize all dirty primitives and push them in one scatter transfer
    /// per destination buffer.
    ///
    /// Fails atomically with respect to the dirty set: on any resize or
    /// transfer error the set is exactly what it was before the call.
    pub(crate) fn flush(
        &mut self,
        primitives: &mut SlotMap<PrimitiveKey, PrimitiveSceneInfo>,
        packed: &[PrimitiveKey],
        primitive_buffer: &mut dyn ScatterUploadTarget,
        lightmap_buffer: &mut dyn ScatterUploadTarget,
    ) -> Result<FlushStats, UploadError> {
        if self.upload_every_frame || self.update_all_primitives {
            self.primitives_to_update.clear();
            self.primitives_to_update.extend(0..packed.len());
            self.update_all_primitives = false;
        }

        // Deterministic upload order
        let mut dirty_indices: Vec<usize> = self.primitives_to_update.iter().copied().collect();
        dirty_indices.sort_unstable();

        // Re-place lightmap spans whose entry count changed, before sizing
        // the lightmap buffer off the allocator's high-water mark
        for &index in &dirty_indices {
            if let Some(&key) = packed.get(index) {
                let info = &mut primitives[key];
                let current = u32::try_from(info.proxy.num_lightmap_entries()).unwrap_or(0);
                if current != info.num_lightmap_entries {
                    if info.num_lightmap_entries > 0 {
                        self.lightmap_data_allocator
                            .free(info.lightmap_data_offset, info.num_lightmap_entries);
                    }
                    info.lightmap_data_offset = if current > 0 {
                        self.lightmap_data_allocator.allocate(current)
                    } else {
                        0
                    };
                    info.num_lightmap_entries = current;
                }
            }
        }

        // Reserve enough space; growing never shrinks
        let primitive_target_bytes =
            (packed.len() * PRIMITIVE_RECORD_FLOAT4S).next_power_of_two() * FLOAT4_SIZE;
        if primitive_target_bytes > primitive_buffer.num_bytes() {
            primitive_buffer.resize(primitive_target_bytes)?;
        }

        let lightmap_target_bytes = (self.lightmap_data_allocator.max_size() as usize
            * LIGHTMAP_RECORD_FLOAT4S)
            .next_power_of_two()
            * FLOAT4_SIZE;
        if lightmap_target_bytes > lightmap_buffer.num_bytes() {
            lightmap_buffer.resize(lightmap_target_bytes)?;
        }

        if dirty_indices.is_empty() {
            return Ok(FlushStats::default());
        }

        self.primitives_upload.clear();
        self.lightmap_upload.clear();

        let stride_bytes = PRIMITIVE_RECORD_FLOAT4S * FLOAT4_SIZE;
        let num_buffer_slots = primitive_buffer.num_bytes() / stride_bytes;

        for &index in &dirty_indices {
            if let Some(&key) = packed.get(index) {
                let info = &primitives[key];
                let record = PrimitiveRecord::new(
                    &info.proxy.primitive_record(),
                    Self::record_flags(info),
                    info.lightmap_data_offset,
                    info.num_lightmap_entries,
                );
                self.primitives_upload
                    .add(u32::try_from(index).unwrap_or(u32::MAX), bytemuck::bytes_of(&record));

                for i in 0..info.num_lightmap_entries {
                    let lightmap = LightmapRecord::from(&info.proxy.lightmap_record(i as usize));
                    self.lightmap_upload
                        .add(info.lightmap_data_offset + i, bytemuck::bytes_of(&lightmap));
                }
            } else if index < num_buffer_slots {
                // Stale dirty index: the primitive died since it was marked.
                // Write a zero record to the slot instead of skipping it, so
                // shader paths still addressing the slot read inert data.
                // Slots past the buffer's end never existed; nothing can
                // address those.
                let record = PrimitiveRecord::zeroed();
                self.primitives_upload
                    .add(u32::try_from(index).unwrap_or(u32::MAX), bytemuck::bytes_of(&record));
            }
        }

        self.primitives_upload.upload_to(primitive_buffer)?;
        if self.lightmap_upload.num_writes() > 0 {
            self.lightmap_upload.upload_to(lightmap_buffer)?;
        }

        let stats = FlushStats {
            num_primitive_uploads: self.primitives_upload.num_writes(),
            num_lightmap_uploads: self.lightmap_upload.num_writes(),
        };

        log::debug!(
            "GPU scene flush: {} primitive records, {} lightmap records",
            stats.num_primitive_uploads,
            stats.num_lightmap_uploads
        );

        self.primitives_to_update.clear();
        self.primitives_upload.clear();
        self.lightmap_upload.clear();
        self.primitives_upload
            .release_scratch_if_larger_than(self.max_pooled_upload_bytes);
        self.lightmap_upload
            .release_scratch_if_larger_than(self.max_pooled_upload_bytes);

        Ok(stats)
    }

    fn record_flags(info: &PrimitiveSceneInfo) -> PrimitiveRecordFlags {
        let mut flags = PrimitiveRecordFlags::empty();
        if info.proxy.has_static_lighting() {
            flags |= PrimitiveRecordFlags::HAS_STATIC_LIGHTING;
        }
        if info.proxy.is_often_moving() {
            flags |= PrimitiveRecordFlags::OFTEN_MOVING;
        }
        if info.proxy.casts_dynamic_shadow() {
            flags |= PrimitiveRecordFlags::CASTS_DYNAMIC_SHADOW;
        }
        if info.proxy.casts_self_shadow_only() {
            flags |= PrimitiveRecordFlags::SELF_SHADOW_ONLY;
        }
        if info.num_movable_point_lights > 0 {
            flags |= PrimitiveRecordFlags::HAS_MOVABLE_POINT_LIGHT_INTERACTION;
        }
        flags
    }
}
