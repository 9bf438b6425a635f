//! Scatter upload plumbing
//!
//! The scene never talks to a graphics API directly. It serializes packed
//! records, batches them into one scatter transfer per destination buffer,
//! and hands the batch to an injected [`ScatterUploadTarget`]. The host wires
//! that trait to its RHI (storage buffer + compute scatter, staging copies,
//! whatever fits); tests wire it to a plain `Vec`.

use bytemuck::{Pod, Zeroable};

use crate::scene::primitives::{LightmapRecordData, PrimitiveRecordData};

/// Size of one float4 element in bytes
pub const FLOAT4_SIZE: usize = 16;

/// Stride of a packed primitive record, in float4s
pub const PRIMITIVE_RECORD_FLOAT4S: usize = 7;

/// Stride of a packed lightmap record, in float4s
pub const LIGHTMAP_RECORD_FLOAT4S: usize = 2;

/// Errors from the upload destination
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    /// The destination buffer could not be resized
    #[error("destination buffer resize to {requested_bytes} bytes failed: {reason}")]
    ResizeFailed {
        /// Byte size that was requested
        requested_bytes: usize,
        /// Sink-reported reason
        reason: String,
    },

    /// The scatter transfer failed
    #[error("scatter transfer of {num_writes} writes failed: {reason}")]
    TransferFailed {
        /// Number of writes in the failed batch
        num_writes: usize,
        /// Sink-reported reason
        reason: String,
    },
}

/// One write of a batched scatter transfer
#[derive(Debug, Clone, Copy)]
pub struct ScatterWrite<'a> {
    /// Destination offset in elements (record strides), not bytes
    pub element_offset: u32,
    /// Record payload; length is the batch's stride
    pub data: &'a [u8],
}

/// Destination buffer for batched scene uploads
///
/// Conceptually a GPU buffer, but any write-combined remote store works.
/// `resize` only ever grows; the caller never requests a shrink.
pub trait ScatterUploadTarget {
    /// Grow the buffer to at least `num_bytes`
    fn resize(&mut self, num_bytes: usize) -> Result<(), UploadError>;

    /// Apply all `writes` in one transfer
    fn scatter(&mut self, stride_bytes: usize, writes: &[ScatterWrite<'_>]) -> Result<(), UploadError>;

    /// Current buffer size in bytes
    fn num_bytes(&self) -> usize;
}

/// Accumulates stride-sized records and issues them as one scatter transfer
///
/// Scratch storage is pooled across flushes; [`release_scratch_if_larger_than`]
/// caps what is kept.
///
/// [`release_scratch_if_larger_than`]: ScatterUploadBuilder::release_scratch_if_larger_than
pub struct ScatterUploadBuilder {
    stride_bytes: usize,
    element_offsets: Vec<u32>,
    data: Vec<u8>,
}

impl ScatterUploadBuilder {
    /// Create a builder for records of `stride_float4s` float4s
    pub fn new(stride_float4s: usize) -> Self {
        Self {
            stride_bytes: stride_float4s * FLOAT4_SIZE,
            element_offsets: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Queue one record at the given element offset
    pub fn add(&mut self, element_offset: u32, record: &[u8]) {
        debug_assert_eq!(record.len(), self.stride_bytes);
        self.element_offsets.push(element_offset);
        self.data.extend_from_slice(record);
    }

    /// Number of records queued
    pub fn num_writes(&self) -> usize {
        self.element_offsets.len()
    }

    /// Issue all queued records as one transfer, leaving the queue intact
    ///
    /// The queue is kept so a failed flush can be retried; the caller clears
    /// it on success.
    pub fn upload_to(&self, target: &mut dyn ScatterUploadTarget) -> Result<(), UploadError> {
        let writes: Vec<ScatterWrite<'_>> = self
            .element_offsets
            .iter()
            .zip(self.data.chunks_exact(self.stride_bytes))
            .map(|(&element_offset, data)| ScatterWrite {
                element_offset,
                data,
            })
            .collect();

        target.scatter(self.stride_bytes, &writes)
    }

    /// Drop all queued records, keeping scratch capacity for reuse
    pub fn clear(&mut self) {
        self.element_offsets.clear();
        self.data.clear();
    }

    /// Release pooled scratch storage if it grew beyond `max_bytes`
    pub fn release_scratch_if_larger_than(&mut self, max_bytes: usize) {
        if self.data.capacity() > max_bytes {
            self.data = Vec::new();
            self.element_offsets = Vec::new();
        }
    }

    /// Bytes of pooled scratch currently held
    pub fn scratch_bytes(&self) -> usize {
        self.data.capacity()
    }
}

bitflags::bitflags! {
    /// Flag word of a packed primitive record
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrimitiveRecordFlags: u32 {
        /// Primitive uses baked lighting
        const HAS_STATIC_LIGHTING = 1 << 0;
        /// Primitive moves most frames
        const OFTEN_MOVING = 1 << 1;
        /// Primitive casts dynamically rendered shadows
        const CASTS_DYNAMIC_SHADOW = 1 << 2;
        /// Primitive only shadows itself
        const SELF_SHADOW_ONLY = 1 << 3;
        /// At least one movable point light affects the primitive; selects
        /// the specialized dynamic-lighting shader path on mobile
        const HAS_MOVABLE_POINT_LIGHT_INTERACTION = 1 << 4;
    }
}

/// Packed per-primitive record as laid out in the destination buffer
///
/// Seven float4s per primitive, indexed by packed primitive index.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PrimitiveRecord {
    /// Object-to-world transform, column major
    pub local_to_world: [[f32; 4]; 4],
    /// World-space bounds center
    pub bounds_origin: [f32; 3],
    /// [`PrimitiveRecordFlags`] bits
    pub flags: u32,
    /// World-space bounds half-extent
    pub bounds_extent: [f32; 3],
    /// Base offset of the primitive's lightmap span
    pub lightmap_data_offset: u32,
    /// Number of lightmap entries in the span
    pub num_lightmap_entries: u32,
    /// Pad to a whole float4
    pub _padding: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<PrimitiveRecord>() == PRIMITIVE_RECORD_FLOAT4S * FLOAT4_SIZE);

impl PrimitiveRecord {
    /// Build a record from proxy data and scene bookkeeping
    pub(crate) fn new(
        data: &PrimitiveRecordData,
        flags: PrimitiveRecordFlags,
        lightmap_data_offset: u32,
        num_lightmap_entries: u32,
    ) -> Self {
        let mut local_to_world = [[0.0f32; 4]; 4];
        for (c, column) in local_to_world.iter_mut().enumerate() {
            for (r, value) in column.iter_mut().enumerate() {
                *value = data.local_to_world[(r, c)];
            }
        }

        Self {
            local_to_world,
            bounds_origin: data.bounds_origin.into(),
            flags: flags.bits(),
            bounds_extent: data.bounds_extent.into(),
            lightmap_data_offset,
            num_lightmap_entries,
            _padding: [0; 3],
        }
    }
}

/// Packed lightmap sub-record as laid out in the destination buffer
///
/// Two float4s per entry, indexed by span-allocated offset.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightmapRecord {
    /// Lightmap UV scale (xy) and bias (zw)
    pub coord_scale_bias: [f32; 4],
    /// Shadow map UV scale (xy) and bias (zw)
    pub shadow_map_coord_scale_bias: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<LightmapRecord>() == LIGHTMAP_RECORD_FLOAT4S * FLOAT4_SIZE);

impl From<&LightmapRecordData> for LightmapRecord {
    fn from(data: &LightmapRecordData) -> Self {
        Self {
            coord_scale_bias: data.coord_scale_bias.into(),
            shadow_map_coord_scale_bias: data.shadow_map_coord_scale_bias.into(),
        }
    }
}
