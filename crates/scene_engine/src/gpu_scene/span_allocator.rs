//! Grow-only span allocator
//!
//! Packs variable-size per-primitive records into one flat GPU buffer by
//! handing out integer ranges over a linear address space. Freed ranges go
//! onto a free list and are coalesced immediately, so the free list never
//! holds two contiguous spans. The address space itself only grows; freed
//! space at the tail becomes a reusable span rather than shrinking the
//! high-water mark.

/// One free range in the allocator's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinearAllocation {
    start_offset: u32,
    num: u32,
}

impl LinearAllocation {
    const fn new(start_offset: u32, num: u32) -> Self {
        Self { start_offset, num }
    }

    const fn contains(&self, other: Self) -> bool {
        self.start_offset <= other.start_offset
            && self.start_offset + self.num >= other.start_offset + other.num
    }
}

/// Grow-only free-list range allocator over a linear integer address space
///
/// Allocation is first-fit over the free list, O(F) in the number of free
/// spans. F stays small under the intended workload (bursty churn rather than
/// sustained fragmentation), so no sorted structure is kept.
#[derive(Debug, Default)]
pub struct GrowOnlySpanAllocator {
    free_spans: Vec<LinearAllocation>,
    max_size: u32,
}

impl GrowOnlySpanAllocator {
    /// Create an empty allocator
    pub const fn new() -> Self {
        Self {
            free_spans: Vec::new(),
            max_size: 0,
        }
    }

    /// Allocate a range of `num` entries, returning its start offset
    ///
    /// Offsets stay valid until the range is freed; later allocations never
    /// move earlier ones.
    pub fn allocate(&mut self, num: u32) -> u32 {
        if let Some(found_index) = self.search_free_list(num) {
            let free_span = self.free_spans[found_index];

            if free_span.num > num {
                // Update existing free span with remainder
                self.free_spans[found_index] =
                    LinearAllocation::new(free_span.start_offset + num, free_span.num - num);
            } else {
                // Fully consumed the free span
                self.free_spans.swap_remove(found_index);
            }

            return free_span.start_offset;
        }

        // New allocation at the high-water mark
        let start_offset = self.max_size;
        debug_assert!(u32::MAX - self.max_size >= num, "span address space exhausted");
        self.max_size += num;

        start_offset
    }

    /// Free an allocated range
    ///
    /// Freeing a range that was not allocated (or freeing it twice) is a
    /// caller contract violation, detected in debug builds only.
    pub fn free(&mut self, base_offset: u32, num: u32) {
        debug_assert!(base_offset + num <= self.max_size);

        let new_free_span = LinearAllocation::new(base_offset, num);

        // Detect double free
        #[cfg(debug_assertions)]
        for current_span in &self.free_spans {
            debug_assert!(
                !current_span.contains(new_free_span),
                "double free of span ({base_offset}, {num})"
            );
        }

        let mut span_before_index = None;
        let mut span_after_index = None;

        // Search for existing free spans we can merge with
        for (i, current_span) in self.free_spans.iter().enumerate() {
            if current_span.start_offset == new_free_span.start_offset + new_free_span.num {
                span_after_index = Some(i);
            }

            if current_span.start_offset + current_span.num == new_free_span.start_offset {
                span_before_index = Some(i);
            }
        }

        match (span_before_index, span_after_index) {
            (Some(before), after) => {
                // Merge span before with new free span
                self.free_spans[before].num += new_free_span.num;

                if let Some(after) = after {
                    // Also merge span after with span before
                    let span_after = self.free_spans[after];
                    self.free_spans[before].num += span_after.num;
                    self.free_spans.swap_remove(after);
                }
            }
            (None, Some(after)) => {
                // Merge span after with new free span
                let span_after = &mut self.free_spans[after];
                span_after.start_offset = new_free_span.start_offset;
                span_after.num += new_free_span.num;
            }
            (None, None) => {
                // Couldn't merge, store new free span
                self.free_spans.push(new_free_span);
            }
        }
    }

    /// High-water mark of the address space; only ever grows
    pub const fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Number of spans currently on the free list
    pub fn num_free_spans(&self) -> usize {
        self.free_spans.len()
    }

    /// Total entries currently free
    pub fn free_size(&self) -> u32 {
        self.free_spans.iter().map(|span| span.num).sum()
    }

    // Search free list for first span with enough capacity
    fn search_free_list(&self, num: u32) -> Option<usize> {
        self.free_spans.iter().position(|span| span.num >= num)
    }
}
