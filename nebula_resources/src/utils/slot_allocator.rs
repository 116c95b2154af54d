/// Allocates and recycles unique `u32` indices.
///
/// Backs every index space of the resource layer: the bindless shader array
/// indices handed out by `IndexAllocator` and the element indices of a
/// `GrowableGpuArray`. Freed indices are recycled (LIFO) before the cursor
/// grows. `u32::MAX` is never handed out.
///
/// # Example
///
/// ```ignore
/// let mut alloc = SlotAllocator::new();
/// let a = alloc.alloc().unwrap();  // 0
/// let b = alloc.alloc().unwrap();  // 1
/// alloc.try_free(a);               // 0 is now available
/// let c = alloc.alloc().unwrap();  // 0 (recycled)
/// ```
#[derive(Debug)]
pub struct SlotAllocator {
    free_list: Vec<u32>,
    next_id: u32,
    len: u32,
}

impl SlotAllocator {
    /// Create a new empty allocator
    pub fn new() -> Self {
        Self {
            free_list: Vec::new(),
            next_id: 0,
            len: 0,
        }
    }

    /// Allocate the next available slot index
    ///
    /// `None` once every index below `u32::MAX` is outstanding.
    pub fn alloc(&mut self) -> Option<u32> {
        let id = match self.free_list.pop() {
            Some(id) => id,
            None if self.next_id == u32::MAX => return None,
            None => {
                self.next_id += 1;
                self.next_id - 1
            }
        };
        self.len += 1;
        Some(id)
    }

    /// Return a slot index to the pool for reuse
    ///
    /// Returns `false` (and changes nothing) if no slot is outstanding
    /// or the index was never handed out.
    pub fn try_free(&mut self, id: u32) -> bool {
        if self.len == 0 || id >= self.next_id {
            return false;
        }
        self.len -= 1;
        self.free_list.push(id);
        true
    }

    /// Forget every hole and treat `0..len` as allocated.
    ///
    /// Used after a contiguous re-index: the cursor continues at `len`.
    pub fn reset_to(&mut self, len: u32) {
        self.free_list.clear();
        self.next_id = len;
        self.len = len;
    }

    /// Whether the next `alloc()` is served from the free list
    pub fn has_recycled(&self) -> bool {
        !self.free_list.is_empty()
    }

    /// Number of freed indices waiting for reuse
    pub fn recycled_count(&self) -> usize {
        self.free_list.len()
    }

    /// Highest index ever allocated + 1.
    ///
    /// This is the minimum capacity the backing storage must have
    /// to accommodate all allocated indices.
    pub fn high_water_mark(&self) -> u32 {
        self.next_id
    }

    /// Number of currently allocated slots
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether no slots are currently allocated
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "slot_allocator_tests.rs"]
mod tests;
