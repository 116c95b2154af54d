use super::*;

// ============================================================================
// Basic allocation tests
// ============================================================================

#[test]
fn test_sequential_alloc() {
    let mut alloc = SlotAllocator::new();
    assert_eq!(alloc.alloc(), Some(0));
    assert_eq!(alloc.alloc(), Some(1));
    assert_eq!(alloc.alloc(), Some(2));
    assert_eq!(alloc.len(), 3);
    assert_eq!(alloc.high_water_mark(), 3);
}

#[test]
fn test_new_is_empty() {
    let alloc = SlotAllocator::default();
    assert!(alloc.is_empty());
    assert_eq!(alloc.high_water_mark(), 0);
    assert!(!alloc.has_recycled());
}

// ============================================================================
// Free and recycle tests
// ============================================================================

#[test]
fn test_free_multiple_recycle_lifo() {
    let mut alloc = SlotAllocator::new();
    let a = alloc.alloc().unwrap(); // 0
    let _b = alloc.alloc().unwrap(); // 1
    let c = alloc.alloc().unwrap(); // 2
    assert!(alloc.try_free(a));
    assert!(alloc.try_free(c));
    assert_eq!(alloc.recycled_count(), 2);

    // Free list is a stack: 2 first, then 0
    assert_eq!(alloc.alloc(), Some(2));
    assert_eq!(alloc.alloc(), Some(0));
    // Free list exhausted, next is fresh
    assert_eq!(alloc.alloc(), Some(3));
}

#[test]
fn test_free_when_empty_is_rejected() {
    let mut alloc = SlotAllocator::new();
    assert!(!alloc.try_free(0));
    assert_eq!(alloc.len(), 0);
    assert_eq!(alloc.recycled_count(), 0);
}

#[test]
fn test_free_unknown_index_is_rejected() {
    let mut alloc = SlotAllocator::new();
    alloc.alloc().unwrap();
    assert!(!alloc.try_free(5));
    assert_eq!(alloc.len(), 1);
}

#[test]
fn test_high_water_mark_survives_free() {
    let mut alloc = SlotAllocator::new();
    for _ in 0..4 {
        alloc.alloc().unwrap();
    }
    alloc.try_free(3);
    alloc.try_free(1);
    assert_eq!(alloc.high_water_mark(), 4);
    assert_eq!(alloc.len(), 2);
}

// ============================================================================
// Reset tests
// ============================================================================

#[test]
fn test_reset_to_compacts() {
    let mut alloc = SlotAllocator::new();
    for _ in 0..5 {
        alloc.alloc().unwrap();
    }
    alloc.try_free(1);
    alloc.try_free(3);

    alloc.reset_to(3);

    assert_eq!(alloc.len(), 3);
    assert!(!alloc.has_recycled());
    assert_eq!(alloc.high_water_mark(), 3);
    assert_eq!(alloc.alloc(), Some(3));
}

#[test]
fn test_len_plus_recycled_equals_high_water_mark() {
    let mut alloc = SlotAllocator::new();
    let ids: Vec<u32> = (0..6).map(|_| alloc.alloc().unwrap()).collect();
    for id in ids.iter().step_by(2) {
        alloc.try_free(*id);
    }
    assert_eq!(
        alloc.len() as usize + alloc.recycled_count(),
        alloc.high_water_mark() as usize
    );
}

#[test]
fn test_exhausted_range_refuses_to_allocate() {
    let mut alloc = SlotAllocator::new();
    alloc.reset_to(u32::MAX);

    assert_eq!(alloc.alloc(), None);
    assert_eq!(alloc.alloc(), None);
    assert_eq!(alloc.len(), u32::MAX);

    assert!(alloc.try_free(7));
    assert_eq!(alloc.alloc(), Some(7));
    assert_eq!(alloc.alloc(), None);
}
