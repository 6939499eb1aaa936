//! Heap Size Schedule
//!
//! The table of permissible heap sizes, in words. Sizes start growing
//! in a Fibonacci sequence from two fixed seeds.
//!
//! Fibonacci growth is not really ok for really large heaps: fib(35)
//! is about 14M words whereas fib(36) is about 24M, and we don't want
//! that growth once heaps are that big. At roughly 1.3 mega-words the
//! schedule switches to 1.25x growth, stopping before the sizes would
//! overflow a signed machine word.

use lazy_static::lazy_static;

/// First entry of the size schedule; the global heap-size floor.
pub const MIN_HEAP_SIZE: usize = 34;

/// Number of Fibonacci entries, seeds included.
const FIB_ENTRIES: usize = 23;

lazy_static! {
    static ref HEAP_SIZES: Vec<usize> = build_heap_sizes();
}

fn build_heap_sizes() -> Vec<usize> {
    let mut sizes: Vec<usize> = Vec::with_capacity(160);
    sizes.push(34);
    sizes.push(55);
    for i in 2..FIB_ENTRIES {
        let next = sizes[i - 1] + sizes[i - 2];
        sizes.push(next);
    }

    loop {
        let prev = *sizes.last().expect("seeded above");
        let next = match (prev / 4).checked_mul(5) {
            Some(n) if n <= isize::MAX as usize => n,
            // Size turned negative. Discard this last size.
            _ => break,
        };
        sizes.push(next);
    }
    sizes
}

/// The full size schedule.
pub fn heap_sizes() -> &'static [usize] {
    &HEAP_SIZES
}

/// Find the next heap size equal to or greater than the given size
/// (if `offset == 0`).
///
/// If `offset` is 1, the next higher heap size is returned (always
/// greater than `size`).
///
/// # Panics
///
/// Panics if the requested size has no successor in the schedule;
/// a heap that large cannot be represented.
pub fn next_heap_size(size: usize, offset: usize) -> usize {
    let sizes = heap_sizes();
    if size < sizes[0] {
        return sizes[0];
    }

    let mut low = 0usize;
    let mut high = sizes.len();
    while low < high {
        let mid = low + (high - low) / 2;
        if size < sizes[mid] {
            high = mid;
        } else if size == sizes[mid] {
            return *sizes
                .get(mid + offset)
                .unwrap_or_else(|| no_next_size(size, offset));
        } else if mid + 1 >= sizes.len() {
            no_next_size(size, offset);
        } else if size < sizes[mid + 1] {
            return *sizes
                .get(mid + offset + 1)
                .unwrap_or_else(|| no_next_size(size, offset));
        } else {
            low = mid + 1;
        }
    }
    no_next_size(size, offset)
}

fn no_next_size(size: usize, offset: usize) -> ! {
    panic!("no next heap size found: {}, offset {}", size, offset);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_seeds_and_fib() {
        let sizes = heap_sizes();
        assert_eq!(sizes[0], 34);
        assert_eq!(sizes[1], 55);
        assert_eq!(sizes[2], 89);
        assert_eq!(sizes[3], 144);
        assert_eq!(sizes[4], 233);
        for i in 2..FIB_ENTRIES {
            assert_eq!(sizes[i], sizes[i - 1] + sizes[i - 2]);
        }
    }

    #[test]
    fn test_schedule_geometric_tail() {
        let sizes = heap_sizes();
        for i in FIB_ENTRIES..sizes.len() {
            assert_eq!(sizes[i], 5 * (sizes[i - 1] / 4));
        }
    }

    #[test]
    fn test_schedule_strictly_increasing() {
        let sizes = heap_sizes();
        for w in sizes.windows(2) {
            assert!(w[0] < w[1]);
        }
        assert!(*sizes.last().unwrap() <= isize::MAX as usize);
    }

    #[test]
    fn test_next_heap_size_below_floor() {
        assert_eq!(next_heap_size(0, 0), 34);
        assert_eq!(next_heap_size(33, 0), 34);
    }

    #[test]
    fn test_next_heap_size_exact_and_between() {
        assert_eq!(next_heap_size(34, 0), 34);
        assert_eq!(next_heap_size(34, 1), 55);
        assert_eq!(next_heap_size(35, 0), 55);
        assert_eq!(next_heap_size(55, 0), 55);
        assert_eq!(next_heap_size(56, 0), 89);
        assert_eq!(next_heap_size(89, 1), 144);
        assert_eq!(next_heap_size(90, 1), 233);
    }

    #[test]
    fn test_next_heap_size_large() {
        // Past the Fibonacci region the schedule is still honored.
        let sizes = heap_sizes();
        let big = sizes[FIB_ENTRIES + 3];
        assert_eq!(next_heap_size(big, 0), big);
        assert_eq!(next_heap_size(big + 1, 0), sizes[FIB_ENTRIES + 4]);
    }
}
