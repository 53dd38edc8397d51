#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use allocator::{ALIGNMENT, Arena, BlockInfo, HeapAllocator, PayloadPtr};
use proptest::{prelude::*, sample::Index};

const CAPACITY: usize = 2048;

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Release(Index),
    Resize(Index, usize),
    ReleaseForged(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0_usize..256).prop_map(Op::Allocate),
        2 => any::<Index>().prop_map(Op::Release),
        3 => (any::<Index>(), 0_usize..384).prop_map(|(index, size)| Op::Resize(index, size)),
        1 => (1_usize..CAPACITY + 64).prop_map(Op::ReleaseForged),
    ]
}

/// A live allocation and the bytes its owner wrote into it.
#[derive(Debug)]
struct Live {
    ptr: PayloadPtr,
    len: usize,
    tag: u8,
}

fn fill<A>(heap: &mut HeapAllocator<A>, live: &Live)
where
    A: AsRef<[u8]> + AsMut<[u8]>,
{
    heap.payload_mut(live.ptr).unwrap()[..live.len].fill(live.tag);
}

fn check_structure<A>(heap: &HeapAllocator<A>) -> Result<(), TestCaseError>
where
    A: AsRef<[u8]>,
{
    let blocks: Vec<BlockInfo> = heap.blocks().collect();
    prop_assert_eq!(
        blocks.iter().map(BlockInfo::block_size).sum::<usize>(),
        heap.capacity()
    );
    for pair in blocks.windows(2) {
        prop_assert!(
            !(pair[0].status.is_free() && pair[1].status.is_free()),
            "adjacent free blocks at {:#x} and {:#x}",
            pair[0].offset,
            pair[1].offset
        );
        prop_assert_eq!(pair[0].end(), pair[1].offset);
    }
    for block in &blocks {
        prop_assert_eq!(block.payload_size % ALIGNMENT, 0);
        prop_assert_eq!(block.payload_offset() % ALIGNMENT, 0);
    }
    prop_assert!(heap.verify().is_ok());
    Ok(())
}

fn check_contents<A>(heap: &HeapAllocator<A>, live: &[Live]) -> Result<(), TestCaseError>
where
    A: AsRef<[u8]>,
{
    for entry in live {
        let payload = heap.payload(entry.ptr).unwrap();
        prop_assert!(payload.len() >= entry.len);
        prop_assert_eq!(payload.as_ptr().addr() % ALIGNMENT, 0);
        prop_assert!(
            payload[..entry.len].iter().all(|&b| b == entry.tag),
            "allocation at {} lost its contents",
            entry.ptr
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn invariants_hold_for_any_sequence(ops in prop::collection::vec(op(), 1..96)) {
        let mut arena = Arena::<CAPACITY>::new();
        let mut heap = HeapAllocator::new(&mut arena).unwrap();
        let mut live: Vec<Live> = Vec::new();
        let mut next_tag = 0_u8;

        for op in ops {
            match op {
                Op::Allocate(nbytes) => match heap.allocate(nbytes) {
                    Ok(Some(ptr)) => {
                        next_tag = next_tag.wrapping_add(1);
                        let entry = Live { ptr, len: nbytes, tag: next_tag };
                        fill(&mut heap, &entry);
                        live.push(entry);
                    }
                    Ok(None) => prop_assert_eq!(nbytes, 0),
                    Err(err) => prop_assert!(err.is_out_of_memory()),
                },
                Op::Release(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let entry = live.swap_remove(index.index(live.len()));
                    heap.release(Some(entry.ptr)).unwrap();
                }
                Op::Resize(index, new_size) => {
                    if live.is_empty() {
                        continue;
                    }
                    let at = index.index(live.len());
                    let entry = &live[at];
                    match heap.resize(Some(entry.ptr), new_size) {
                        Ok(Some(ptr)) => {
                            let kept = entry.len.min(new_size);
                            let tag = entry.tag;
                            prop_assert!(
                                heap.payload(ptr).unwrap()[..kept].iter().all(|&b| b == tag)
                            );
                            live[at] = Live { ptr, len: new_size, tag };
                            fill(&mut heap, &live[at]);
                        }
                        Ok(None) => {
                            prop_assert_eq!(new_size, 0);
                            live.swap_remove(at);
                        }
                        Err(err) => prop_assert!(err.is_out_of_memory()),
                    }
                }
                Op::ReleaseForged(offset) => {
                    if live.iter().any(|entry| entry.ptr.offset() == offset) {
                        continue;
                    }
                    let before: Vec<BlockInfo> = heap.blocks().collect();
                    let ptr = PayloadPtr::from_offset(offset).unwrap();
                    prop_assert!(heap.release(Some(ptr)).unwrap_err().is_invalid_pointer());
                    prop_assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
                }
            }

            check_structure(&heap)?;
            check_contents(&heap, &live)?;
        }

        for entry in live {
            heap.release(Some(entry.ptr)).unwrap();
        }
        prop_assert_eq!(heap.blocks().count(), 1);
        prop_assert_eq!(heap.stats().free_bytes, CAPACITY - allocator::HEADER_SIZE);
    }

    #[test]
    fn release_order_never_matters(
        sizes in prop::collection::vec(1_usize..64, 1..12),
        order in any::<u64>(),
    ) {
        let mut arena = Arena::<CAPACITY>::new();
        let mut heap = HeapAllocator::new(&mut arena).unwrap();
        let mut ptrs: Vec<PayloadPtr> = sizes
            .iter()
            .map(|&size| heap.allocate(size).unwrap().unwrap())
            .collect();

        // Deterministic shuffle driven by the generated seed.
        let mut seed = order;
        for i in (1..ptrs.len()).rev() {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let j = usize::try_from(seed >> 33).unwrap() % (i + 1);
            ptrs.swap(i, j);
        }

        for ptr in ptrs {
            heap.release(Some(ptr)).unwrap();
            check_structure(&heap)?;
        }
        prop_assert_eq!(heap.blocks().count(), 1);
    }

    #[test]
    fn allocate_release_allocate_is_idempotent(
        prefix in prop::collection::vec(1_usize..128, 0..8),
        nbytes in 1_usize..256,
    ) {
        let mut arena = Arena::<CAPACITY>::new();
        let mut heap = HeapAllocator::new(&mut arena).unwrap();
        for size in prefix {
            heap.allocate(size).unwrap();
        }

        let Ok(Some(first)) = heap.allocate(nbytes) else {
            return Ok(());
        };
        heap.release(Some(first)).unwrap();
        prop_assert_eq!(heap.allocate(nbytes).unwrap(), Some(first));
    }
}
