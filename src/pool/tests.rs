use quickcheck_macros::quickcheck;
use std::prelude::v1::*;

use super::*;
use crate::{large::BLOCK_OVERHEAD, source::Capped, tests::ShadowAllocator, POOL_BASE};

type TheHeap = DefaultSlotHeap;
const TABLE: usize = DEFAULT_SLOT_SIZE * DEFAULT_SLOT_COUNT;

fn heap() -> TheHeap {
    let _ = env_logger::builder().is_test(true).try_init();
    TheHeap::INIT
}

/// Walk the arena and check the structural invariants of both pools.
fn check_invariants<S, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize>(
    heap: &SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>,
) {
    if !heap.initialized {
        assert_eq!(heap.arena.len(), 0);
        return;
    }
    let geometry = SlotHeap::<S, SLOT_SIZE, SLOT_COUNT, GROWTH>::GEOMETRY;

    // Every slot is either handed out or on the free list, exactly once
    let mut on_list: Vec<usize> = heap.small.free_slots(&heap.arena, geometry).collect();
    let listed = on_list.len();
    on_list.sort_unstable();
    on_list.dedup();
    assert_eq!(on_list.len(), listed, "a slot is listed twice");
    for (index, state) in heap.slot_occupancy() {
        assert_eq!(
            on_list.binary_search(&index).is_ok(),
            state == SlotState::Free,
            "slot {} is {:?}",
            index,
            state
        );
    }

    // The blocks tile the large region, and no two free blocks touch
    let mut physically_free = Vec::new();
    let mut block = geometry.table_len();
    let mut prev_free = false;
    while block < heap.arena.len() {
        let size = heap.arena.read_word(block + WORD);
        assert!(size > BLOCK_OVERHEAD && size % WORD == 0, "bad size {}", size);
        let header = heap.arena.header(block);
        let free = matches!(header, Some(Header::Free(_)));
        assert!(free || header == Some(Header::Live), "bad header at {}", block);
        assert!(!(free && prev_free), "adjacent free blocks at {}", block);
        if free {
            physically_free.push((block, size));
        }
        prev_free = free;
        block += size;
    }
    assert_eq!(block, heap.arena.len());

    let mut listed: Vec<(usize, usize)> = heap
        .free_large_blocks()
        .map(|b| (b.addr.get() - POOL_BASE - BLOCK_OVERHEAD, b.size))
        .collect();
    listed.sort_unstable();
    assert_eq!(listed, physically_free);
}

#[test]
fn lazy_initialization() {
    let mut heap = heap();
    assert_eq!(heap.stats(), Stats::default());
    assert_eq!(heap.slot_occupancy().count(), DEFAULT_SLOT_COUNT);
    assert!(heap
        .slot_occupancy()
        .all(|(_, state)| state == SlotState::Free));
    assert_eq!(heap.free_large_blocks().count(), 0);
    assert!(!heap.is_managed(Addr::new(POOL_BASE)));
    check_invariants(&heap);

    heap.allocate(1).unwrap();
    assert_eq!(
        heap.stats(),
        Stats {
            free_slots: DEFAULT_SLOT_COUNT - 1,
            used_slots: 1,
            free_blocks: 1,
            free_large_bytes: DEFAULT_GROWTH,
            heap_extent: TABLE + DEFAULT_GROWTH,
        }
    );
    assert!(heap.is_managed(Addr::new(POOL_BASE)));
    check_invariants(&heap);
}

#[test]
fn size_class_dispatch() {
    let mut heap = heap();
    let payload = TheHeap::SLOT_PAYLOAD;
    assert_eq!(payload, DEFAULT_SLOT_SIZE - WORD);

    let a = heap.allocate(0).unwrap();
    let b = heap.allocate(payload).unwrap();
    let c = heap.allocate(payload + 1).unwrap();
    assert_eq!(heap.classify(a), AddrClass::SmallSlot { index: 0 });
    assert_eq!(heap.classify(b), AddrClass::SmallSlot { index: 1 });
    assert_eq!(heap.classify(c), AddrClass::LargeBlock);
    assert_eq!(heap.payload(b).unwrap().len(), payload);
    assert!(heap.payload(c).unwrap().len() >= payload + 1);
    check_invariants(&heap);
}

#[test]
fn small_exhaustion_does_not_fall_back() {
    let mut heap = heap();
    let addrs: Vec<Addr> = (0..DEFAULT_SLOT_COUNT)
        .map(|_| heap.allocate(16).unwrap())
        .collect();
    for (i, addr) in addrs.iter().enumerate() {
        assert_eq!(addr.get(), POOL_BASE + i * DEFAULT_SLOT_SIZE + WORD);
    }

    let before = heap.stats();
    assert_eq!(
        heap.allocate(16),
        Err(AllocError::OutOfMemory(Exhausted::Small))
    );
    assert_eq!(heap.stats(), before);

    // The large heap is still there for large requests
    assert!(heap.allocate(500).is_ok());

    heap.free(addrs[49]).unwrap();
    assert_eq!(heap.allocate(16), Ok(addrs[49]));
    check_invariants(&heap);
}

#[test]
fn free_then_reallocate_is_the_identity() {
    let mut heap = heap();
    heap.allocate(1).unwrap();
    let before: Vec<FreeBlock> = heap.free_large_blocks().collect();
    let stats = heap.stats();

    let a = heap.allocate(200).unwrap();
    let b = heap.allocate(300).unwrap();
    let c = heap.allocate(100).unwrap();
    let s = heap.allocate(50).unwrap();
    assert_eq!(heap.stats().heap_extent, stats.heap_extent);

    for addr in [b, a, s, c] {
        heap.free(addr).unwrap();
        check_invariants(&heap);
    }
    assert_eq!(heap.free_large_blocks().collect::<Vec<_>>(), before);
    assert_eq!(heap.stats(), stats);
}

#[test]
fn growth_collapses_into_one_block_once_freed() {
    let mut heap = heap();
    let addrs: Vec<Addr> = [900, 2000, 700, 3000]
        .iter()
        .map(|&size| heap.allocate(size).unwrap())
        .collect();
    let extent = heap.stats().heap_extent;
    assert!(extent > TABLE + DEFAULT_GROWTH);

    for &addr in addrs.iter().rev() {
        heap.free(addr).unwrap();
    }
    let blocks: Vec<FreeBlock> = heap.free_large_blocks().collect();
    assert_eq!(
        blocks,
        [FreeBlock {
            addr: Addr::new(POOL_BASE + TABLE + BLOCK_OVERHEAD),
            size: extent - TABLE,
        }]
    );
    check_invariants(&heap);
}

#[test]
fn double_free_is_rejected() {
    let mut heap = heap();
    let small = heap.allocate(10).unwrap();
    let large = heap.allocate(400).unwrap();
    heap.free(small).unwrap();
    heap.free(large).unwrap();
    let stats = heap.stats();
    let blocks: Vec<FreeBlock> = heap.free_large_blocks().collect();

    assert_eq!(heap.free(small), Err(AllocError::NotInUse(small)));
    assert_eq!(heap.stats(), stats);
    assert_eq!(heap.free_large_blocks().collect::<Vec<_>>(), blocks);

    // `large` was merged into the remainder, so nothing starts there anymore
    assert_eq!(heap.free(large), Err(AllocError::InvalidAddress(large)));
    assert_eq!(heap.stats(), stats);
    check_invariants(&heap);
}

#[test]
fn invalid_addresses_are_rejected() {
    let mut heap = heap();
    let never = Addr::new(POOL_BASE + WORD);
    assert_eq!(heap.free(never), Err(AllocError::InvalidAddress(never)));
    assert_eq!(
        heap.reallocate(never, 8),
        Err(AllocError::InvalidAddress(never))
    );

    let small = heap.allocate(10).unwrap();
    let large = heap.allocate(400).unwrap();
    let stats = heap.stats();
    for addr in [
        Addr::NULL,
        Addr::new(POOL_BASE),
        small + 1,
        small - WORD,
        large + WORD,
        large - WORD,
        Addr::new(POOL_BASE + TABLE),
        Addr::new(POOL_BASE + stats.heap_extent),
        Addr::new(usize::MAX),
    ] {
        assert_eq!(heap.free(addr), Err(AllocError::InvalidAddress(addr)));
        assert_eq!(
            heap.reallocate(addr, 1000),
            Err(AllocError::InvalidAddress(addr))
        );
        assert!(heap.block_bytes(addr).is_err());
    }
    assert_eq!(heap.stats(), stats);
    check_invariants(&heap);
}

#[test]
fn reallocate_small() {
    let mut heap = heap();
    let a = heap.allocate(10).unwrap();
    heap.payload_mut(a).unwrap().copy_from_slice(&[7; DEFAULT_SLOT_SIZE - WORD]);

    // Anything up to the slot payload stays put
    assert_eq!(heap.reallocate(a, 1), Ok(a));
    assert_eq!(heap.reallocate(a, TheHeap::SLOT_PAYLOAD), Ok(a));

    let b = heap.reallocate(a, 300).unwrap();
    assert_eq!(heap.classify(b), AddrClass::LargeBlock);
    assert!(heap.payload(b).unwrap()[..TheHeap::SLOT_PAYLOAD]
        .iter()
        .all(|&x| x == 7));
    assert_eq!(heap.slot_occupancy().next(), Some((0, SlotState::Free)));
    assert_eq!(heap.reallocate(a, 300), Err(AllocError::NotInUse(a)));
    check_invariants(&heap);
}

#[test]
fn reallocate_large() {
    let mut heap = heap();
    let a = heap.allocate(600).unwrap();
    for (i, x) in heap.payload_mut(a).unwrap().iter_mut().enumerate() {
        *x = i as u8;
    }

    // Shrinking into the small range stays in the large pool
    let b = heap.reallocate(a, 40).unwrap();
    assert_eq!(b, a);
    assert_eq!(heap.classify(b), AddrClass::LargeBlock);
    assert_eq!(heap.stats().used_slots, 0);
    check_invariants(&heap);

    let c = heap.reallocate(b, 5000).unwrap();
    assert_ne!(c, b);
    let expected: Vec<u8> = (0..40).collect();
    assert_eq!(&heap.payload(c).unwrap()[..40], &expected[..]);
    // The old block merged with both of its free neighbors
    assert_eq!(heap.payload(b), Err(AllocError::InvalidAddress(b)));
    check_invariants(&heap);
}

#[test]
fn large_block_shrunk_to_zero_can_be_freed() {
    let mut heap = heap();
    let a = heap.allocate(600).unwrap();
    let free_bytes = heap.stats().free_large_bytes;

    assert_eq!(heap.reallocate(a, 0), Ok(a));
    assert_eq!(heap.classify(a), AddrClass::LargeBlock);
    assert_eq!(heap.payload(a).map(|p| p.len()), Ok(WORD));
    assert_eq!(heap.write_byte(a, 1), Ok(()));
    assert_eq!(heap.read_byte(a), Ok(1));
    check_invariants(&heap);

    heap.free(a).unwrap();
    assert_eq!(heap.free(a), Err(AllocError::InvalidAddress(a)));
    let stats = heap.stats();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.free_large_bytes, DEFAULT_GROWTH);
    assert!(stats.free_large_bytes > free_bytes);
    check_invariants(&heap);
}

#[test]
fn failed_growth_changes_nothing() {
    let _ = env_logger::builder().is_test(true).try_init();
    const SLOTS: usize = 4;
    let mut heap = SlotHeap::<Capped<{ 128 * SLOTS + 1024 }>, 128, SLOTS, 1024>::INIT;

    let a = heap.allocate(200).unwrap();
    let stats = heap.stats();
    assert_eq!(
        heap.allocate(2000),
        Err(AllocError::OutOfMemory(Exhausted::System))
    );
    assert_eq!(
        heap.reallocate(a, 2000),
        Err(AllocError::OutOfMemory(Exhausted::System))
    );
    assert_eq!(heap.stats(), stats);
    assert!(heap.payload(a).is_ok());
    check_invariants(&heap);
}

#[test]
fn refused_initial_growth_keeps_the_small_pool() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut heap = SlotHeap::<Capped<{ 128 * 4 }>, 128, 4, 1024>::INIT;

    let a = heap.allocate(100).unwrap();
    assert_eq!(heap.classify(a), AddrClass::SmallSlot { index: 0 });
    assert_eq!(
        heap.allocate(200),
        Err(AllocError::OutOfMemory(Exhausted::System))
    );
    assert_eq!(heap.stats().heap_extent, 128 * 4);
    assert_eq!(heap.free_large_blocks().count(), 0);
    check_invariants(&heap);
}

#[test]
fn reset_frees_everything() {
    let mut heap = heap();
    assert_eq!(heap.reset(), Ok(()));
    assert_eq!(heap.stats().heap_extent, TABLE + DEFAULT_GROWTH);

    let small = heap.allocate(10).unwrap();
    let large = heap.allocate(5000).unwrap();
    let extent = heap.stats().heap_extent;

    heap.reset().unwrap();
    assert_eq!(
        heap.stats(),
        Stats {
            free_slots: DEFAULT_SLOT_COUNT,
            used_slots: 0,
            free_blocks: 1,
            free_large_bytes: extent - TABLE,
            heap_extent: extent,
        }
    );
    assert_eq!(heap.free(small), Err(AllocError::NotInUse(small)));
    assert!(heap.free(large).is_err());
    assert_eq!(heap.allocate(10), Ok(small));
    check_invariants(&heap);
}

#[test]
fn block_bytes_reads_free_blocks_too() {
    let mut heap = heap();
    let a = heap.allocate(10).unwrap();
    heap.write_int(a, 0x1234).unwrap();
    heap.free(a).unwrap();

    assert_eq!(heap.payload(a), Err(AllocError::NotInUse(a)));
    let bytes = heap.block_bytes(a).unwrap();
    assert_eq!(bytes.len(), TheHeap::SLOT_PAYLOAD);
    assert_eq!(&bytes[..4], &0x1234i32.to_ne_bytes());

    let free = heap.free_large_blocks().next().unwrap();
    assert_eq!(
        heap.block_bytes(free.addr).unwrap().len(),
        free.size - BLOCK_OVERHEAD
    );
}

#[quickcheck]
fn random(max_alloc_size: usize, bytecode: Vec<u8>) {
    random_inner(max_alloc_size, bytecode);
}

fn random_inner(max_alloc_size: usize, bytecode: Vec<u8>) -> Option<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let max_alloc_size = max_alloc_size % 0x1000;

    // Few, small slots so that the small pool runs dry now and then
    type RandomHeap = SlotHeap<Unbounded, 64, 8, 256>;
    let mut heap = RandomHeap::INIT;
    let mut sa = ShadowAllocator::new();

    #[derive(Debug)]
    struct Alloc {
        addr: Addr,
        len: usize,
        fill: u8,
    }
    let mut allocs: Vec<Alloc> = Vec::new();

    macro_rules! verify {
        ($alloc:expr, $len:expr) => {{
            let alloc = &$alloc;
            let payload = heap.payload(alloc.addr).unwrap();
            assert!(
                payload[..$len].iter().all(|&x| x == alloc.fill),
                "{:?} was clobbered",
                alloc
            );
        }};
    }

    let mut it = bytecode.iter().cloned();
    loop {
        check_invariants(&heap);

        match it.next()? % 8 {
            0..=2 => {
                let len = u32::from_le_bytes([it.next()?, it.next()?, it.next()?, 0]);
                let len = ((len as u64 * max_alloc_size as u64) >> 24) as usize;
                log::trace!("alloc {}", len);

                match heap.allocate(len) {
                    Ok(addr) => {
                        log::trace!(" → {}", addr);
                        sa.allocate(addr, len);
                        let fill = allocs.len() as u8;
                        heap.payload_mut(addr).unwrap()[..len].fill(fill);
                        allocs.push(Alloc { addr, len, fill });
                    }
                    Err(e) => {
                        log::trace!(" → {}", e);
                        assert!(len <= RandomHeap::SLOT_PAYLOAD);
                        assert_eq!(e, AllocError::OutOfMemory(Exhausted::Small));
                        assert_eq!(heap.stats().free_slots, 0);
                    }
                }
            }
            3..=5 => {
                let alloc_i = it.next()?;
                if !allocs.is_empty() {
                    let alloc = allocs.swap_remove(alloc_i as usize % allocs.len());
                    log::trace!("free {:?}", alloc);
                    verify!(alloc, alloc.len);

                    heap.free(alloc.addr).unwrap();
                    sa.deallocate(alloc.addr, alloc.len);
                    assert_eq!(
                        heap.free(alloc.addr).unwrap_err(),
                        heap.payload(alloc.addr).unwrap_err()
                    );
                }
            }
            6..=7 => {
                let alloc_i = it.next()?;
                if !allocs.is_empty() {
                    let len = u32::from_le_bytes([it.next()?, it.next()?, it.next()?, 0]);
                    let len = ((len as u64 * max_alloc_size as u64) >> 24) as usize;
                    // Shrink to nothing every so often
                    let len = if it.next()? % 4 == 0 { 0 } else { len };

                    let alloc_i = alloc_i as usize % allocs.len();
                    log::trace!("realloc {:?} to {}", allocs[alloc_i], len);

                    let old_len = allocs[alloc_i].len;
                    let addr = heap.reallocate(allocs[alloc_i].addr, len).unwrap();
                    log::trace!(" → {}", addr);

                    let alloc = &mut allocs[alloc_i];
                    sa.deallocate(alloc.addr, alloc.len);
                    alloc.addr = addr;
                    alloc.len = len;
                    sa.allocate(alloc.addr, alloc.len);
                    verify!(allocs[alloc_i], old_len.min(len));
                    let alloc = &allocs[alloc_i];
                    heap.payload_mut(alloc.addr).unwrap()[..len].fill(alloc.fill);
                }
            }
            _ => unreachable!(),
        }
    }
}
