#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use efs_core::FS_FLAG_RW;
use efs_extent::{ExtentHandle, ExtentOp};
use efs_harness::{
    IMAGE_BLOCK_MAX, IMAGE_BLOCK_SIZE, IMAGE_TEST_INO, build_fs, leaf_node, root_index,
};

/// Two-level tree with two fully loaded leaf nodes.
fn bench_extent_walk(c: &mut Criterion) {
    let half = u32::from(IMAGE_BLOCK_MAX);
    let leaf_a: Vec<(u32, u16, u64)> = (0..half)
        .map(|i| (i * 2, 1_u16, 1000 + u64::from(i)))
        .collect();
    let leaf_b: Vec<(u32, u16, u64)> = (0..half)
        .map(|i| (half * 2 + i * 2, 1_u16, 5000 + u64::from(i)))
        .collect();
    let total_blocks = u64::from(half) * 4;

    let root = root_index(1, &[(0, 50), (half * 2, 51)]).expect("root");
    let nodes = vec![
        (
            50_u64,
            leaf_node(IMAGE_BLOCK_SIZE as usize, IMAGE_BLOCK_MAX, &leaf_a).expect("leaf a"),
        ),
        (
            51_u64,
            leaf_node(IMAGE_BLOCK_SIZE as usize, IMAGE_BLOCK_MAX, &leaf_b).expect("leaf b"),
        ),
    ];
    let fs = build_fs(
        &root,
        total_blocks * u64::from(IMAGE_BLOCK_SIZE),
        &nodes,
        FS_FLAG_RW,
    )
    .expect("build fs");

    c.bench_function("next_leaf_full_walk", |b| {
        let mut handle = ExtentHandle::open(&fs, IMAGE_TEST_INO).expect("open handle");
        b.iter(|| {
            handle.get(ExtentOp::Root).expect("root");
            let mut count = 0_u32;
            while let Ok(extent) = handle.get(ExtentOp::NextLeaf) {
                black_box(extent);
                count += 1;
            }
            assert_eq!(count, half * 2);
        });
    });

    c.bench_function("goto_scattered_blocks", |b| {
        let mut handle = ExtentHandle::open(&fs, IMAGE_TEST_INO).expect("open handle");
        b.iter(|| {
            for blk in [0_u64, 100, 500, 680, 1200, 1358] {
                handle.goto_block(black_box(blk)).expect("goto");
            }
        });
    });
}

criterion_group!(extent, bench_extent_walk);
criterion_main!(extent);
