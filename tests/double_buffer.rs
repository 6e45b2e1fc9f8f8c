#![cfg(feature = "host")]
#![allow(missing_docs)]
//! Host-level tests for front/back column buffer ownership.

use proptest::prelude::*;
use shift_matrix::double_buffer::DoubleBuffer;
use shift_matrix::framebuffer::Framebuffer;
use shift_matrix::remap::remap_word;
use shift_matrix::ring_buffer::{MATRIX_ARENA_WORDS, RING_BYTES, RING_WORDS, RingAllocator};
use shift_matrix::scan::BufferId;

fn with_double_buffer(test: impl FnOnce(&mut DoubleBuffer<'_>)) {
    let mut arena = [0xFFFF_FFFFu32; MATRIX_ARENA_WORDS];
    let mut allocator = RingAllocator::new(&mut arena);
    let first = allocator
        .allocate(RING_WORDS, RING_BYTES)
        .expect("first buffer fits");
    let second = allocator
        .allocate(RING_WORDS, RING_BYTES)
        .expect("second buffer fits");
    let mut buffers = DoubleBuffer::new(first, second);
    test(&mut buffers);
}

fn frame_with(word: u32) -> Framebuffer {
    Framebuffer([word; 8])
}

#[derive(Clone, Copy, Debug)]
enum Step {
    Write(u32),
    Swap,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![any::<u32>().prop_map(Step::Write), Just(Step::Swap)]
}

/// A frame whose rows all differ, so a row written to the wrong slot is caught.
fn varied_frame(seed: u32) -> Framebuffer {
    Framebuffer(std::array::from_fn(|row| seed.rotate_left(row as u32 * 4) ^ row as u32))
}

#[test]
fn new_buffers_are_blank() {
    with_double_buffer(|buffers| {
        assert_eq!(buffers.front_words(), &[0; RING_WORDS]);
        assert_eq!(buffers.back_words(), &[0; RING_WORDS]);
        assert_eq!(buffers.front_source().id, BufferId::ColumnA);
        assert_eq!(buffers.back_source().id, BufferId::ColumnB);
    });
}

#[test]
fn write_touches_back_buffer_only() {
    with_double_buffer(|buffers| {
        let front_before = buffers.front_words().to_vec();
        buffers.write(&frame_with(0x0000_00F0));
        assert_eq!(buffers.front_words(), front_before.as_slice());
        assert_eq!(buffers.back_words(), &[remap_word(0x0000_00F0); RING_WORDS]);
    });
}

#[test]
fn swap_flips_roles_and_returns_new_front() {
    with_double_buffer(|buffers| {
        let back = buffers.back_source();
        let front = buffers.front_source();
        let published = buffers.swap();
        assert_eq!(published, back);
        assert_eq!(buffers.front_source(), back);
        assert_eq!(buffers.back_source(), front);
        assert_eq!(published.address % RING_BYTES, 0);
        assert_ne!(front.address, back.address);
    });
}

#[test]
fn last_write_before_swap_wins() {
    with_double_buffer(|buffers| {
        buffers.write(&frame_with(0x0000_0001));
        buffers.write(&frame_with(0x0000_0010));
        buffers.write(&frame_with(0x8000_0000));
        buffers.swap();
        assert_eq!(buffers.front_words(), &[0x1000_0000; RING_WORDS]);
    });
}

#[test]
fn writes_after_swap_never_reach_the_front() {
    with_double_buffer(|buffers| {
        buffers.write(&frame_with(0x0000_0003));
        buffers.swap();
        let shown = buffers.front_words().to_vec();
        for word in [0x10, 0x20, 0x40, 0x80] {
            buffers.write(&frame_with(word));
            assert_eq!(buffers.front_words(), shown.as_slice());
        }
    });
}

#[test]
fn words_of_matches_roles() {
    with_double_buffer(|buffers| {
        buffers.write(&frame_with(0x0000_0005));
        assert_eq!(buffers.words_of(BufferId::ColumnB), buffers.back_words());
        assert_eq!(buffers.words_of(BufferId::ColumnA), buffers.front_words());
        assert!(buffers.words_of(BufferId::RowPatterns).is_empty());
    });
}

proptest! {
    #[test]
    fn roles_stay_exclusive_over_any_write_swap_sequence(
        steps in prop::collection::vec(step(), 0..48),
    ) {
        let mut arena = [0xFFFF_FFFFu32; MATRIX_ARENA_WORDS];
        let mut allocator = RingAllocator::new(&mut arena);
        let first = allocator.allocate(RING_WORDS, RING_BYTES).expect("first buffer fits");
        let second = allocator.allocate(RING_WORDS, RING_BYTES).expect("second buffer fits");
        let mut buffers = DoubleBuffer::new(first, second);

        // Expected remapped contents of each role.
        let mut front = [0u32; RING_WORDS];
        let mut back = [0u32; RING_WORDS];
        // Last write since the previous swap, if any.
        let mut pending: Option<Framebuffer> = None;

        for step in steps {
            match step {
                Step::Write(seed) => {
                    let frame = varied_frame(seed);
                    buffers.write(&frame);
                    back = frame.0.map(remap_word);
                    pending = Some(frame);
                }
                Step::Swap => {
                    buffers.swap();
                    std::mem::swap(&mut front, &mut back);
                    if let Some(frame) = pending.take() {
                        let expected = frame.0.map(remap_word);
                        prop_assert_eq!(buffers.front_words(), expected.as_slice());
                    }
                }
            }
            prop_assert_ne!(buffers.front_source().id, buffers.back_source().id);
            prop_assert_ne!(buffers.front_source().address, buffers.back_source().address);
            prop_assert_eq!(buffers.front_words(), front.as_slice());
            prop_assert_eq!(buffers.back_words(), back.as_slice());
        }
    }
}
