//! Property tests for the universal double-buffer invariants: readers never
//! observe a torn write, and every committed slot reflects some prior write
//! in full.

use proptest::prelude::*;
use rtpubsub_dbo::Dbo;

proptest! {
    #[test]
    fn reader_never_observes_a_torn_write(
        writes in prop::collection::vec(any::<u8>(), 1..200),
        n_slots in 2usize..6,
    ) {
        let dbo = Dbo::new(n_slots, 16).unwrap();
        for byte in writes {
            let mut w = loop {
                if let Ok(w) = dbo.get_write_slot() {
                    break w;
                }
            };
            w.as_mut_slice().fill(byte);
            w.commit();

            let r = dbo.get_read_slot();
            let data = r.as_slice();
            prop_assert!(data.iter().all(|&b| b == data[0]));
        }
    }

    #[test]
    fn committed_slot_is_always_last_written(
        n_writes in 1usize..100,
        n_slots in 2usize..8,
    ) {
        let dbo = Dbo::new(n_slots, 8).unwrap();
        let mut last_committed = dbo.last_written();
        for i in 0..n_writes {
            let mut w = dbo.get_write_slot().unwrap();
            w.as_mut_slice().fill(i as u8);
            last_committed = w.commit();
            prop_assert_eq!(dbo.last_written(), last_committed);
        }
    }

    #[test]
    fn write_partial_never_touches_bytes_outside_its_range(
        prefix_len in 0usize..8,
        patch in prop::collection::vec(any::<u8>(), 1..4),
    ) {
        let dbo = Dbo::new(3, 8).unwrap();
        let w0 = dbo.get_write_slot().unwrap();
        w0.write_partial(0, &[0xEE; 8], false, false).unwrap();

        let patch_len = patch.len().min(8 - prefix_len.min(7));
        let offset = prefix_len.min(7);
        let patch = &patch[..patch_len.max(1).min(patch.len())];
        if offset + patch.len() > 8 {
            return Ok(());
        }

        let w1 = dbo.get_write_slot().unwrap();
        w1.write_partial(offset, patch, true, true).unwrap();

        let r = dbo.get_read_slot();
        let data = r.as_slice();
        prop_assert_eq!(&data[offset..offset + patch.len()], patch);
        for (i, &b) in data.iter().enumerate() {
            if i < offset || i >= offset + patch.len() {
                prop_assert_eq!(b, 0xEE);
            }
        }
    }
}
