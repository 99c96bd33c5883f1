//! Scenario 5 (spec §8): transactional abort preserves the prior content.
//!
//! The second test is grounded directly on the original implementation's
//! `H_FilesPartialWrite.Transactional_Fragmented` (see
//! `examples/original_source/trunk/proj/src/DbContainerLibTest/TestH.cpp`):
//! three files, each written twice, so the stream allocator's adopt-then-
//! append policy has to hand freed streams from one file to the next.

mod common;

#[cfg(test)]
mod tests {
    use vaultfs::{Container, ContainerError, ProgressObserver, Signal, CLUSTER_SIZE_MIN};

    const C: u64 = CLUSTER_SIZE_MIN as u64;

    fn scratch_container() -> (tempfile::TempDir, Container) {
        crate::common::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let container = Container::create(dir.path().join("container.db"), "hunter2").unwrap();
        container.set_transactional_write(true).unwrap();
        (dir, container)
    }

    fn pattern(len: u64, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(seed).wrapping_add(seed)).collect()
    }

    struct AbortImmediately;
    impl ProgressObserver for AbortImmediately {
        fn on_progress_updated(&mut self, _fraction: f64) -> Signal {
            Signal::Stop
        }
    }

    #[test]
    fn aborted_transactional_write_rolls_back_to_the_prior_content() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let file = root.create_file("f", "").unwrap();

        let first = pattern(C - 20, 3);
        file.write(&mut &first[..], first.len() as u64).unwrap();

        let second = pattern((C - 20) + (C + 50), 5);
        file.write(&mut &second[..], second.len() as u64).unwrap();
        assert_eq!(file.size().unwrap(), second.len() as u64);

        let third = pattern(C + 200, 9);
        let err = file
            .write_with_observer(&mut &third[..], third.len() as u64, &mut AbortImmediately)
            .unwrap_err();
        assert!(matches!(err, ContainerError::Aborted { .. }));

        assert_eq!(file.size().unwrap(), second.len() as u64);
        let mut readback = Vec::new();
        file.read(&mut readback, second.len() as u64).unwrap();
        assert_eq!(readback, second);
    }

    #[test]
    fn allocator_hands_freed_streams_across_files_under_transactional_writes() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let file1 = root.create_file("file1", "").unwrap();
        let file2 = root.create_file("file2", "").unwrap();
        let file3 = root.create_file("file3", "").unwrap();

        let portion1 = 2 * C - 20; // 8172: needs 2 clusters
        let half1 = portion1 / 2;
        file1.write(&mut &pattern(half1, 2)[..], half1).unwrap();
        file1.write(&mut &pattern(portion1, 2)[..], portion1).unwrap();

        let info1 = file1.get_space_usage_info().unwrap();
        assert_eq!(info1.space_used, portion1);
        assert_eq!(info1.streams_total, 2); // old 1C freed, new 2C holds the content
        assert_eq!(info1.streams_used, 1);
        assert_eq!(info1.space_available, 3 * C);

        let portion2 = 2 * C + 20; // 8212: needs 3 clusters
        let half2 = portion2 / 2;
        file2.write(&mut &pattern(half2, 4)[..], half2).unwrap(); // adopts file1's freed 1C stream
        let info2 = file2.get_space_usage_info().unwrap();
        assert_eq!(info2.space_used, half2);
        assert_eq!(info2.streams_total, 2);
        assert_eq!(info2.streams_used, 2);
        assert_eq!(info2.space_available, 2 * C);

        let info1_after = file1.get_space_usage_info().unwrap();
        assert_eq!(info1_after.streams_total, 1); // its freed stream moved to file2
        assert_eq!(info1_after.streams_used, 1);
        assert_eq!(info1_after.space_available, 2 * C);

        file2.write(&mut &pattern(portion2, 4)[..], portion2).unwrap();
        let info2 = file2.get_space_usage_info().unwrap();
        assert_eq!(info2.space_used, portion2);
        assert_eq!(info2.streams_total, 3);
        assert_eq!(info2.streams_used, 1);
        assert_eq!(info2.space_available, 5 * C);

        let portion3 = 3 * C + 40; // needs 4 clusters, but two free 1C streams from file2 cover 6164 first
        let half3 = portion3 / 2;
        file3.write(&mut &pattern(half3, 6)[..], half3).unwrap(); // adopts both of file2's freed 1C streams
        let info3 = file3.get_space_usage_info().unwrap();
        assert_eq!(info3.space_used, half3);
        assert_eq!(info3.streams_total, 2);
        assert_eq!(info3.streams_used, 2);
        assert_eq!(info3.space_available, 2 * C);

        let info2_after = file2.get_space_usage_info().unwrap();
        assert_eq!(info2_after.streams_total, 1);
        assert_eq!(info2_after.streams_used, 1);
        assert_eq!(info2_after.space_available, 3 * C);

        file3.write(&mut &pattern(portion3, 6)[..], portion3).unwrap();
        let info3 = file3.get_space_usage_info().unwrap();
        assert_eq!(info3.space_used, portion3);
        assert_eq!(info3.streams_total, 3);
        assert_eq!(info3.streams_used, 1);
        assert_eq!(info3.space_available, 6 * C);
    }
}
