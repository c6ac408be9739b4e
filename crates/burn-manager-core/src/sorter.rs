//! Capacity-bounded packing of files onto fresh volumes.
//!
//! Each volume is seeded with the largest pending file, then repeatedly takes the
//! pending file whose size is nearest to half the space still free, until even
//! the smallest pending file no longer fits.

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::model::{FileHandle, VolumeRecord};

#[derive(Debug, Default)]
pub struct Distribution {
    pub volumes: Vec<VolumeRecord>,
    /// Files with no known size or too large for an empty volume.
    pub unplaceable: Vec<FileHandle>,
}

/// Packs `files` onto as many new volumes of `capacity` bytes as needed.
///
/// Volumes receive consecutive identifiers starting at 0 and are named
/// `Sorted Volume <id>`. Every placeable file lands on exactly one volume and no
/// volume's cluster-adjusted usage exceeds `capacity`.
///
/// `respect_grouping` is accepted for monolithic-collection support and does not
/// change the result yet.
pub fn sort_for_distribution(
    files: &[FileHandle],
    cluster_size: u64,
    capacity: u64,
    respect_grouping: bool,
) -> Result<Distribution, Error> {
    if respect_grouping {
        debug!("Grouping by monolithic collection is not applied");
    }

    let probe = VolumeRecord::new(capacity).with_cluster_size(cluster_size);
    let mut distribution = Distribution::default();
    let mut pending: Vec<(FileHandle, u64)> = Vec::with_capacity(files.len());

    for file in files {
        match file.size() {
            Some(size) if probe.cluster_adjust(size) <= capacity => pending.push((file.clone(), size)),
            Some(size) => {
                warn!(
                    "{} ({} bytes) exceeds volume capacity {}",
                    file.path().unwrap_or_default(),
                    size,
                    capacity
                );
                distribution.unplaceable.push(file.clone());
            }
            None => {
                warn!("{} has no known size", file.path().unwrap_or_default());
                distribution.unplaceable.push(file.clone());
            }
        }
    }

    // Stable, so equal sizes keep their input order.
    pending.sort_by(|a, b| b.1.cmp(&a.1));

    while !pending.is_empty() {
        let id = VolumeRecord::get_new_id(distribution.volumes.iter().map(VolumeRecord::id))?;
        let mut volume = VolumeRecord::new(capacity)
            .with_cluster_size(cluster_size)
            .with_name(format!("Sorted Volume {id}"));
        volume.set_identifier_to(id);

        let (seed, _) = pending.remove(0);
        volume.add(&seed);
        fill_volume(&mut volume, &mut pending);

        debug!(
            "Volume {} holds {} files, {} bytes free",
            id,
            volume.len(),
            volume.space_remaining()
        );
        distribution.volumes.push(volume);
    }

    info!(
        "Distributed {} files over {} volumes ({} unplaceable)",
        files.len() - distribution.unplaceable.len(),
        distribution.volumes.len(),
        distribution.unplaceable.len()
    );
    Ok(distribution)
}

fn fill_volume(volume: &mut VolumeRecord, pending: &mut Vec<(FileHandle, u64)>) {
    let mut origin = 0;
    while let Some((_, smallest)) = pending.last() {
        if volume.cluster_adjust(*smallest) > volume.space_remaining() {
            break;
        }

        let target = volume.space_remaining() / 2;
        let mut index = find_nearest(pending, origin.min(pending.len() - 1), target);
        // Terminates: the last entry is known to fit.
        while volume.cluster_adjust(pending[index].1) > volume.space_remaining() {
            index += 1;
        }

        let (file, _) = pending.remove(index);
        volume.add(&file);
        origin = if index < pending.len() {
            index
        } else {
            index.saturating_sub(1)
        };
    }
}

/// Index of the entry nearest `target` in a descending list, walking out from
/// `origin`. Ties resolve to the smaller file.
fn find_nearest(pending: &[(FileHandle, u64)], origin: usize, target: u64) -> usize {
    let distance = |i: usize| pending[i].1.abs_diff(target);
    let mut best = origin;
    while best > 0 && distance(best - 1) <= distance(best) {
        best -= 1;
    }
    while best + 1 < pending.len() && distance(best + 1) <= distance(best) {
        best += 1;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn files(sizes: &[u64]) -> Vec<FileHandle> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| FileHandle::new(FileRecord::new(format!("/f{i}")).with_size(*size)))
            .collect()
    }

    fn entries(sizes: &[u64]) -> Vec<(FileHandle, u64)> {
        files(sizes).into_iter().zip(sizes.iter().copied()).collect()
    }

    #[test]
    fn test_two_files_fill_one_volume_exactly() {
        let result = sort_for_distribution(&files(&[500, 300]), 1, 800, false).unwrap();
        assert_eq!(result.volumes.len(), 1);
        let volume = &result.volumes[0];
        assert_eq!(volume.len(), 2);
        assert_eq!(volume.space_remaining(), 0);
        assert_eq!(volume.id(), 0);
        assert_eq!(volume.name, "Sorted Volume 0");
    }

    #[test]
    fn test_oversized_file_is_unplaceable() {
        let input = files(&[900]);
        let result = sort_for_distribution(&input, 1, 800, false).unwrap();
        assert!(result.volumes.is_empty());
        assert_eq!(result.unplaceable.len(), 1);
        assert!(result.unplaceable[0].same_record(&input[0]));
    }

    #[test]
    fn test_unknown_size_is_unplaceable() {
        let mut input = files(&[100]);
        input.push(FileHandle::new(FileRecord::new("/unsized")));
        let result = sort_for_distribution(&input, 1, 800, false).unwrap();
        assert_eq!(result.volumes.len(), 1);
        assert_eq!(result.unplaceable.len(), 1);
    }

    #[test]
    fn test_overflow_opens_new_volumes_with_consecutive_ids() {
        let result = sort_for_distribution(&files(&[600, 600, 600]), 1, 1000, false).unwrap();
        let ids: Vec<_> = result.volumes.iter().map(VolumeRecord::id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(result.volumes.iter().all(|v| v.len() == 1));
    }

    #[test]
    fn test_placed_files_carry_relationship_to_their_volume() {
        let input = files(&[40, 30, 20]);
        let result = sort_for_distribution(&input, 1, 50, false).unwrap();
        for volume in &result.volumes {
            for member in volume.members() {
                assert!(member.lock().related_volumes.find(volume.id()).is_some());
            }
        }
    }

    #[test]
    fn test_cluster_adjustment_counts_against_capacity() {
        // 10 bytes with a 4-byte cluster occupies 12.
        let result = sort_for_distribution(&files(&[10, 10]), 4, 23, false).unwrap();
        assert_eq!(result.volumes.len(), 2);
    }

    #[test]
    fn test_find_nearest_prefers_smaller_on_tie() {
        let pending = entries(&[60, 40]);
        assert_eq!(find_nearest(&pending, 0, 50), 1);
        assert_eq!(find_nearest(&pending, 1, 50), 1);
    }

    #[test]
    fn test_find_nearest_crosses_plateaus() {
        let pending = entries(&[51, 46, 46, 41]);
        assert_eq!(find_nearest(&pending, 3, 50), 0);
        let pending = entries(&[90, 70, 70, 50]);
        assert_eq!(find_nearest(&pending, 0, 50), 3);
    }

    #[test]
    fn test_grouping_flag_does_not_change_result() {
        let sizes = [700, 400, 300, 200, 100, 50];
        let plain = sort_for_distribution(&files(&sizes), 1, 1000, false).unwrap();
        let grouped = sort_for_distribution(&files(&sizes), 1, 1000, true).unwrap();
        let shape = |d: &Distribution| -> Vec<Vec<String>> {
            d.volumes.iter().map(VolumeRecord::member_paths).collect()
        };
        assert_eq!(shape(&plain), shape(&grouped));
    }

    proptest! {
        #[test]
        fn prop_every_file_placed_once_within_capacity(
            sizes in prop::collection::vec(0u64..5_000, 0..60),
            cluster in 1u64..64,
            capacity in 1u64..10_000,
        ) {
            let input = files(&sizes);
            let result = sort_for_distribution(&input, cluster, capacity, false).unwrap();

            let mut seen = HashSet::new();
            for volume in &result.volumes {
                prop_assert!(volume.space_used() <= capacity);
                prop_assert!(!volume.is_empty());
                for path in volume.member_paths() {
                    prop_assert!(seen.insert(path));
                }
            }
            for file in &result.unplaceable {
                prop_assert!(seen.insert(file.path().unwrap()));
            }
            prop_assert_eq!(seen.len(), input.len());

            let probe = VolumeRecord::new(capacity).with_cluster_size(cluster);
            for file in &result.unplaceable {
                prop_assert!(probe.cluster_adjust(file.size().unwrap()) > capacity);
            }
        }
    }
}
