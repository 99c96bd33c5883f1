use crate::cluster::ClusterLevel;
use crate::error::Result;
use crate::metadata::{MetadataStore, StreamRow};
use crate::payload::PayloadStore;

/// Allocates at least `needed_bytes` of stream capacity for `file_id`,
/// preferring reuse of free streams over growing the payload file (§4.4).
///
/// Policy, in order:
/// 1. Adopt free streams container-wide, largest first, until their combined
///    `size` covers `needed_bytes` or none remain.
/// 2. If still short, append exactly one new stream sized to the remainder
///    rounded up to the cluster size.
///
/// Returns the streams now usable to satisfy the request, in write order
/// (`stream_order` ascending); `used` is `0` on every one of them.
pub(crate) fn allocate(
    metadata: &MetadataStore,
    payload: &mut PayloadStore,
    file_id: i64,
    needed_bytes: u64,
    cluster_level: ClusterLevel,
) -> Result<Vec<StreamRow>> {
    if needed_bytes == 0 {
        return Ok(Vec::new());
    }

    let mut acquired = Vec::new();
    let mut covered = 0u64;
    let mut next_order = metadata.max_stream_order(file_id)? + 1;

    for free in metadata.free_streams()? {
        if covered >= needed_bytes {
            break;
        }
        metadata.adopt_stream(free.id, file_id, next_order)?;
        covered += free.size as u64;
        acquired.push(StreamRow { file_id, stream_order: next_order, used: 0, ..free });
        next_order += 1;
    }

    if covered < needed_bytes {
        let remaining = needed_bytes - covered;
        let size = cluster_level.round_up(remaining);
        let start = payload.append(&vec![0u8; size as usize])?;
        let id = metadata.insert_stream(file_id, next_order, start, size, 0)?;
        acquired.push(StreamRow {
            id,
            file_id,
            stream_order: next_order,
            start: start as i64,
            size: size as i64,
            used: 0,
        });
    }

    Ok(acquired)
}
