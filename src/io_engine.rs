use std::io::{Read, Write};
use std::sync::Mutex;

use crate::allocator;
use crate::cluster::{ClusterLevel, DataUsagePreferences};
use crate::error::{ContainerError, Result};
use crate::metadata::{MetadataStore, StreamRow};
use crate::observer::ProgressObserver;
use crate::payload::PayloadStore;

/// Snapshot of a file's stream accounting (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct SpaceUsageInfo {
    pub streams_total: u64,
    pub streams_used: u64,
    pub space_available: u64,
    pub space_used: u64,
}

fn progress_fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

/// Reports a fatal lower-layer failure through `on_error` and honors its
/// `Signal` the same way `on_progress_updated`'s `Stop` is honored: `Stop`
/// folds the failure into the same `Aborted` framing a cooperative stop
/// would get (carrying bytes transferred so far), `Continue` lets the
/// original error propagate as-is for the caller's usual wrap_read/wrap_write
/// handling. There's no recoverable condition on this path for `on_warning`
/// to report — every failure caught here ends the operation.
fn report_error(observer: &mut dyn ProgressObserver, progress: u64, err: ContainerError) -> ContainerError {
    if observer.on_error(&err).is_stop() {
        ContainerError::aborted(progress, Some(err))
    } else {
        err
    }
}

pub(crate) fn size(metadata: &MetadataStore, file_id: i64) -> Result<u64> {
    Ok(metadata.streams_for_file(file_id)?.iter().map(|s| s.used as u64).sum())
}

pub(crate) fn space_usage(metadata: &MetadataStore, file_id: i64) -> Result<SpaceUsageInfo> {
    let streams = metadata.streams_for_file(file_id)?;
    Ok(SpaceUsageInfo {
        streams_total: streams.len() as u64,
        streams_used: streams.iter().filter(|s| s.used > 0).count() as u64,
        space_available: streams.iter().map(|s| s.size as u64).sum(),
        space_used: streams.iter().map(|s| s.used as u64).sum(),
    })
}

pub(crate) fn clear(metadata: &MetadataStore, file_id: i64) -> Result<()> {
    for stream in metadata.streams_for_file(file_id)? {
        metadata.free_stream(stream.id)?;
    }
    Ok(())
}

/// Walks the file's streams in `(stream_order, id)` order, delivering up to
/// `nbytes` of their valid (`used`) content to `dst`. Returns bytes
/// delivered, which is short of `nbytes` only once streams are exhausted.
pub(crate) fn read(
    metadata: &MetadataStore,
    payload: &Mutex<PayloadStore>,
    file_id: i64,
    dst: &mut impl Write,
    nbytes: u64,
    cluster_size: u32,
    observer: &mut dyn ProgressObserver,
) -> Result<u64> {
    let mut remaining = nbytes;
    let mut delivered = 0u64;

    for stream in metadata.streams_for_file(file_id)? {
        if remaining == 0 {
            break;
        }
        let mut stream_remaining = (stream.used as u64).min(remaining);
        let mut offset = stream.start as u64;

        while stream_remaining > 0 {
            let chunk = stream_remaining.min(cluster_size as u64);
            let bytes = payload
                .lock()
                .unwrap()
                .read_at(offset, chunk)
                .map_err(|err| report_error(&mut *observer, delivered, err))?;
            dst.write_all(&bytes)
                .map_err(|err| report_error(&mut *observer, delivered, ContainerError::from(err)))?;

            delivered += chunk;
            remaining -= chunk;
            offset += chunk;
            stream_remaining -= chunk;

            if observer.on_progress_updated(progress_fraction(delivered, nbytes)).is_stop() {
                return Err(ContainerError::aborted(delivered, None));
            }
        }
    }

    Ok(delivered)
}

/// Drains `src` into `streams` in order, updating each stream's `used` after
/// every cluster-sized chunk so a mid-write abort leaves exactly the
/// successfully-written bytes recorded (§4.5 non-transactional recovery).
fn write_into_streams(
    metadata: &MetadataStore,
    payload: &Mutex<PayloadStore>,
    streams: &[StreamRow],
    src: &mut impl Read,
    nbytes: u64,
    cluster_size: u32,
    observer: &mut dyn ProgressObserver,
) -> Result<u64> {
    let mut remaining = nbytes;
    let mut total_written = 0u64;

    for stream in streams {
        if remaining == 0 {
            break;
        }
        let to_write = (stream.size as u64).min(remaining);
        let mut stream_used = 0u64;

        while stream_used < to_write {
            let chunk_len = ((to_write - stream_used).min(cluster_size as u64)) as usize;
            let mut buf = vec![0u8; chunk_len];
            if let Err(err) = src.read_exact(&mut buf) {
                return Err(report_error(observer, total_written, ContainerError::from(err)));
            }

            let write_offset = stream.start as u64 + stream_used;
            if let Err(err) = payload.lock().unwrap().write_at(write_offset, &buf) {
                return Err(report_error(observer, total_written, err));
            }

            stream_used += chunk_len as u64;
            total_written += chunk_len as u64;
            remaining -= chunk_len as u64;
            metadata.update_stream_used(stream.id, stream_used)?;

            if observer.on_progress_updated(progress_fraction(total_written, nbytes)).is_stop() {
                return Err(ContainerError::aborted(total_written, None));
            }
        }
    }

    Ok(total_written)
}

pub(crate) fn write(
    metadata: &MetadataStore,
    payload: &Mutex<PayloadStore>,
    file_id: i64,
    src: &mut impl Read,
    nbytes: u64,
    preferences: DataUsagePreferences,
    observer: &mut dyn ProgressObserver,
) -> Result<u64> {
    let cluster_level = preferences.cluster_level();
    let cluster_size = cluster_level.bytes();

    if preferences.transactional_write() {
        write_transactional(metadata, payload, file_id, src, nbytes, cluster_level, cluster_size, observer)
    } else {
        write_non_transactional(metadata, payload, file_id, src, nbytes, cluster_level, cluster_size, observer)
    }
}

/// §4.5 non-transactional mode: frees the file's own streams up front so the
/// allocator can reclaim them, then writes into whatever it hands back.
fn write_non_transactional(
    metadata: &MetadataStore,
    payload: &Mutex<PayloadStore>,
    file_id: i64,
    src: &mut impl Read,
    nbytes: u64,
    cluster_level: ClusterLevel,
    cluster_size: u32,
    observer: &mut dyn ProgressObserver,
) -> Result<u64> {
    for stream in metadata.streams_for_file(file_id)? {
        metadata.free_stream(stream.id)?;
    }

    let streams = {
        let mut guard = payload.lock().unwrap();
        allocator::allocate(metadata, &mut guard, file_id, nbytes, cluster_level)?
    };

    write_into_streams(metadata, payload, &streams, src, nbytes, cluster_size, observer)
}

/// §4.5 transactional mode: the file's live streams stay untouched until the
/// new content is fully written and the savepoint released. Any failure
/// rolls the savepoint back, restoring the pre-write metadata byte-for-byte;
/// payload bytes written for the abandoned attempt are left on disk but
/// unreachable, since no stream row survives the rollback to address them.
#[allow(clippy::too_many_arguments)]
fn write_transactional(
    metadata: &MetadataStore,
    payload: &Mutex<PayloadStore>,
    file_id: i64,
    src: &mut impl Read,
    nbytes: u64,
    cluster_level: ClusterLevel,
    cluster_size: u32,
    observer: &mut dyn ProgressObserver,
) -> Result<u64> {
    let old_streams = metadata.streams_for_file(file_id)?;
    let savepoint = metadata.begin_savepoint()?;

    let new_streams = {
        let mut guard = payload.lock().unwrap();
        match allocator::allocate(metadata, &mut guard, file_id, nbytes, cluster_level) {
            Ok(streams) => streams,
            Err(err) => {
                drop(guard);
                let _ = savepoint.rollback();
                return Err(err);
            }
        }
    };

    match write_into_streams(metadata, payload, &new_streams, src, nbytes, cluster_size, observer) {
        Ok(written) => {
            for old in &old_streams {
                metadata.free_stream(old.id)?;
            }
            savepoint.release()?;
            Ok(written)
        }
        Err(err) => {
            let _ = savepoint.rollback();
            Err(err)
        }
    }
}
