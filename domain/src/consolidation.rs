//! Merges the downloaded chunks of a recording into one media file.
//!
//! Chunks are appended in strictly increasing `chunk_number` order. Timing
//! gaps or overlaps between neighbouring chunks are logged and tolerated; a
//! missing, empty or unreadable chunk file fails the merge.

use chrono::Duration;
use entity::chunk_status::ChunkStatus;
use entity::recording_chunks;
use log::*;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const COPY_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationOutcome {
    pub output: PathBuf,
    pub chunk_count: i32,
    /// Sum of the contributing chunk durations.
    pub total_duration_seconds: i64,
    /// Sum of the contributing chunk file sizes.
    pub total_file_size_bytes: i64,
    pub discontinuities: Vec<Discontinuity>,
    /// The output from an earlier run was complete and has been kept.
    pub reused_existing: bool,
}

/// Timing mismatch between two consecutive chunks beyond the tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct Discontinuity {
    pub after_chunk: i32,
    pub before_chunk: i32,
    /// Positive for a gap, negative for an overlap.
    pub offset: Duration,
}

#[derive(Debug)]
pub enum ConsolidationError {
    NoChunks,
    NotDownloaded { chunk_number: i32 },
    MissingFile { chunk_number: i32, path: PathBuf },
    EmptyFile { chunk_number: i32 },
    Unreadable { chunk_number: i32, source: io::Error },
    /// Writing the consolidated output failed.
    Output(io::Error),
}

impl ConsolidationError {
    pub fn chunk_number(&self) -> Option<i32> {
        match self {
            ConsolidationError::NotDownloaded { chunk_number }
            | ConsolidationError::MissingFile { chunk_number, .. }
            | ConsolidationError::EmptyFile { chunk_number }
            | ConsolidationError::Unreadable { chunk_number, .. } => Some(*chunk_number),
            ConsolidationError::NoChunks | ConsolidationError::Output(_) => None,
        }
    }

    /// Only local output failures are worth retrying; bad input chunks are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConsolidationError::Output(_))
    }
}

impl fmt::Display for ConsolidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConsolidationError::NoChunks => write!(f, "recording has no chunks to consolidate"),
            ConsolidationError::NotDownloaded { chunk_number } => {
                write!(f, "chunk {chunk_number} is not downloaded")
            }
            ConsolidationError::MissingFile { chunk_number, path } => {
                write!(f, "chunk {chunk_number} file is missing: {}", path.display())
            }
            ConsolidationError::EmptyFile { chunk_number } => {
                write!(f, "chunk {chunk_number} file is empty")
            }
            ConsolidationError::Unreadable {
                chunk_number,
                source,
            } => write!(f, "chunk {chunk_number} file is unreadable: {source}"),
            ConsolidationError::Output(source) => {
                write!(f, "failed to write consolidated file: {source}")
            }
        }
    }
}

impl std::error::Error for ConsolidationError {}

/// Gaps and overlaps between consecutive chunks larger than `tolerance`.
pub fn find_discontinuities(
    chunks: &[recording_chunks::Model],
    tolerance: Duration,
) -> Vec<Discontinuity> {
    chunks
        .windows(2)
        .filter_map(|pair| {
            let offset = pair[1].start_time - pair[0].end_time;
            (offset.abs() > tolerance).then(|| Discontinuity {
                after_chunk: pair[0].chunk_number,
                before_chunk: pair[1].chunk_number,
                offset,
            })
        })
        .collect()
}

struct VerifiedChunk {
    chunk_number: i32,
    path: PathBuf,
    size_bytes: i64,
    duration_seconds: i64,
}

async fn verify(chunk: &recording_chunks::Model) -> Result<VerifiedChunk, ConsolidationError> {
    let chunk_number = chunk.chunk_number;
    if chunk.status != ChunkStatus::Downloaded {
        return Err(ConsolidationError::NotDownloaded { chunk_number });
    }
    let path = chunk
        .local_path
        .as_deref()
        .map(PathBuf::from)
        .ok_or(ConsolidationError::NotDownloaded { chunk_number })?;

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConsolidationError::MissingFile { chunk_number, path })
        }
        Err(source) => {
            return Err(ConsolidationError::Unreadable {
                chunk_number,
                source,
            })
        }
    };
    if !metadata.is_file() {
        return Err(ConsolidationError::MissingFile { chunk_number, path });
    }
    if metadata.len() == 0 {
        return Err(ConsolidationError::EmptyFile { chunk_number });
    }

    let size_bytes = metadata.len() as i64;
    if let Some(recorded) = chunk.file_size_bytes.filter(|&s| s != size_bytes) {
        warn!("Chunk {chunk_number} is {size_bytes} bytes on disk but {recorded} were recorded");
    }

    Ok(VerifiedChunk {
        chunk_number,
        path,
        size_bytes,
        duration_seconds: (chunk.end_time - chunk.start_time).num_seconds().max(0),
    })
}

/// Concatenates `chunks` into `output`.
///
/// The merge is written to a side file and renamed into place, so an existing
/// `output` is always complete and is reused instead of being rebuilt.
pub async fn consolidate(
    chunks: &[recording_chunks::Model],
    output: &Path,
    tolerance: Duration,
) -> Result<ConsolidationOutcome, ConsolidationError> {
    if chunks.is_empty() {
        return Err(ConsolidationError::NoChunks);
    }

    let mut ordered = chunks.to_vec();
    ordered.sort_by_key(|chunk| chunk.chunk_number);

    let mut verified = Vec::with_capacity(ordered.len());
    for chunk in &ordered {
        verified.push(verify(chunk).await?);
    }

    let discontinuities = find_discontinuities(&ordered, tolerance);
    for d in &discontinuities {
        warn!(
            "{} of {}s between chunks {} and {} of {}",
            if d.offset > Duration::zero() { "Gap" } else { "Overlap" },
            d.offset.num_milliseconds().abs() as f64 / 1000.0,
            d.after_chunk,
            d.before_chunk,
            output.display()
        );
    }

    let reused_existing = matches!(
        tokio::fs::metadata(output).await,
        Ok(metadata) if metadata.is_file() && metadata.len() > 0
    );
    if reused_existing {
        info!("Reusing consolidated file {}", output.display());
    } else {
        write_output(&verified, output).await?;
        info!(
            "Consolidated {} chunks into {}",
            verified.len(),
            output.display()
        );
    }

    Ok(ConsolidationOutcome {
        output: output.to_path_buf(),
        chunk_count: verified.len() as i32,
        total_duration_seconds: verified.iter().map(|c| c.duration_seconds).sum(),
        total_file_size_bytes: verified.iter().map(|c| c.size_bytes).sum(),
        discontinuities,
        reused_existing,
    })
}

async fn write_output(chunks: &[VerifiedChunk], output: &Path) -> Result<(), ConsolidationError> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ConsolidationError::Output)?;
    }

    let partial = output.with_extension("part");
    let mut out = tokio::fs::File::create(&partial)
        .await
        .map_err(ConsolidationError::Output)?;
    let mut buffer = vec![0u8; COPY_BUFFER_BYTES];

    for chunk in chunks {
        let unreadable = |source| ConsolidationError::Unreadable {
            chunk_number: chunk.chunk_number,
            source,
        };
        let mut input = tokio::fs::File::open(&chunk.path).await.map_err(unreadable)?;
        loop {
            let read = input.read(&mut buffer).await.map_err(unreadable)?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])
                .await
                .map_err(ConsolidationError::Output)?;
        }
    }

    out.flush().await.map_err(ConsolidationError::Output)?;
    out.sync_all().await.map_err(ConsolidationError::Output)?;
    drop(out);

    tokio::fs::rename(&partial, output)
        .await
        .map_err(ConsolidationError::Output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use tempfile::TempDir;

    fn chunk(dir: &TempDir, number: i32, start_min: i64, end_min: i64, body: &[u8]) -> recording_chunks::Model {
        let path = dir.path().join(format!("chunk-{number:04}.bin"));
        std::fs::write(&path, body).unwrap();
        let base = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 9, 0, 0)
            .unwrap();
        recording_chunks::Model {
            id: number as i64,
            recording_id: 1,
            chunk_number: number,
            task_id: Some(format!("t-{number}")),
            status: ChunkStatus::Downloaded,
            start_time: base + Duration::minutes(start_min),
            end_time: base + Duration::minutes(end_min),
            local_path: Some(path.to_string_lossy().into_owned()),
            file_size_bytes: Some(body.len() as i64),
            failure_reason: None,
            created_at: base,
            updated_at: base,
        }
    }

    #[tokio::test]
    async fn merges_in_chunk_number_order_regardless_of_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![
            chunk(&dir, 3, 30, 45, b"ccc"),
            chunk(&dir, 1, 0, 15, b"a"),
            chunk(&dir, 2, 15, 30, b"bb"),
        ];
        let output = dir.path().join("out").join("consolidated.mp4");

        let outcome = consolidate(&chunks, &output, Duration::seconds(2))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"abbccc");
        assert_eq!(outcome.chunk_count, 3);
        assert_eq!(outcome.total_duration_seconds, 2700);
        assert_eq!(outcome.total_file_size_bytes, 6);
        assert!(outcome.discontinuities.is_empty());
        assert!(!outcome.reused_existing);
        assert!(!output.with_extension("part").exists());
    }

    #[tokio::test]
    async fn gaps_are_reported_but_do_not_fail_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![chunk(&dir, 1, 0, 15, b"a"), chunk(&dir, 2, 16, 30, b"b")];
        let output = dir.path().join("consolidated.mp4");

        let outcome = consolidate(&chunks, &output, Duration::seconds(2))
            .await
            .unwrap();

        assert_eq!(
            outcome.discontinuities,
            vec![Discontinuity {
                after_chunk: 1,
                before_chunk: 2,
                offset: Duration::minutes(1),
            }]
        );
        assert_eq!(std::fs::read(&output).unwrap(), b"ab");
    }

    #[tokio::test]
    async fn empty_chunk_is_a_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![chunk(&dir, 1, 0, 15, b"a"), chunk(&dir, 2, 15, 30, b"")];
        let output = dir.path().join("consolidated.mp4");

        let err = consolidate(&chunks, &output, Duration::seconds(2))
            .await
            .unwrap_err();

        assert!(matches!(err, ConsolidationError::EmptyFile { chunk_number: 2 }));
        assert!(!err.is_transient());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn missing_chunk_file_names_the_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let missing = chunk(&dir, 2, 15, 30, b"b");
        std::fs::remove_file(missing.local_path.as_deref().unwrap()).unwrap();
        let chunks = vec![chunk(&dir, 1, 0, 15, b"a"), missing];

        let err = consolidate(&chunks, &dir.path().join("out.mp4"), Duration::seconds(2))
            .await
            .unwrap_err();

        assert_eq!(err.chunk_number(), Some(2));
        assert!(err.to_string().contains("chunk 2"));
    }

    #[tokio::test]
    async fn existing_output_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = vec![chunk(&dir, 1, 0, 15, b"new")];
        let output = dir.path().join("consolidated.mp4");
        std::fs::write(&output, b"previous run").unwrap();

        let outcome = consolidate(&chunks, &output, Duration::seconds(2))
            .await
            .unwrap();

        assert!(outcome.reused_existing);
        assert_eq!(std::fs::read(&output).unwrap(), b"previous run");
    }
}
