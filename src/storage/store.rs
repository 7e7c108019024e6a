//! JSONL(.gz) store for vector index records
//!
//! One JSON object per line:
//! `{"id":"notes.txt::0","source":"notes.txt","chunkIndex":0,"text":"...","vector":[...]}`
//!
//! Appends are the normal write path and never deduplicate. Compaction and
//! full rewrites go through a temp file in the same directory followed by a
//! rename, so a crash mid-write leaves the previous store untouched. Every
//! write path takes the same internal lock: an append can never interleave
//! with a rewrite.
//!
//! A crash during an append can leave a partial last line (plain store) or a
//! torn gzip member. Appends start on a fresh line, and the gzip reader skips
//! a damaged member and resumes at the next member header, so later appends
//! stay readable and the next compaction writes a clean file.

use crate::chunking::chunk_id;
use crate::error::{LibragError, Result};
use crate::index::{Record, VectorIndex};
use ahash::{HashMap, HashMapExt};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Persisted line shape; every field is optional so one bad line is skipped
/// instead of failing the whole read
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreLine {
    id: Option<String>,
    source: Option<String>,
    #[serde(default)]
    chunk_index: usize,
    #[serde(default)]
    text: String,
    #[serde(default)]
    vector: Vec<f32>,
}

impl StoreLine {
    /// A line without a source cannot be attributed to any file and is dropped;
    /// a missing id is derived from source and chunk index
    fn into_record(self) -> Option<Record> {
        let source = self.source.filter(|s| !s.is_empty())?;
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| chunk_id(&source, self.chunk_index));
        Some(Record {
            id,
            source,
            chunk_index: self.chunk_index,
            text: self.text,
            vector: self.vector,
        })
    }
}

/// Outcome of reading the raw store
#[derive(Debug, Default)]
pub struct ReadResult {
    /// Parsed records in file order, duplicates included
    pub records: Vec<Record>,
    /// Non-blank lines seen
    pub lines: usize,
    /// Lines that failed to parse or had no source
    pub skipped: usize,
}

/// Outcome of [`IndexFileStore::load_into_index`]
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub path: String,
    pub records: usize,
    pub skipped: usize,
    pub seconds: f64,
}

/// Outcome of [`IndexFileStore::compact`]
#[derive(Debug, Clone, Serialize)]
pub struct CompactReport {
    pub lines_in: usize,
    pub records_out: usize,
    pub sources: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub seconds: f64,
}

/// Keep the last occurrence of each id, in the position its id was first
/// seen, and drop records whose source is not live
pub fn compact_records<I>(records: I, live_sources: &HashSet<String>) -> Vec<Record>
where
    I: IntoIterator<Item = Record>,
{
    let mut out: Vec<Record> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        if !live_sources.contains(&record.source) {
            continue;
        }
        match positions.get(&record.id) {
            Some(&pos) => out[pos] = record,
            None => {
                positions.insert(record.id.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Progress interval for store writes, scaled to the batch size
pub(crate) fn pick_log_every(size: usize) -> usize {
    if size <= 100 {
        25
    } else if size <= 1000 {
        100
    } else {
        250
    }
}

/// Start of every member `GzEncoder` writes: magic, deflate, no flags, zero mtime
const GZ_MEMBER_HEADER: [u8; 8] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0];

fn is_gz(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().ends_with(".gz"))
        .unwrap_or(false)
}

/// Durable store file plus the lock serializing every access to it
pub struct IndexFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IndexFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn is_gzip(&self) -> bool {
        is_gz(&self.path)
    }

    /// Size of the store file on disk, `None` if it does not exist
    pub fn file_size(&self) -> Result<Option<u64>> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LibragError::io(
                e,
                format!("Failed to stat store file: {}", self.path.display()),
            )),
        }
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                LibragError::io(
                    e,
                    format!("Failed to create store directory: {}", parent.display()),
                )
            })?;
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Append records as new lines, creating the file and its directory if needed
    ///
    /// A gzip store gets one new gzip member per call.
    pub fn append_batch(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        self.ensure_parent()?;

        let start = Instant::now();
        let exists = self.path.exists();
        let torn_line = exists && !is_gz(&self.path) && !self.ends_with_newline()?;
        info!(
            "{} {} records to {}",
            if exists { "Appending" } else { "Creating" },
            records.len(),
            self.path.display()
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                LibragError::io(
                    e,
                    format!("Failed to open store for append: {}", self.path.display()),
                )
            })?;
        if torn_line {
            warn!(
                "Store {} ends in a partial line; starting a new line",
                self.path.display()
            );
            file.write_all(b"\n").map_err(|e| {
                LibragError::io(e, format!("Failed to write store: {}", self.path.display()))
            })?;
        }
        self.write_records(file, records, "Append")?;

        info!(
            "Append complete: {} ({} records) in {:.2}s",
            self.path.display(),
            records.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn ends_with_newline(&self) -> Result<bool> {
        let context = || format!("Failed to inspect store tail: {}", self.path.display());
        let mut file = File::open(&self.path).map_err(|e| LibragError::io(e, context()))?;
        let len = file.metadata().map_err(|e| LibragError::io(e, context()))?.len();
        if len == 0 {
            return Ok(true);
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .map_err(|e| LibragError::io(e, context()))?;
        file.read_exact(&mut last)
            .map_err(|e| LibragError::io(e, context()))?;
        Ok(last[0] == b'\n')
    }

    /// Replace the whole store with `records` via temp file and rename
    pub fn rewrite_from_batch(&self, records: &[Record]) -> Result<()> {
        let _guard = self.lock.lock();
        self.rewrite_locked(records)
    }

    fn rewrite_locked(&self, records: &[Record]) -> Result<()> {
        self.ensure_parent()?;
        let start = Instant::now();
        let tmp = self.tmp_path();
        info!("Writing {} records to {}", records.len(), self.path.display());

        let file = File::create(&tmp).map_err(|e| {
            LibragError::io(e, format!("Failed to create temp store: {}", tmp.display()))
        })?;
        if let Err(e) = self.write_records(file, records, "Write") {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &self.path).map_err(|e| {
            LibragError::io(
                e,
                format!(
                    "Failed to move temp store into place: {} -> {}",
                    tmp.display(),
                    self.path.display()
                ),
            )
        })?;

        info!(
            "Write complete: {} ({} records) in {:.2}s",
            self.path.display(),
            records.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn write_records(&self, file: File, records: &[Record], label: &str) -> Result<()> {
        let context = || format!("Failed to write store: {}", self.path.display());
        if is_gz(&self.path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            write_lines(&mut encoder, records, label).map_err(|e| LibragError::io(e, context()))?;
            let mut inner = encoder.finish().map_err(|e| LibragError::io(e, context()))?;
            inner.flush().map_err(|e| LibragError::io(e, context()))?;
            inner
                .get_ref()
                .sync_all()
                .map_err(|e| LibragError::io(e, context()))?;
        } else {
            let mut writer = BufWriter::new(file);
            write_lines(&mut writer, records, label).map_err(|e| LibragError::io(e, context()))?;
            writer.flush().map_err(|e| LibragError::io(e, context()))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| LibragError::io(e, context()))?;
        }
        Ok(())
    }

    /// Visit every parseable record in file order
    ///
    /// Blank lines are ignored. Malformed lines are logged and skipped. In a
    /// gzip store a damaged member keeps the lines decoded before the damage
    /// and reading resumes at the next member; a damaged last member ends the
    /// read.
    fn for_each_record<F>(&self, mut visit: F) -> Result<(usize, usize)>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let file = File::open(&self.path).map_err(|e| {
            LibragError::io(e, format!("Failed to open store: {}", self.path.display()))
        })?;

        let mut tally = LineTally::default();
        if is_gz(&self.path) {
            self.read_gz_members(BufReader::new(file), &mut tally, &mut visit)?;
        } else if let Some(e) = read_lines(BufReader::new(file), &mut tally, &mut visit)? {
            return Err(LibragError::io(
                e,
                format!("Failed to read store: {}", self.path.display()),
            ));
        }
        Ok((tally.lines, tally.skipped))
    }

    fn read_gz_members<F>(&self, mut src: BufReader<File>, tally: &mut LineTally, visit: &mut F) -> Result<()>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let context = || format!("Failed to read store: {}", self.path.display());
        loop {
            let start = src.stream_position().map_err(|e| LibragError::io(e, context()))?;
            if src.fill_buf().map_err(|e| LibragError::io(e, context()))?.is_empty() {
                return Ok(());
            }

            let member = BufReader::new(GzDecoder::new(&mut src));
            let Some(damage) = read_lines(member, tally, visit)? else {
                continue;
            };

            match find_member_header(&mut src, start + 1).map_err(|e| LibragError::io(e, context()))? {
                Some(next) => {
                    warn!(
                        "Store {} has a damaged gzip member at byte {} ({}); resuming at byte {}",
                        self.path.display(),
                        start,
                        damage,
                        next
                    );
                    src.seek(SeekFrom::Start(next))
                        .map_err(|e| LibragError::io(e, context()))?;
                }
                None => {
                    warn!(
                        "Store {} ends in a damaged gzip member at byte {} ({}); ignoring the tail",
                        self.path.display(),
                        start,
                        damage
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Read every record, duplicates included, in file order
    pub fn read_all(&self) -> Result<ReadResult> {
        let _guard = self.lock.lock();
        if !self.path.exists() {
            return Ok(ReadResult::default());
        }
        let mut records = Vec::new();
        let (lines, skipped) = self.for_each_record(|r| {
            records.push(r);
            Ok(())
        })?;
        Ok(ReadResult {
            records,
            lines,
            skipped,
        })
    }

    /// Stream the store into `index` in batches of `batch_size`
    ///
    /// Later lines replace earlier ones with the same id, so the index ends
    /// up with the latest record per id. Records the index rejects (empty or
    /// mismatched vectors) are counted as skipped.
    pub fn load_into_index(
        &self,
        index: &VectorIndex,
        batch_size: usize,
        log_every: usize,
    ) -> Result<LoadReport> {
        let _guard = self.lock.lock();
        let path = self.path.display().to_string();
        if !self.path.exists() {
            info!("No index store found at {} (nothing to load)", path);
            return Ok(LoadReport {
                path,
                records: 0,
                skipped: 0,
                seconds: 0.0,
            });
        }

        let start = Instant::now();
        let batch_size = batch_size.max(1);
        let mut buffer: Vec<Record> = Vec::with_capacity(batch_size);
        let mut loaded = 0usize;
        let mut rejected = 0usize;

        info!("Loading index from {}", path);
        let (_, skipped) = self.for_each_record(|record| {
            buffer.push(record);
            if buffer.len() >= batch_size {
                let (ok, bad) = flush_batch(index, std::mem::take(&mut buffer), log_every);
                loaded += ok;
                rejected += bad;
            }
            Ok(())
        })?;
        if !buffer.is_empty() {
            let (ok, bad) = flush_batch(index, buffer, log_every);
            loaded += ok;
            rejected += bad;
        }

        let seconds = start.elapsed().as_secs_f64();
        info!(
            "Load complete: {} records loaded into index in {:.2}s",
            loaded, seconds
        );
        Ok(LoadReport {
            path,
            records: loaded,
            skipped: skipped + rejected,
            seconds,
        })
    }

    /// Rewrite the store keeping the latest record per id for live sources only
    ///
    /// The lock is held from the first read to the final rename, so records
    /// appended concurrently are either fully included or wait until the
    /// rewrite is done. Returns `None` when there is no store file.
    pub fn compact(&self, live_sources: &HashSet<String>) -> Result<Option<CompactReport>> {
        let _guard = self.lock.lock();
        let bytes_before = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Compaction: no store at {} (skipped)", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(LibragError::io(
                    e,
                    format!("Failed to stat store file: {}", self.path.display()),
                ))
            }
        };

        let start = Instant::now();
        let mut raw = Vec::new();
        let (lines_in, _) = self.for_each_record(|r| {
            raw.push(r);
            Ok(())
        })?;

        let compacted = compact_records(raw, live_sources);
        self.rewrite_locked(&compacted)?;

        let sources: BTreeSet<&str> = compacted.iter().map(|r| r.source.as_str()).collect();
        let bytes_after = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let report = CompactReport {
            lines_in,
            records_out: compacted.len(),
            sources: sources.len(),
            bytes_before,
            bytes_after,
            seconds: start.elapsed().as_secs_f64(),
        };
        info!(
            "Compaction complete: {} -> {} lines ({} sources), in {:.2}s",
            report.lines_in, report.records_out, report.sources, report.seconds
        );
        Ok(Some(report))
    }
}

#[derive(Default)]
struct LineTally {
    lines: usize,
    skipped: usize,
}

/// Feed every line of `reader` to `visit`
///
/// A read error stops the loop and is handed back; the caller decides
/// whether the rest of the store is recoverable.
fn read_lines<R, F>(mut reader: R, tally: &mut LineTally, visit: &mut F) -> Result<Option<std::io::Error>>
where
    R: BufRead,
    F: FnMut(Record) -> Result<()>,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Ok(Some(e)),
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tally.lines += 1;

        match serde_json::from_str::<StoreLine>(line) {
            Ok(parsed) => match parsed.into_record() {
                Some(record) => visit(record)?,
                None => {
                    tally.skipped += 1;
                    debug!("Store line {} has no source; skipped", tally.lines);
                }
            },
            Err(e) => {
                tally.skipped += 1;
                warn!("Malformed store line {} skipped: {}", tally.lines, e);
            }
        }
    }
}

/// Offset of the first gzip member header at or after `from`
fn find_member_header<R: Read + Seek>(src: &mut R, from: u64) -> std::io::Result<Option<u64>> {
    src.seek(SeekFrom::Start(from))?;
    let mut window: Vec<u8> = Vec::new();
    let mut window_start = from;
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = src.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        window.extend_from_slice(&chunk[..n]);
        if let Some(pos) = window
            .windows(GZ_MEMBER_HEADER.len())
            .position(|w| w == GZ_MEMBER_HEADER)
        {
            return Ok(Some(window_start + pos as u64));
        }
        // keep a header-sized overlap for matches spanning two chunks
        let drop = window.len().saturating_sub(GZ_MEMBER_HEADER.len() - 1);
        window.drain(..drop);
        window_start += drop as u64;
    }
}

fn write_lines<W: Write>(w: &mut W, records: &[Record], label: &str) -> std::io::Result<()> {
    let start = Instant::now();
    let total = records.len();
    let log_every = pick_log_every(total);

    for (i, record) in records.iter().enumerate() {
        serde_json::to_writer(&mut *w, record)?;
        w.write_all(b"\n")?;

        let done = i + 1;
        if done % log_every == 0 || done == total {
            let secs = start.elapsed().as_secs_f64();
            info!(
                "{} progress {}/{} ({:.1}%), elapsed {:.2}s, rate {:.1} rec/s",
                label,
                done,
                total,
                100.0 * done as f64 / total.max(1) as f64,
                secs,
                done as f64 / secs.max(1e-6)
            );
        }
    }
    Ok(())
}

/// Upsert a batch, falling back to one-by-one when the batch is rejected
fn flush_batch(index: &VectorIndex, batch: Vec<Record>, log_every: usize) -> (usize, usize) {
    let n = batch.len();
    match index.upsert_all(batch.clone(), log_every) {
        Ok(_) => (n, 0),
        Err(e) => {
            warn!("Batch of {} records rejected ({}); retrying individually", n, e);
            let mut ok = 0;
            let mut bad = 0;
            for record in batch {
                let id = record.id.clone();
                match index.upsert(record) {
                    Ok(()) => ok += 1,
                    Err(e) => {
                        bad += 1;
                        warn!("Skipping stored record '{}': {}", id, e);
                    }
                }
            }
            (ok, bad)
        }
    }
}
