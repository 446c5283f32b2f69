use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trellis_types::ObjectId;

use crate::alloc::IdAllocator;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BatchOp, Slot, SlotStore, WriteBatch};

/// File signature written at offset 0.
const MAGIC: &[u8; 8] = b"TRELLIS1";

/// Record header size: 4 bytes length + 4 bytes CRC.
const RECORD_HEADER: u64 = 8;

/// Per-op header size: 1 byte tag + 8 bytes id + 4 bytes data length.
const OP_HEADER: usize = 13;

const OP_WRITE: u8 = 1;
const OP_FREE: u8 = 2;
const OP_HEADER_BYTES: u8 = 3;

/// Flush/sync strategy for the store file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every batch (safest, highest latency).
    EveryWrite,
    /// Flush to the OS page cache only.
    #[default]
    OsDefault,
}

/// Configuration for a [`FileSlotStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStoreConfig {
    /// Sync strategy applied after each batch.
    pub sync_mode: SyncMode,
    /// Open without write access; `apply` fails with `ReadOnly`.
    pub read_only: bool,
}

/// Sizes before and after a [`FileSlotStore::compact`] run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactReport {
    /// File length before compaction.
    pub bytes_before: u64,
    /// File length after compaction.
    pub bytes_after: u64,
    /// Live slots carried over.
    pub live_slots: usize,
}

impl CompactReport {
    /// Bytes reclaimed by compaction.
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Mutable state behind the store mutex.
struct FileState {
    file: File,
    /// Length of the valid prefix of the file; new records go here.
    len: u64,
    slots: BTreeMap<ObjectId, Slot>,
    header: Option<Slot>,
    alloc: IdAllocator,
}

/// Append-only, single-file slot store.
///
/// Every [`WriteBatch`] becomes one record:
///
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload = ops, each [tag u8][id u64 LE][len u32 LE][data]]
/// ```
///
/// On open the file is replayed front-to-back to rebuild the id -> slot map.
/// A torn tail record (short, or CRC-mismatched at the very end of the
/// file) is the signature of a crash mid-batch: replay stops there and the
/// tail is truncated, so the batch is absent as a whole. A CRC mismatch
/// anywhere else is corruption and refuses the open.
pub struct FileSlotStore {
    path: PathBuf,
    config: FileStoreConfig,
    inner: Mutex<FileState>,
}

/// One decoded op with the payload-relative position of its data.
struct DecodedOp {
    tag: u8,
    id: ObjectId,
    data_pos: usize,
    data_len: u32,
}

/// Result of replaying a store file.
struct Replay {
    slots: BTreeMap<ObjectId, Slot>,
    header: Option<Slot>,
    valid_end: u64,
    high_water: u64,
}

impl FileSlotStore {
    /// Open (or create) a store file at the given path.
    pub fn open(path: &Path, config: FileStoreConfig) -> StoreResult<Self> {
        if !config.read_only {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(!config.read_only)
            .create(!config.read_only)
            .truncate(false)
            .open(path)?;

        let mut file_len = file.metadata()?.len();
        if file_len == 0 && !config.read_only {
            file.write_all(MAGIC)?;
            file.sync_all()?;
            file_len = MAGIC.len() as u64;
        }

        let mut magic = [0u8; 8];
        file.seek(SeekFrom::Start(0))?;
        if file_len < MAGIC.len() as u64 || file.read_exact(&mut magic).is_err() || &magic != MAGIC
        {
            return Err(StoreError::BadMagic(path.to_path_buf()));
        }

        let replay = replay(&mut file, file_len)?;
        if replay.valid_end < file_len {
            warn!(
                valid_end = replay.valid_end,
                file_len,
                "discarding torn tail record"
            );
            if !config.read_only {
                file.set_len(replay.valid_end)?;
                file.sync_all()?;
            }
        }

        let alloc = IdAllocator::from_live(replay.slots.keys(), replay.high_water);
        info!(
            path = %path.display(),
            slots = replay.slots.len(),
            bytes = replay.valid_end,
            "slot store opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            config,
            inner: Mutex::new(FileState {
                file,
                len: replay.valid_end,
                slots: replay.slots,
                header: replay.header,
                alloc,
            }),
        })
    }

    /// Path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the valid part of the store file.
    pub fn file_len(&self) -> u64 {
        self.inner.lock().len
    }

    /// Rewrite the file keeping only live slots and the current header.
    ///
    /// Slots move; ids do not. The rewrite goes to a sibling file that is
    /// renamed over the original, so a crash leaves either the old or the
    /// new file intact.
    pub fn compact(&self) -> StoreResult<CompactReport> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }

        let mut state = self.inner.lock();
        let bytes_before = state.len;

        let mut live = Vec::with_capacity(state.slots.len());
        let slots: Vec<(ObjectId, Slot)> = state.slots.iter().map(|(k, v)| (*k, *v)).collect();
        for (id, slot) in slots {
            live.push((id, read_slot(&mut state, id, slot)?));
        }
        let header = match state.header {
            Some(slot) => Some(read_slot(&mut state, ObjectId::null(), slot)?),
            None => None,
        };

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(MAGIC)?;
            if let Some(bytes) = header {
                let mut batch = WriteBatch::new();
                batch.header(bytes);
                write_record(&mut tmp, &encode_ops(batch.ops())?)?;
            }
            for (id, bytes) in live {
                let mut batch = WriteBatch::new();
                batch.write(id, bytes);
                write_record(&mut tmp, &encode_ops(batch.ops())?)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let file_len = file.metadata()?.len();
        let replay = replay(&mut file, file_len)?;

        state.file = file;
        state.len = replay.valid_end;
        state.slots = replay.slots;
        state.header = replay.header;

        let report = CompactReport {
            bytes_before,
            bytes_after: state.len,
            live_slots: state.slots.len(),
        };
        info!(
            before = report.bytes_before,
            after = report.bytes_after,
            live = report.live_slots,
            "slot store compacted"
        );
        Ok(report)
    }
}

impl SlotStore for FileSlotStore {
    fn read(&self, id: ObjectId) -> StoreResult<Option<Vec<u8>>> {
        let mut state = self.inner.lock();
        match state.slots.get(&id).copied() {
            Some(slot) => read_slot(&mut state, id, slot).map(Some),
            None => Ok(None),
        }
    }

    fn alloc(&self) -> StoreResult<ObjectId> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(self.inner.lock().alloc.alloc())
    }

    fn slot(&self, id: ObjectId) -> StoreResult<Option<Slot>> {
        Ok(self.inner.lock().slots.get(&id).copied())
    }

    fn read_header(&self) -> StoreResult<Option<Vec<u8>>> {
        let mut state = self.inner.lock();
        match state.header {
            Some(slot) => read_slot(&mut state, ObjectId::null(), slot).map(Some),
            None => Ok(None),
        }
    }

    fn apply(&self, batch: &WriteBatch) -> StoreResult<()> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        if batch.is_empty() {
            return Ok(());
        }
        let payload = encode_ops(batch.ops())?;

        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let record_offset = state.len;
        state.file.seek(SeekFrom::Start(record_offset))?;
        if let Err(e) = write_record(&mut state.file, &payload) {
            // Drop whatever part of the record reached the file.
            if let Err(trunc) = state.file.set_len(record_offset) {
                warn!(error = %trunc, "failed to truncate partial record");
            }
            return Err(e);
        }
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            state.file.sync_all()?;
        }

        let base = record_offset + RECORD_HEADER;
        for op in decode_ops(&payload, base)? {
            let was_live = state.slots.contains_key(&op.id);
            apply_decoded(&mut state.slots, &mut state.header, &op, base);
            match op.tag {
                OP_WRITE => state.alloc.mark_live(op.id),
                OP_FREE if was_live => state.alloc.release(op.id),
                _ => {}
            }
        }
        state.len = base + payload.len() as u64;

        debug!(
            offset = record_offset,
            ops = batch.len(),
            bytes = payload.len(),
            "batch applied"
        );
        Ok(())
    }

    fn ids(&self) -> StoreResult<Vec<ObjectId>> {
        Ok(self.inner.lock().slots.keys().copied().collect())
    }

    fn release(&self, id: ObjectId) -> StoreResult<()> {
        let mut state = self.inner.lock();
        if !state.slots.contains_key(&id) {
            state.alloc.release(id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileSlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSlotStore")
            .field("path", &self.path)
            .field("read_only", &self.config.read_only)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Record framing
// ---------------------------------------------------------------------------

fn encode_ops(ops: &[BatchOp]) -> StoreResult<Vec<u8>> {
    let mut out = Vec::with_capacity(ops.len() * OP_HEADER);
    for op in ops {
        let (tag, id, data): (u8, ObjectId, &[u8]) = match op {
            BatchOp::Write { id, bytes } => {
                if id.is_null() {
                    return Err(StoreError::NullObjectId);
                }
                (OP_WRITE, *id, bytes.as_slice())
            }
            BatchOp::Free { id } => {
                if id.is_null() {
                    return Err(StoreError::NullObjectId);
                }
                (OP_FREE, *id, &[][..])
            }
            BatchOp::Header { bytes } => (OP_HEADER_BYTES, ObjectId::null(), bytes.as_slice()),
        };
        let len = u32::try_from(data.len()).map_err(|_| StoreError::Corrupt {
            offset: 0,
            reason: format!("slot of {} bytes exceeds the u32 limit", data.len()),
        })?;
        out.push(tag);
        out.extend_from_slice(&id.get().to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(data);
    }
    Ok(out)
}

fn decode_ops(payload: &[u8], base: u64) -> StoreResult<Vec<DecodedOp>> {
    let corrupt = |pos: usize, reason: &str| StoreError::Corrupt {
        offset: base + pos as u64,
        reason: reason.to_string(),
    };

    let mut ops = Vec::new();
    let mut pos = 0usize;
    while pos < payload.len() {
        if pos + OP_HEADER > payload.len() {
            return Err(corrupt(pos, "truncated op header"));
        }
        let tag = payload[pos];
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&payload[pos + 1..pos + 9]);
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&payload[pos + 9..pos + 13]);
        let data_len = u32::from_le_bytes(len_bytes);
        let data_pos = pos + OP_HEADER;
        if data_pos + data_len as usize > payload.len() {
            return Err(corrupt(pos, "op data overruns record"));
        }
        if !matches!(tag, OP_WRITE | OP_FREE | OP_HEADER_BYTES) {
            return Err(corrupt(pos, "unknown op tag"));
        }
        ops.push(DecodedOp {
            tag,
            id: ObjectId::new(u64::from_le_bytes(id_bytes)),
            data_pos,
            data_len,
        });
        pos = data_pos + data_len as usize;
    }
    Ok(ops)
}

fn apply_decoded(
    slots: &mut BTreeMap<ObjectId, Slot>,
    header: &mut Option<Slot>,
    op: &DecodedOp,
    base: u64,
) {
    let slot = Slot::new(base + op.data_pos as u64, op.data_len);
    match op.tag {
        OP_WRITE => {
            slots.insert(op.id, slot);
        }
        OP_FREE => {
            slots.remove(&op.id);
        }
        _ => *header = Some(slot),
    }
}

fn write_record(file: &mut File, payload: &[u8]) -> StoreResult<()> {
    let length = u32::try_from(payload.len()).map_err(|_| StoreError::Corrupt {
        offset: 0,
        reason: "batch exceeds the u32 record limit".into(),
    })?;
    let crc = crc32fast::hash(payload);

    let mut record = Vec::with_capacity(RECORD_HEADER as usize + payload.len());
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(payload);
    file.write_all(&record)?;
    file.flush()?;
    Ok(())
}

fn read_slot(state: &mut FileState, id: ObjectId, slot: Slot) -> StoreResult<Vec<u8>> {
    if slot.end() > state.len {
        return Err(StoreError::SlotOutOfBounds { id });
    }
    let mut buf = vec![0u8; slot.length as usize];
    state.file.seek(SeekFrom::Start(slot.offset))?;
    state.file.read_exact(&mut buf)?;
    Ok(buf)
}

fn replay(file: &mut File, file_len: u64) -> StoreResult<Replay> {
    let mut slots = BTreeMap::new();
    let mut header = None;
    let mut high_water = 0u64;
    let mut offset = MAGIC.len() as u64;

    while offset + RECORD_HEADER <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        let mut header_buf = [0u8; RECORD_HEADER as usize];
        file.read_exact(&mut header_buf)?;

        let length =
            u32::from_le_bytes([header_buf[0], header_buf[1], header_buf[2], header_buf[3]]);
        let expected_crc =
            u32::from_le_bytes([header_buf[4], header_buf[5], header_buf[6], header_buf[7]]);
        let end = offset + RECORD_HEADER + u64::from(length);

        if length == 0 || end > file_len {
            warn!(offset, length, file_len, "truncated record; stopping replay");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)?;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            if end == file_len {
                warn!(offset, "CRC mismatch on tail record; stopping replay");
                break;
            }
            return Err(StoreError::CrcMismatch {
                offset,
                expected: expected_crc,
                actual: actual_crc,
            });
        }

        let base = offset + RECORD_HEADER;
        for op in decode_ops(&payload, base)? {
            high_water = high_water.max(op.id.get());
            apply_decoded(&mut slots, &mut header, &op, base);
        }
        offset = end;
    }

    Ok(Replay {
        slots,
        header,
        valid_end: offset,
        high_water,
    })
}
