//! Read-only access to an object transaction log.
//!
//! [`LogReader`] walks the log forward one transaction at a time, resolving
//! backpointers and previous-revision TIDs, and validates the structure as
//! it goes. Any inconsistency is a [`MigrateError::LogFormat`] carrying the
//! byte offset where it was found.

pub mod format;

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::core::{ObjectDelta, Tid, TransactionRecord};
use crate::error::{MigrateError, Result};

use format::{DataHeader, StatusByte, TxnHeader, DATA_HDR_LEN, MAGIC, MAGIC_LEN, TRANS_HDR_LEN};

/// Longest backpointer chain followed before the log is declared corrupt.
const MAX_BACKPOINTER_HOPS: usize = 64;

/// Forward iterator over the committed transactions of a log file.
pub struct LogReader {
    path: PathBuf,
    file: File,
    len: u64,
    pos: u64,
    last_tid: Option<Tid>,
    done: bool,
}

impl LogReader {
    /// Open `path` read-only and check its signature.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();

        let display = path.display().to_string();
        if len < MAGIC_LEN {
            return Err(MigrateError::log_format(
                display,
                0,
                "file too short for a transaction log",
            ));
        }
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if !MAGIC.iter().any(|m| **m == magic) {
            return Err(MigrateError::log_format(
                display,
                0,
                format!("unrecognized file signature {:?}", String::from_utf8_lossy(&magic)),
            ));
        }

        Ok(Self {
            path,
            file,
            len,
            pos: MAGIC_LEN,
            last_tid: None,
            done: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= MAGIC_LEN
    }

    /// Offset of the next transaction to be read.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Move the cursor back to the first transaction.
    pub fn rewind(&mut self) {
        self.pos = MAGIC_LEN;
        self.last_tid = None;
        self.done = false;
    }

    /// Count transactions with a full pass, then rewind.
    pub fn count_transactions(&mut self) -> Result<u64> {
        self.rewind();
        let mut count = 0u64;
        let outcome = loop {
            match self.next_transaction() {
                Ok(Some(_)) => count += 1,
                Ok(None) => break Ok(count),
                Err(e) => break Err(e),
            }
        };
        self.rewind();
        outcome
    }

    /// Next committed transaction, or `None` at the end of the log.
    ///
    /// After an error the reader stays exhausted until [`rewind`](Self::rewind).
    pub fn next_transaction(&mut self) -> Result<Option<TransactionRecord>> {
        if self.done {
            return Ok(None);
        }
        let result = self.read_transaction();
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn corrupt(&self, offset: u64, message: impl Into<String>) -> MigrateError {
        MigrateError::log_format(self.path.display().to_string(), offset, message)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                self.corrupt(pos, "unexpected end of file")
            } else {
                MigrateError::Io(e)
            }
        })
    }

    fn read_transaction(&mut self) -> Result<Option<TransactionRecord>> {
        let pos = self.pos;
        if pos >= self.len {
            return Ok(None);
        }
        if self.len - pos < TRANS_HDR_LEN as u64 {
            return Err(self.corrupt(pos, "truncated transaction header"));
        }

        let mut raw = [0u8; TRANS_HDR_LEN];
        self.read_at(pos, &mut raw)?;
        let header = TxnHeader::parse(&raw);

        let status = match StatusByte::parse(header.status) {
            Some(StatusByte::Status(status)) => status,
            Some(StatusByte::Checkpoint) => {
                debug!(
                    "{}: checkpoint transaction at offset {}, stopping",
                    self.path.display(),
                    pos
                );
                return Ok(None);
            }
            None => {
                return Err(self.corrupt(
                    pos,
                    format!("invalid transaction status byte {:#04x}", header.status),
                ))
            }
        };

        if header.tlen < header.full_len() {
            return Err(self.corrupt(
                pos,
                format!("transaction length {} is shorter than its header", header.tlen),
            ));
        }
        let fits = pos
            .checked_add(header.tlen)
            .and_then(|end| end.checked_add(8))
            .is_some_and(|end| end <= self.len);
        if !fits {
            return Err(self.corrupt(pos, "transaction extends past end of file"));
        }
        if let Some(last) = self.last_tid {
            if header.tid <= last {
                return Err(self.corrupt(
                    pos,
                    format!(
                        "transaction id {} does not increase (previous {})",
                        header.tid, last
                    ),
                ));
            }
        }

        // Everything after the fixed header, trailer included.
        let body_len = usize::try_from(header.tlen + 8 - TRANS_HDR_LEN as u64)
            .map_err(|_| self.corrupt(pos, "transaction too large for this platform"))?;
        let mut body = vec![0u8; body_len];
        self.read_at(pos + TRANS_HDR_LEN as u64, &mut body)?;

        let mut trailer = [0u8; 8];
        trailer.copy_from_slice(&body[body_len - 8..]);
        if u64::from_be_bytes(trailer) != header.tlen {
            return Err(self.corrupt(
                pos + header.tlen,
                "redundant transaction length does not match header",
            ));
        }

        let (user, rest) = body.split_at(usize::from(header.ulen));
        let (description, rest) = rest.split_at(usize::from(header.dlen));
        let (extension, _) = rest.split_at(usize::from(header.elen));
        let (user, description, extension) = (user.to_vec(), description.to_vec(), extension.to_vec());

        let mut deltas = Vec::new();
        let mut offset = header.full_len();
        while offset < header.tlen {
            let dpos = pos + offset;
            if header.tlen - offset < DATA_HDR_LEN as u64 {
                return Err(self.corrupt(dpos, "truncated data record header"));
            }
            let rel = (offset - TRANS_HDR_LEN as u64) as usize;
            let data = DataHeader::parse(&body[rel..rel + DATA_HDR_LEN]);

            if data.tid != header.tid {
                return Err(self.corrupt(
                    dpos,
                    format!(
                        "data record tid {} does not match transaction {}",
                        data.tid, header.tid
                    ),
                ));
            }
            if data.tloc != pos {
                return Err(self.corrupt(
                    dpos,
                    format!(
                        "data record points at transaction offset {} instead of {}",
                        data.tloc, pos
                    ),
                ));
            }
            if data.vlen != 0 {
                return Err(self.corrupt(dpos, "versioned data records are not supported"));
            }
            let record_end = offset
                .checked_add(DATA_HDR_LEN as u64 + data.body_len())
                .filter(|end| *end <= header.tlen)
                .ok_or_else(|| self.corrupt(dpos, "data record extends past its transaction"))?;

            let payload_start = rel + DATA_HDR_LEN;
            let payload_end = (record_end - TRANS_HDR_LEN as u64) as usize;
            let payload = &body[payload_start..payload_end];

            let state = if data.plen > 0 {
                Some(payload.to_vec())
            } else {
                let mut pointer = [0u8; 8];
                pointer.copy_from_slice(payload);
                match u64::from_be_bytes(pointer) {
                    0 => None,
                    back => self.resolve_backpointer(back, dpos)?,
                }
            };
            let prev_tid = if data.prev == 0 {
                Tid(0)
            } else {
                self.tid_at(data.prev, dpos)?
            };

            deltas.push(ObjectDelta {
                oid: data.oid,
                prev_tid,
                state,
            });
            offset = record_end;
        }

        self.pos = pos + header.tlen + 8;
        self.last_tid = Some(header.tid);

        Ok(Some(TransactionRecord {
            tid: header.tid,
            status,
            user,
            description,
            extension,
            deltas,
            offset: pos,
        }))
    }

    /// Follow a backpointer chain to the state it reuses.
    fn resolve_backpointer(&mut self, mut back: u64, referrer: u64) -> Result<Option<Vec<u8>>> {
        for _ in 0..MAX_BACKPOINTER_HOPS {
            self.check_record_offset(back, referrer)?;
            let mut raw = [0u8; DATA_HDR_LEN];
            self.read_at(back, &mut raw)?;
            let header = DataHeader::parse(&raw);
            let body_at = back + DATA_HDR_LEN as u64;

            if header.plen > 0 {
                if body_at.saturating_add(header.plen) > self.len {
                    return Err(self.corrupt(back, "data record extends past end of file"));
                }
                let len = usize::try_from(header.plen)
                    .map_err(|_| self.corrupt(back, "object state too large for this platform"))?;
                let mut state = vec![0u8; len];
                self.read_at(body_at, &mut state)?;
                return Ok(Some(state));
            }

            let mut pointer = [0u8; 8];
            self.read_at(body_at, &mut pointer)?;
            match u64::from_be_bytes(pointer) {
                0 => return Ok(None),
                next => back = next,
            }
        }
        Err(self.corrupt(referrer, "backpointer chain too long"))
    }

    /// TID of the data record at `offset`.
    fn tid_at(&mut self, offset: u64, referrer: u64) -> Result<Tid> {
        self.check_record_offset(offset, referrer)?;
        let mut raw = [0u8; 16];
        self.read_at(offset, &mut raw)?;
        let mut tid = [0u8; 8];
        tid.copy_from_slice(&raw[8..]);
        Ok(Tid::from_bytes(tid))
    }

    fn check_record_offset(&self, offset: u64, referrer: u64) -> Result<()> {
        if offset < MAGIC_LEN || offset.saturating_add(DATA_HDR_LEN as u64) > self.len {
            return Err(self.corrupt(
                referrer,
                format!("record reference {} is outside the file", offset),
            ));
        }
        Ok(())
    }
}

impl Iterator for LogReader {
    type Item = Result<TransactionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_transaction().transpose()
    }
}

/// What a full structural scan found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub transactions: u64,
    /// Object revisions across all transactions.
    pub objects: u64,
    /// Bytes of object state, backpointers resolved.
    pub state_bytes: u64,
    pub file_size: u64,
    pub first_tid: Option<Tid>,
    pub last_tid: Option<Tid>,
}

/// Scan a whole log, logging a running count every `log_every` transactions.
pub fn scan(path: &Path, log_every: u64) -> Result<LogSummary> {
    let mut reader = LogReader::open(path)?;
    let mut summary = LogSummary {
        file_size: reader.len(),
        ..Default::default()
    };

    while let Some(txn) = reader.next_transaction()? {
        summary.transactions += 1;
        summary.objects += txn.deltas.len() as u64;
        summary.state_bytes += txn.deltas.iter().map(|d| d.state_size() as u64).sum::<u64>();
        summary.first_tid.get_or_insert(txn.tid);
        summary.last_tid = Some(txn.tid);
        if log_every > 0 && summary.transactions % log_every == 0 {
            info!(
                "{}: {} transactions verified",
                path.display(),
                summary.transactions
            );
        }
    }

    Ok(summary)
}
