//! Transaction records drained from an object transaction log.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};

/// 8-byte transaction identifier.
///
/// The upper 32 bits encode the commit minute since 1900-01-01 and the lower
/// 32 bits the fraction of that minute, so numeric order is commit order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tid(pub u64);

impl Tid {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Tid(u64::from_be_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Value stored in `BIGINT` columns.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        Tid(value as u64)
    }

    /// Build a TID from a wall-clock time (UTC).
    ///
    /// Returns `None` for dates before 1900 or invalid field values.
    pub fn from_datetime(at: NaiveDateTime) -> Option<Self> {
        use chrono::{Datelike, Timelike};

        let year = u64::try_from(at.year()).ok()?.checked_sub(1900)?;
        let minutes = ((((year * 12 + u64::from(at.month0())) * 31 + u64::from(at.day0())) * 24
            + u64::from(at.hour()))
            * 60)
            + u64::from(at.minute());
        let high = u32::try_from(minutes).ok()?;

        let seconds = f64::from(at.second()) + f64::from(at.nanosecond()) / 1e9;
        let low = (seconds / 60.0 * 4_294_967_296.0) as u64;
        Some(Tid((u64::from(high) << 32) | low.min(u64::from(u32::MAX))))
    }

    /// Commit time encoded in the TID (UTC).
    pub fn timestamp(self) -> Option<NaiveDateTime> {
        let mut v = self.0 >> 32;
        let minute = (v % 60) as u32;
        v /= 60;
        let hour = (v % 24) as u32;
        v /= 24;
        let day = (v % 31) as u32 + 1;
        v /= 31;
        let month = (v % 12) as u32 + 1;
        v /= 12;
        let year = i32::try_from(v).ok()? + 1900;

        let fraction = (self.0 & 0xFFFF_FFFF) as f64 * 60.0 / 4_294_967_296.0;
        let secs = fraction.trunc() as u32;
        let nanos = ((fraction - fraction.trunc()) * 1e9) as u32;

        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_nano_opt(hour, minute, secs, nanos)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({:#018x})", self.0)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for Tid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// 8-byte object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(pub u64);

impl Oid {
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Transaction status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    /// `' '`: normal committed transaction.
    Committed,
    /// `'p'`: committed, then packed.
    Packed,
    /// `'u'`: committed, later undone.
    Undone,
}

impl TransactionStatus {
    pub fn is_packed(self) -> bool {
        matches!(self, TransactionStatus::Packed)
    }
}

/// New state of one object inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDelta {
    pub oid: Oid,

    /// TID of the previous revision of this object (zero for a new object).
    pub prev_tid: Tid,

    /// Pickled state. `None` when the revision records an undone creation.
    pub state: Option<Vec<u8>>,
}

impl ObjectDelta {
    pub fn state_size(&self) -> i64 {
        self.state.as_ref().map_or(0, |s| s.len() as i64)
    }
}

/// One committed transaction, in log order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub tid: Tid,
    pub status: TransactionStatus,
    pub user: Vec<u8>,
    pub description: Vec<u8>,
    pub extension: Vec<u8>,
    pub deltas: Vec<ObjectDelta>,

    /// Byte offset of the transaction header in the log.
    pub offset: u64,
}

impl TransactionRecord {
    /// Commit time derived from the TID.
    pub fn committed_at(&self) -> Option<NaiveDateTime> {
        self.tid.timestamp()
    }
}
