//! On-disk layout of an object transaction log (FileStorage).
//!
//! All integers are big-endian.
//!
//! File: magic `FS21` or `FS30` (4 bytes), then transaction records.
//!
//! Transaction record:
//! tid (8) + tlen (8) + status (1) + ulen (2) + dlen (2) + elen (2)
//! + user (ulen) + description (dlen) + extension (elen)
//! + data records, up to `pos + tlen`
//! + redundant tlen (8). The next transaction starts at `pos + tlen + 8`.
//!
//! Data record:
//! oid (8) + tid (8) + prev (8) + tloc (8) + vlen (2) + plen (8)
//! + state (plen), or when `plen == 0` a backpointer (8).

use bytes::Buf;

use crate::core::{Oid, Tid, TransactionStatus};

/// Accepted file signatures.
pub const MAGIC: [&[u8; 4]; 2] = [b"FS21", b"FS30"];

/// Magic length.
pub const MAGIC_LEN: u64 = 4;

/// Fixed part of a transaction header.
pub const TRANS_HDR_LEN: usize = 23;

/// Fixed part of a data record header.
pub const DATA_HDR_LEN: usize = 42;

/// Length of the trailing redundant transaction length.
pub const TRAILER_LEN: usize = 8;

/// Status byte of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusByte {
    Status(TransactionStatus),
    /// `'c'`: checkpoint written by an interrupted commit or pack. Not committed.
    Checkpoint,
}

impl StatusByte {
    pub fn parse(byte: u8) -> Option<Self> {
        match byte {
            b' ' => Some(StatusByte::Status(TransactionStatus::Committed)),
            b'p' => Some(StatusByte::Status(TransactionStatus::Packed)),
            b'u' => Some(StatusByte::Status(TransactionStatus::Undone)),
            b'c' => Some(StatusByte::Checkpoint),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            StatusByte::Status(TransactionStatus::Committed) => b' ',
            StatusByte::Status(TransactionStatus::Packed) => b'p',
            StatusByte::Status(TransactionStatus::Undone) => b'u',
            StatusByte::Checkpoint => b'c',
        }
    }
}

/// Fixed transaction header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnHeader {
    pub tid: Tid,
    pub tlen: u64,
    pub status: u8,
    pub ulen: u16,
    pub dlen: u16,
    pub elen: u16,
}

impl TxnHeader {
    /// Parse from exactly [`TRANS_HDR_LEN`] bytes.
    pub fn parse(mut buf: &[u8]) -> Self {
        let tid = Tid(buf.get_u64());
        let tlen = buf.get_u64();
        let status = buf.get_u8();
        let ulen = buf.get_u16();
        let dlen = buf.get_u16();
        let elen = buf.get_u16();
        Self {
            tid,
            tlen,
            status,
            ulen,
            dlen,
            elen,
        }
    }

    /// Header length including user, description and extension.
    pub fn full_len(&self) -> u64 {
        TRANS_HDR_LEN as u64 + u64::from(self.ulen) + u64::from(self.dlen) + u64::from(self.elen)
    }

    #[cfg(test)]
    pub fn encode(&self, out: &mut bytes::BytesMut) {
        use bytes::BufMut;
        out.put_u64(self.tid.0);
        out.put_u64(self.tlen);
        out.put_u8(self.status);
        out.put_u16(self.ulen);
        out.put_u16(self.dlen);
        out.put_u16(self.elen);
    }
}

/// Fixed data record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub oid: Oid,
    pub tid: Tid,
    /// Offset of the previous revision of this object, 0 if none.
    pub prev: u64,
    /// Offset of the owning transaction.
    pub tloc: u64,
    /// Version string length; always 0 since versions were removed.
    pub vlen: u16,
    pub plen: u64,
}

impl DataHeader {
    /// Parse from exactly [`DATA_HDR_LEN`] bytes.
    pub fn parse(mut buf: &[u8]) -> Self {
        let oid = Oid(buf.get_u64());
        let tid = Tid(buf.get_u64());
        let prev = buf.get_u64();
        let tloc = buf.get_u64();
        let vlen = buf.get_u16();
        let plen = buf.get_u64();
        Self {
            oid,
            tid,
            prev,
            tloc,
            vlen,
            plen,
        }
    }

    /// Bytes following the header: the state, or an 8-byte backpointer.
    pub fn body_len(&self) -> u64 {
        if self.plen == 0 {
            8
        } else {
            self.plen
        }
    }

    #[cfg(test)]
    pub fn encode(&self, out: &mut bytes::BytesMut) {
        use bytes::BufMut;
        out.put_u64(self.oid.0);
        out.put_u64(self.tid.0);
        out.put_u64(self.prev);
        out.put_u64(self.tloc);
        out.put_u16(self.vlen);
        out.put_u64(self.plen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_txn_header_layout() {
        let header = TxnHeader {
            tid: Tid(0x0102_0304_0506_0708),
            tlen: 99,
            status: b' ',
            ulen: 1,
            dlen: 2,
            elen: 3,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), TRANS_HDR_LEN);
        assert_eq!(&buf[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(buf[16], b' ');
        assert_eq!(TxnHeader::parse(&buf), header);
        assert_eq!(header.full_len(), 29);
    }

    #[test]
    fn test_data_header_layout() {
        let header = DataHeader {
            oid: Oid(7),
            tid: Tid(8),
            prev: 0,
            tloc: 4,
            vlen: 0,
            plen: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), DATA_HDR_LEN);
        assert_eq!(DataHeader::parse(&buf), header);
        assert_eq!(header.body_len(), 8);
    }

    #[test]
    fn test_status_bytes() {
        assert_eq!(
            StatusByte::parse(b'p'),
            Some(StatusByte::Status(TransactionStatus::Packed))
        );
        assert_eq!(StatusByte::parse(b'c'), Some(StatusByte::Checkpoint));
        assert_eq!(StatusByte::parse(b'x'), None);
        assert_eq!(StatusByte::Checkpoint.to_byte(), b'c');
    }
}
