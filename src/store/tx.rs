//! The on-disk transaction record (§3 `Tx`) and the value-offset packing
//! scheme (§3 "value offset ... packed into a 64-bit integer").

use crate::hash::{self, Digest32};
use crate::{err_at, Result};

/// Pack `(vlog_id, offset)` into the 64-bit value pointer stored in an index
/// entry: top 8 bits the value-log id (`< 128`), low 56 bits the offset.
pub fn pack_voff(vlog_id: u8, offset: u64) -> u64 {
    debug_assert!(vlog_id < 128);
    ((vlog_id as u64) << 56) | (offset & ((1u64 << 56) - 1))
}

pub fn unpack_voff(packed: u64) -> (u8, u64) {
    ((packed >> 56) as u8, packed & ((1u64 << 56) - 1))
}

/// One entry as recorded in a committed `Tx`: the key plus everything needed
/// to fetch and verify its value.
#[derive(Debug, Clone)]
pub struct TxEntry {
    pub key: Vec<u8>,
    pub v_len: u32,
    pub v_off: u64,
    pub v_hash: Digest32,
}

/// Derived and assigned fields of a committed transaction (§3), everything
/// but the entry list — what `DualProof` and recovery operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    pub id: u64,
    pub ts: i64,
    pub bl_tx_id: u64,
    pub bl_root: Digest32,
    pub prev_alh: Digest32,
    pub e_h: Digest32,
    pub inner_hash: Digest32,
    pub alh: Digest32,
}

impl TxHeader {
    pub fn compute(id: u64, ts: i64, bl_tx_id: u64, bl_root: Digest32, prev_alh: Digest32, e_h: Digest32) -> TxHeader {
        let mut buf = Vec::with_capacity(8 + 8 + 32 + 32);
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&bl_tx_id.to_be_bytes());
        buf.extend_from_slice(&bl_root);
        buf.extend_from_slice(&e_h);
        let inner_hash = hash::sum(&buf);

        let mut abuf = Vec::with_capacity(8 + 32 + 32);
        abuf.extend_from_slice(&id.to_be_bytes());
        abuf.extend_from_slice(&prev_alh);
        abuf.extend_from_slice(&inner_hash);
        let alh = hash::sum(&abuf);

        TxHeader { id, ts, bl_tx_id, bl_root, prev_alh, e_h, inner_hash, alh }
    }
}

/// A fully assembled, committed transaction record.
#[derive(Debug, Clone)]
pub struct Tx {
    pub header: TxHeader,
    pub entries: Vec<TxEntry>,
}

const HEADER_LEN: usize = 8 + 8 + 8 + 32 + 32 + 32 + 32 + 32 + 4;

impl Tx {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.entries.len() * 64);
        let h = &self.header;
        buf.extend_from_slice(&h.id.to_be_bytes());
        buf.extend_from_slice(&h.ts.to_be_bytes());
        buf.extend_from_slice(&h.bl_tx_id.to_be_bytes());
        buf.extend_from_slice(&h.bl_root);
        buf.extend_from_slice(&h.prev_alh);
        buf.extend_from_slice(&h.e_h);
        buf.extend_from_slice(&h.inner_hash);
        buf.extend_from_slice(&h.alh);
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for e in &self.entries {
            buf.extend_from_slice(&(e.key.len() as u32).to_be_bytes());
            buf.extend_from_slice(&e.key);
            buf.extend_from_slice(&e.v_len.to_be_bytes());
            buf.extend_from_slice(&e.v_off.to_be_bytes());
            buf.extend_from_slice(&e.v_hash);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Tx> {
        if buf.len() < HEADER_LEN {
            return err_at!(CorruptedTxData, msg: "tx record shorter than header");
        }
        let mut off = 0;
        macro_rules! take {
            ($n:expr) => {{
                let s = &buf[off..off + $n];
                off += $n;
                s
            }};
        }
        let id = u64::from_be_bytes(take!(8).try_into().unwrap());
        let ts = i64::from_be_bytes(take!(8).try_into().unwrap());
        let bl_tx_id = u64::from_be_bytes(take!(8).try_into().unwrap());
        let bl_root: Digest32 = take!(32).try_into().unwrap();
        let prev_alh: Digest32 = take!(32).try_into().unwrap();
        let e_h: Digest32 = take!(32).try_into().unwrap();
        let inner_hash: Digest32 = take!(32).try_into().unwrap();
        let alh: Digest32 = take!(32).try_into().unwrap();
        let n = u32::from_be_bytes(take!(4).try_into().unwrap()) as usize;

        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            if off + 4 > buf.len() {
                return err_at!(CorruptedTxData, msg: "truncated entry");
            }
            let klen = u32::from_be_bytes(take!(4).try_into().unwrap()) as usize;
            if off + klen + 4 + 8 + 32 > buf.len() {
                return err_at!(CorruptedTxData, msg: "truncated entry body");
            }
            let key = take!(klen).to_vec();
            let v_len = u32::from_be_bytes(take!(4).try_into().unwrap());
            let v_off = u64::from_be_bytes(take!(8).try_into().unwrap());
            let v_hash: Digest32 = take!(32).try_into().unwrap();
            entries.push(TxEntry { key, v_len, v_off, v_hash });
        }

        Ok(Tx {
            header: TxHeader { id, ts, bl_tx_id, bl_root, prev_alh, e_h, inner_hash, alh },
            entries,
        })
    }
}

#[cfg(test)]
mod tx_test {
    use super::*;

    #[test]
    fn test_voff_pack_roundtrip() {
        let (id, off) = (5u8, (1u64 << 50) + 7);
        let packed = pack_voff(id, off);
        assert_eq!(unpack_voff(packed), (id, off));
    }

    #[test]
    fn test_tx_encode_decode_roundtrip() {
        let header = TxHeader::compute(1, 1000, 0, hash::ZERO_DIGEST, hash::ZERO_DIGEST, hash::sum(b"eh"));
        let tx = Tx {
            header,
            entries: vec![TxEntry { key: b"k1".to_vec(), v_len: 3, v_off: pack_voff(0, 10), v_hash: hash::sum(b"val") }],
        };
        let buf = tx.encode();
        let back = Tx::decode(&buf).unwrap();
        assert_eq!(back.header, tx.header);
        assert_eq!(back.entries[0].key, tx.entries[0].key);
    }
}
