//! Dual proof (§4.D): binary-linking (via the AHT) plus linear-linking
//! (replaying `innerHash` values) so a verifier holding only `src` and `dst`
//! tx headers can recompute `dst.Alh` from `src.Alh` without trusting the
//! server.

use crate::ahtree::AHTree;
use crate::err_at;
use crate::hash::Digest32;
use crate::Result;

use super::tx::TxHeader;

#[derive(Debug, Clone)]
pub struct DualProof {
    /// `AHT.InclusionProof(src.id, dst.blTxId)`, present when `src.id < dst.blTxId`.
    pub inclusion_proof: Option<Vec<Digest32>>,
    /// `AHT.ConsistencyProof(src.blTxId, dst.blTxId)`, present when `src.blTxId > 0`.
    pub consistency_proof: Option<Vec<Digest32>>,
    /// Proof that leaf `dst.blTxId`'s Alh is included at `dst.blRoot` itself.
    pub last_inclusion_proof: Vec<Digest32>,
    /// `innerHash` for every tx in `max(src.id, dst.blTxId) + 1 ..= dst.id`,
    /// letting the verifier fold `src.Alh` forward one tx at a time.
    pub linear_proof: Vec<Digest32>,
}

/// Build the dual proof between `src` (`src.id <= dst.id`) and `dst`, reading
/// binary-linking proofs from `aht` and inner hashes via `read_inner_hash`
/// (a callback so this module never needs tx-log access directly).
pub fn build<F>(aht: &AHTree, src: &TxHeader, dst: &TxHeader, max_linear_proof_len: u64, mut read_inner_hash: F) -> Result<DualProof>
where
    F: FnMut(u64) -> Result<Digest32>,
{
    if src.id > dst.id {
        return err_at!(IllegalArguments, msg: "dual_proof: src.id={} > dst.id={}", src.id, dst.id);
    }

    let inclusion_proof = if dst.bl_tx_id > 0 && src.id < dst.bl_tx_id {
        Some(aht.inclusion_proof(src.id, dst.bl_tx_id)?)
    } else {
        None
    };

    let consistency_proof = if src.bl_tx_id > 0 && dst.bl_tx_id > 0 {
        Some(aht.consistency_proof(src.bl_tx_id, dst.bl_tx_id)?)
    } else {
        None
    };

    let last_inclusion_proof = if dst.bl_tx_id > 0 {
        aht.inclusion_proof(dst.bl_tx_id, dst.bl_tx_id)?
    } else {
        vec![]
    };

    let start = std::cmp::max(src.id, dst.bl_tx_id) + 1;
    if dst.id >= start && dst.id - start + 1 > max_linear_proof_len {
        return err_at!(LinearProofMaxLenExceeded, msg: "{} > {}", dst.id - start + 1, max_linear_proof_len);
    }
    let mut linear_proof = vec![];
    for id in start..=dst.id {
        linear_proof.push(read_inner_hash(id)?);
    }

    Ok(DualProof { inclusion_proof, consistency_proof, last_inclusion_proof, linear_proof })
}

/// Fold `src_alh` forward through `proof.linear_proof`, each step computing
/// `Alh[id] = H(id ‖ prevAlh ‖ innerHash[id])`, and return the final Alh —
/// the verifier compares this against the claimed `dst.Alh`.
pub fn fold_linear(mut alh: Digest32, mut id: u64, proof: &DualProof) -> Digest32 {
    use crate::hash;
    for inner_hash in &proof.linear_proof {
        id += 1;
        let mut buf = Vec::with_capacity(8 + 32 + 32);
        buf.extend_from_slice(&id.to_be_bytes());
        buf.extend_from_slice(&alh);
        buf.extend_from_slice(inner_hash);
        alh = hash::sum(&buf);
    }
    alh
}

#[cfg(test)]
mod proof_test {
    use super::*;
    use crate::ahtree::{verify_inclusion, AHTree};
    use crate::hash;
    use std::collections::HashMap;

    #[test]
    fn test_dual_proof_folds_to_dst_alh() {
        let dir = tempfile::tempdir().unwrap();
        let aht = AHTree::create(dir.path(), 64, 1).unwrap();

        let mut headers = vec![];
        let mut inner_hashes: HashMap<u64, Digest32> = HashMap::new();
        let mut prev_alh = hash::ZERO_DIGEST;
        for id in 1..=10u64 {
            let bl_tx_id = aht.size();
            let bl_root = if bl_tx_id == 0 { hash::ZERO_DIGEST } else { aht.root_at(bl_tx_id).unwrap() };
            let e_h = hash::sum(format!("entries-{}", id).as_bytes());
            let header = super::TxHeader::compute(id, 1000 + id as i64, bl_tx_id, bl_root, prev_alh, e_h);
            aht.append(&header.alh).unwrap();
            inner_hashes.insert(id, header.inner_hash);
            prev_alh = header.alh;
            headers.push(header);
        }

        let src = headers[2]; // id=3
        let dst = headers[9]; // id=10
        let dp = build(&aht, &src, &dst, 100, |id| Ok(inner_hashes[&id])).unwrap();

        let folded = fold_linear(src.alh, src.id, &dp);
        assert_eq!(folded, dst.alh);

        if let Some(incl) = &dp.inclusion_proof {
            let mut leaf = vec![0u8];
            leaf.extend_from_slice(&src.alh);
            let leaf_hash = hash::sum(&leaf);
            assert!(verify_inclusion(incl, src.id, dst.bl_tx_id, leaf_hash, dst.bl_root));
        }
    }
}
