//! Inclusion and consistency proof construction (reading tree nodes from
//! storage) and verification (pure functions, no storage access — a client
//! holding only a proof and the two roots can run these).
//!
//! Construction is a direct port of the original append-only hash tree's
//! recursive `inclusionProof`/`consistencyProof`/`highestNode` routines.
//! Verification mirrors the same recursion structurally so that the
//! left/right combination order it applies to each proof element is
//! guaranteed to match what construction produced.

use super::Inner;
use crate::hash::{self, Digest32};
use crate::Result;

const NODE_PREFIX: u8 = 0x01;

fn node_combine(left: &Digest32, right: &Digest32) -> Digest32 {
    let mut buf = [0u8; 1 + 64];
    buf[0] = NODE_PREFIX;
    buf[1..33].copy_from_slice(left);
    buf[33..65].copy_from_slice(right);
    hash::sum(&buf)
}

type NodeFn = fn(&mut Inner, u64, u64) -> Result<Digest32>;
type HighestFn = fn(&mut Inner, u64, u64) -> Result<Digest32>;

pub(super) fn inclusion_proof(
    inner: &mut Inner,
    i: u64,
    j: u64,
    height: u64,
    node: NodeFn,
    highest_node: HighestFn,
) -> Result<Vec<Digest32>> {
    let mut proof = vec![];
    let mut h = height as i64 - 1;
    while h >= 0 {
        let hh = h as u64;
        if (j - 1) & (1 << hh) > 0 {
            let k = ((j - 1) >> hh) << hh;
            if i <= k {
                let hnode = highest_node(inner, j, hh)?;
                let mut front = inclusion_proof(inner, i, k, hh, node, highest_node)?;
                front.push(hnode);
                front.extend(proof);
                return Ok(front);
            }
            let n = node(inner, k, hh)?;
            proof.insert(0, n);
        }
        h -= 1;
    }
    Ok(proof)
}

pub(super) fn consistency_proof(
    inner: &mut Inner,
    i: u64,
    j: u64,
    height: u64,
    node: NodeFn,
    highest_node: HighestFn,
) -> Result<Vec<Digest32>> {
    if i == j {
        let mut h = height as i64 - 1;
        while h >= 0 {
            let hh = h as u64;
            if (j - 1) & (1 << hh) > 0 {
                let n = node(inner, ((j - 1) >> hh) << hh, hh)?;
                let hnode = highest_node(inner, i, hh)?;
                return Ok(vec![hnode, n]);
            }
            h -= 1;
        }
        return Ok(vec![]);
    }

    let mut proof = vec![];
    let mut h = height as i64 - 1;
    while h >= 0 {
        let hh = h as u64;
        if (j - 1) & (1 << hh) > 0 {
            let k = ((j - 1) >> hh) << hh;
            if i <= k {
                let hnode = highest_node(inner, j, hh)?;
                if i < k {
                    let mut front = consistency_proof(inner, i, k, hh, node, highest_node)?;
                    front.push(hnode);
                    front.extend(proof);
                    return Ok(front);
                }
                // i == k
                let hnode2 = highest_node(inner, i, hh)?;
                let mut front = vec![hnode2, hnode];
                front.extend(proof);
                return Ok(front);
            }
            let n = node(inner, k, hh)?;
            proof.insert(0, n);
        }
        h -= 1;
    }
    Ok(proof)
}

/// Verify that `leaf_hash` (the hash of leaf `i`, `H(0x00 ‖ data)`) is
/// included in the tree of size `j` whose root is `root`.
pub fn verify_inclusion(proof: &[Digest32], i: u64, j: u64, leaf_hash: Digest32, root: Digest32) -> bool {
    if i == 0 || i > j {
        return false;
    }
    let height = bits_len64(j - 1);
    let mut pos = 0usize;
    match verify_incl_rec(i, j, height, leaf_hash, proof, &mut pos) {
        Some(got) if pos == proof.len() => got == root,
        _ => false,
    }
}

fn verify_incl_rec(
    i: u64,
    j: u64,
    height: u64,
    leaf_hash: Digest32,
    proof: &[Digest32],
    pos: &mut usize,
) -> Option<Digest32> {
    let mut deferred: Vec<u64> = vec![];
    let mut h = height as i64 - 1;
    while h >= 0 {
        let hh = h as u64;
        if (j - 1) & (1 << hh) > 0 {
            let k = ((j - 1) >> hh) << hh;
            if i <= k {
                let inner = verify_incl_rec(i, k, hh, leaf_hash, proof, pos)?;
                let hnode = take(proof, pos)?;
                let mut running = node_combine(&inner, &hnode);
                while deferred.pop().is_some() {
                    let elem = take(proof, pos)?;
                    running = node_combine(&elem, &running);
                }
                return Some(running);
            }
            deferred.push(hh);
        }
        h -= 1;
    }
    let mut running = leaf_hash;
    while deferred.pop().is_some() {
        let elem = take(proof, pos)?;
        running = node_combine(&elem, &running);
    }
    Some(running)
}

/// Verify that the tree of size `j` (root `root_j`) extends the tree of
/// size `i` (root `root_i`).
pub fn verify_consistency(proof: &[Digest32], i: u64, j: u64, root_i: Digest32, root_j: Digest32) -> bool {
    if i == 0 || i > j {
        return false;
    }
    if i == j {
        return root_i == root_j;
    }
    let height = bits_len64(j - 1);
    let mut pos = 0usize;
    match verify_cons_rec(i, j, height, proof, &mut pos) {
        Some((old_root, new_root)) if pos == proof.len() => old_root == root_i && new_root == root_j,
        _ => false,
    }
}

fn verify_cons_rec(
    i: u64,
    j: u64,
    height: u64,
    proof: &[Digest32],
    pos: &mut usize,
) -> Option<(Digest32, Digest32)> {
    let mut deferred: Vec<u64> = vec![];
    let mut h = height as i64 - 1;
    while h >= 0 {
        let hh = h as u64;
        if (j - 1) & (1 << hh) > 0 {
            let k = ((j - 1) >> hh) << hh;
            if i <= k {
                if i < k {
                    let (old_root, inner_new) = verify_cons_rec(i, k, hh, proof, pos)?;
                    let hnode = take(proof, pos)?;
                    let mut running = node_combine(&inner_new, &hnode);
                    while deferred.pop().is_some() {
                        let elem = take(proof, pos)?;
                        running = node_combine(&elem, &running);
                    }
                    return Some((old_root, running));
                }
                // i == k
                let hnode2 = take(proof, pos)?;
                let hnode = take(proof, pos)?;
                let mut running = node_combine(&hnode2, &hnode);
                let old_root = hnode2;
                while deferred.pop().is_some() {
                    let elem = take(proof, pos)?;
                    running = node_combine(&elem, &running);
                }
                return Some((old_root, running));
            }
            deferred.push(hh);
        }
        h -= 1;
    }
    None
}

fn take(proof: &[Digest32], pos: &mut usize) -> Option<Digest32> {
    let v = proof.get(*pos).copied();
    if v.is_some() {
        *pos += 1;
    }
    v
}

fn bits_len64(mut v: u64) -> u64 {
    let mut n = 0;
    while v > 0 {
        n += 1;
        v >>= 1;
    }
    n
}
