//! SHA-256 binary Merkle tree over a flat sequence of leaf hashes.
//!
//! Odd-sized levels duplicate the last node, per the audit-export
//! contract. Combining two node hashes hashes the concatenation of their
//! hex text (not raw bytes) — an implementation detail hidden behind
//! [`merkle_root`]/[`merkle_proof`]/[`verify_merkle_proof`], all of which
//! agree with each other.

use par_canonical::sha256_hex;
use serde::{Deserialize, Serialize};

/// Which side of the parent node a proof step's sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// The sibling is the left child; `current` is the right child.
    Left,
    /// The sibling is the right child; `current` is the left child.
    Right,
}

/// One step of a Merkle inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// The sibling node's hash at this level.
    pub hash: String,
    /// Which side of the parent the sibling sits on.
    pub side: Side,
}

fn combine(left: &str, right: &str) -> String {
    sha256_hex(format!("{left}{right}").as_bytes())
}

fn build_levels(leaves: &[String]) -> Vec<Vec<String>> {
    let mut levels = vec![leaves.to_vec()];
    let mut current = leaves.to_vec();
    while current.len() > 1 {
        let mut next = Vec::with_capacity(current.len().div_ceil(2));
        let mut i = 0;
        while i < current.len() {
            let left = &current[i];
            let right = if i + 1 < current.len() { &current[i + 1] } else { &current[i] };
            next.push(combine(left, right));
            i += 2;
        }
        levels.push(next.clone());
        current = next;
    }
    levels
}

/// Computes the Merkle root over `leaves`. Returns `None` for an empty
/// slice; returns the single leaf itself (unhashed further) for a
/// one-element slice.
pub fn merkle_root(leaves: &[String]) -> Option<String> {
    match leaves.len() {
        0 => None,
        1 => Some(leaves[0].clone()),
        _ => build_levels(leaves).last().and_then(|l| l.first().cloned()),
    }
}

/// Computes the inclusion proof for `leaves[index]`.
///
/// Returns `None` if `index` is out of range.
pub fn merkle_proof(leaves: &[String], mut index: usize) -> Option<Vec<ProofStep>> {
    if index >= leaves.len() {
        return None;
    }
    if leaves.len() == 1 {
        return Some(Vec::new());
    }
    let levels = build_levels(leaves);
    let mut proof = Vec::with_capacity(levels.len().saturating_sub(1));
    for level in &levels[..levels.len() - 1] {
        let (sibling_index, side) = if index % 2 == 0 {
            let sibling = if index + 1 < level.len() { index + 1 } else { index };
            (sibling, Side::Right)
        } else {
            (index - 1, Side::Left)
        };
        proof.push(ProofStep {
            hash: level[sibling_index].clone(),
            side,
        });
        index /= 2;
    }
    Some(proof)
}

/// Reconstructs the root from `leaf` and `proof` and compares it to `root`.
pub fn verify_merkle_proof(leaf: &str, proof: &[ProofStep], root: &str) -> bool {
    let mut current = leaf.to_string();
    for step in proof {
        current = match step.side {
            Side::Left => combine(&step.hash, &current),
            Side::Right => combine(&current, &step.hash),
        };
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<String> {
        (0..n).map(|i| sha256_hex(format!("leaf-{i}").as_bytes())).collect()
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let l = leaves(1);
        assert_eq!(merkle_root(&l).unwrap(), l[0]);
    }

    #[test]
    fn empty_has_no_root() {
        assert!(merkle_root(&[]).is_none());
    }

    #[test]
    fn every_leaf_in_even_sized_tree_proves_inclusion() {
        let l = leaves(8);
        let root = merkle_root(&l).unwrap();
        for (i, leaf) in l.iter().enumerate() {
            let proof = merkle_proof(&l, i).unwrap();
            assert!(verify_merkle_proof(leaf, &proof, &root), "index {i} failed");
        }
    }

    #[test]
    fn every_leaf_in_odd_sized_tree_proves_inclusion() {
        let l = leaves(7);
        let root = merkle_root(&l).unwrap();
        for (i, leaf) in l.iter().enumerate() {
            let proof = merkle_proof(&l, i).unwrap();
            assert!(verify_merkle_proof(leaf, &proof, &root), "index {i} failed");
        }
    }

    #[test]
    fn single_element_tree_round_trips() {
        let l = leaves(1);
        let root = merkle_root(&l).unwrap();
        let proof = merkle_proof(&l, 0).unwrap();
        assert!(proof.is_empty());
        assert!(verify_merkle_proof(&l[0], &proof, &root));
    }

    #[test]
    fn proof_out_of_range_is_none() {
        let l = leaves(3);
        assert!(merkle_proof(&l, 3).is_none());
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let l = leaves(5);
        let root = merkle_root(&l).unwrap();
        let proof = merkle_proof(&l, 2).unwrap();
        assert!(!verify_merkle_proof("not-the-real-leaf", &proof, &root));
    }
}
