//! SHA-256 hashing and Merkle batching.
//!
//! The Merkle tree here is grounded on the teacher's `openibank-crypto::hash`
//! module; settld reuses it unmodified for the receipt-export merkle root
//! (§B.2) rather than hashing canonical JSON (the leaves are already receipt
//! hashes, not raw JSON needing canonicalization).

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Merkle tree node.
#[derive(Debug, Clone)]
pub struct MerkleNode {
    pub hash: [u8; 32],
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Build a Merkle tree from leaf hashes. Odd levels duplicate the last node.
pub fn build_merkle_tree(leaves: &[[u8; 32]]) -> Option<MerkleNode> {
    if leaves.is_empty() {
        return None;
    }

    let mut nodes: Vec<MerkleNode> = leaves
        .iter()
        .map(|hash| MerkleNode { hash: *hash, left: None, right: None })
        .collect();

    while nodes.len() > 1 {
        let mut next_level = Vec::new();
        for chunk in nodes.chunks(2) {
            let left = chunk[0].clone();
            let right = chunk.get(1).cloned().unwrap_or_else(|| left.clone());
            let combined = hash_pair(&left.hash, &right.hash);
            next_level.push(MerkleNode {
                hash: combined,
                left: Some(Box::new(left)),
                right: Some(Box::new(right)),
            });
        }
        nodes = next_level;
    }

    nodes.into_iter().next()
}

pub fn merkle_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    build_merkle_tree(leaves).map(|node| node.hash)
}

pub fn merkle_root_hex(leaves: &[[u8; 32]]) -> Option<String> {
    merkle_root(leaves).map(hex::encode)
}

/// Build an inclusion proof for `leaves[index]`: a path of (is_left_sibling, hash) pairs.
pub fn merkle_proof(leaves: &[[u8; 32]], index: usize) -> Vec<(bool, [u8; 32])> {
    if leaves.is_empty() || index >= leaves.len() {
        return vec![];
    }

    let mut proof = Vec::new();
    let mut layer: Vec<[u8; 32]> = leaves.to_vec();
    let mut idx = index;

    while layer.len() > 1 {
        let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
        if sibling_idx < layer.len() {
            let is_left = idx % 2 == 1;
            proof.push((is_left, layer[sibling_idx]));
        } else {
            proof.push((false, layer[idx]));
        }

        let mut next_layer = Vec::new();
        for chunk in layer.chunks(2) {
            let left = chunk[0];
            let right = chunk.get(1).copied().unwrap_or(left);
            next_layer.push(hash_pair(&left, &right));
        }
        layer = next_layer;
        idx /= 2;
    }

    proof
}

pub fn verify_merkle_proof(leaf: [u8; 32], proof: &[(bool, [u8; 32])], root: [u8; 32]) -> bool {
    let mut current = leaf;
    for (is_left, sibling) in proof {
        current = if *is_left { hash_pair(sibling, &current) } else { hash_pair(&current, sibling) };
    }
    current == root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_64_chars() {
        assert_eq!(sha256_hex(b"settld").len(), 64);
    }

    #[test]
    fn merkle_proof_verifies_for_every_leaf() {
        let leaves: Vec<[u8; 32]> = (0..5u8).map(|i| sha256(&[i])).collect();
        let root = merkle_root(&leaves).unwrap();
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = merkle_proof(&leaves, i);
            assert!(verify_merkle_proof(*leaf, &proof, root));
        }
    }

    #[test]
    fn merkle_proof_rejects_wrong_leaf() {
        let leaves: Vec<[u8; 32]> = (0..4u8).map(|i| sha256(&[i])).collect();
        let root = merkle_root(&leaves).unwrap();
        let proof = merkle_proof(&leaves, 0);
        assert!(!verify_merkle_proof(sha256(b"wrong"), &proof, root));
    }
}
