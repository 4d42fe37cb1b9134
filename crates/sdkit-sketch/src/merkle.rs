//! SHA-256 Merkle tree with inclusion proofs.
//!
//! Leaves are `H(data)`; each parent is `H(left || right)`. A level with
//! an odd number of nodes pairs its last node with itself. Nodes live in
//! an arena and keep parent/child indices, so a proof is a walk from the
//! leaf up through parent links. The tree is immutable once built.

use sha2::{Digest, Sha256};

use crate::error::{SketchError, SketchResult};

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[derive(Debug, Clone)]
struct MerkleNode {
    hash: Hash,
    data: Option<Vec<u8>>,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
}

/// An immutable Merkle tree over a list of data blocks.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    leaves: Vec<usize>,
    root: usize,
    height: usize,
}

impl MerkleTree {
    /// Hashes every block and folds the levels up to a single root.
    pub fn build<I, D>(data: I) -> SketchResult<Self>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u8]>,
    {
        let mut nodes: Vec<MerkleNode> = data
            .into_iter()
            .map(|block| {
                let block = block.as_ref();
                MerkleNode {
                    hash: sha256(block),
                    data: Some(block.to_vec()),
                    parent: None,
                    left: None,
                    right: None,
                }
            })
            .collect();
        if nodes.is_empty() {
            return Err(SketchError::InvalidArgument(
                "cannot build a merkle tree from no data".to_string(),
            ));
        }

        let leaves: Vec<usize> = (0..nodes.len()).collect();
        let mut level = leaves.clone();
        let mut height = 0;
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = *pair.get(1).unwrap_or(&left);
                let parent = nodes.len();
                nodes.push(MerkleNode {
                    hash: hash_pair(&nodes[left].hash, &nodes[right].hash),
                    data: None,
                    parent: None,
                    left: Some(left),
                    right: Some(right),
                });
                nodes[left].parent = Some(parent);
                nodes[right].parent = Some(parent);
                next.push(parent);
            }
            level = next;
            height += 1;
        }

        Ok(Self {
            root: level[0],
            nodes,
            leaves,
            height,
        })
    }

    /// Root digest.
    pub fn root(&self) -> Hash {
        self.nodes[self.root].hash
    }

    /// Root digest as lowercase hex.
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// Number of data blocks.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of hashing levels above the leaves.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Digest of leaf `index`.
    pub fn leaf_hash(&self, index: usize) -> Option<Hash> {
        self.leaves.get(index).map(|&n| self.nodes[n].hash)
    }

    /// Original bytes of leaf `index`.
    pub fn leaf_data(&self, index: usize) -> Option<&[u8]> {
        self.leaves
            .get(index)
            .and_then(|&n| self.nodes[n].data.as_deref())
    }

    /// Sibling digests from leaf `index` up to (not including) the root.
    pub fn get_proof(&self, index: usize) -> SketchResult<Vec<Hash>> {
        let mut node = *self.leaves.get(index).ok_or_else(|| {
            SketchError::InvalidArgument(format!(
                "leaf index {} out of range for {} leaves",
                index,
                self.leaves.len()
            ))
        })?;
        let mut proof = Vec::with_capacity(self.height);
        while let Some(parent) = self.nodes[node].parent {
            let p = &self.nodes[parent];
            let sibling = if p.left == Some(node) { p.right } else { p.left };
            if let Some(sibling) = sibling {
                proof.push(self.nodes[sibling].hash);
            }
            node = parent;
        }
        Ok(proof)
    }
}

/// Checks that `data` sits at leaf `index` of the tree with digest `root`.
///
/// At each level the running hash is the left operand when the index is
/// even and the right operand when it is odd.
pub fn verify_proof(root: &Hash, data: &[u8], proof: &[Hash], index: usize) -> bool {
    let mut hash = sha256(data);
    let mut index = index;
    for sibling in proof {
        hash = if index % 2 == 0 {
            hash_pair(&hash, sibling)
        } else {
            hash_pair(sibling, &hash)
        };
        index /= 2;
    }
    &hash == root
}
