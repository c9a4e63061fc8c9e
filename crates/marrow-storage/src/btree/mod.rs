//! B+tree secondary and primary key indexes.

mod index;
mod node;

pub use index::{BTreeIndex, RangeScan};
pub use node::{BTreeNode, IndexKey, BTREE_ORDER, MAX_KEYS, MAX_KEY_SIZE, MIN_KEYS, NO_NODE};
