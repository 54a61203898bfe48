mod block;
mod header;
mod merkle;

pub use block::Block;
pub use header::{compact_to_target, BlockHeader, HEADER_SIZE};
pub use merkle::calculate_merkle_root;
