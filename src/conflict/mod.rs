//! Conflict resolution between agents answering the same sub-question

mod comparator;
mod resolver;

pub use comparator::{numeric_similarity, text_similarity, DefaultComparator, PayloadComparator};
pub use resolver::{
    Conflict, ConflictOption, ConflictResolver, Resolution, ResolverConfig, UnresolvedConflict,
};
