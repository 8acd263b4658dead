pub mod graph;
pub mod validate;
