pub mod document;
pub mod guard;
pub mod registry;
pub mod undo;
