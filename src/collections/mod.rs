// Commandified collections: ordinary containers whose mutations are
// submitted to a CommandEngine as undoable steps.

pub mod list;

pub use list::{CommandVec, Mutation, MutationDecision};
