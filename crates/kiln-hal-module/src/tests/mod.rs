pub mod helpers;

pub mod flags;
pub mod program;
