pub mod helpers;

pub mod binary;
pub mod config;
pub mod linking;
pub mod properties;
pub mod suspension;
