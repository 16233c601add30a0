//! Instruction execution handlers

mod arithmetic;
mod comparison;
mod control;
mod functions;
mod lists;
mod variables;
