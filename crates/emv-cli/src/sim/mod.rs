//! Simulated kernel, reader and terminal services

pub mod keys;
pub mod kernel;
pub mod terminal;

pub use kernel::{KernelScript, ScriptedKernel, SimDriver};
pub use keys::KeyScanner;
pub use terminal::{ConsoleFallback, ConsoleIhm, MemoryBatch, SimHost, SimulatedPin};
