pub mod memory;

pub use memory::InMemoryChannelEngine;
