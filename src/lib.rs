//! hybrid execute-while-compiling JIT core for an eight-command tape
//! language (`+ - < > . , [ ]`). the driver interprets commands directly
//! while simultaneously emitting native machine code for them, and jumps
//! into compiled code whenever a loop closes on a nonzero guard; this
//! crate's binary (`src/main.rs`) is a thin CLI wrapper around
//! [`driver::run`].

pub mod driver;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod tape;
