//! File I/O boundary for the CLI tools.
//!
//! The core pipeline operates purely on in-memory cubes; this module exists
//! so the command-line surfaces can read and write cube files.

pub mod fits;

pub use self::fits::{read_cube, write_collapse_image, write_cube, FitsError};
