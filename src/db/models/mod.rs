//! Database row models.

pub mod installation;

pub use installation::*;
