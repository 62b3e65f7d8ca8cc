pub mod temp;

pub use temp::{RequestDir, TempStorage};
