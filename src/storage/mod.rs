//! Window store and the row-source capability used by training.

mod windows;

pub use windows::{RowSource, WindowRecord, WindowStore, WINDOWS_TABLE};
