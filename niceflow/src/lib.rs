pub mod flist;
pub mod layout;
pub mod runner;

pub use crate::layout::Layout;
