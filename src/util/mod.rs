pub mod format_utils;
pub mod hash;
