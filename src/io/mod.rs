pub mod extents;
pub mod sam;
pub mod tables;
