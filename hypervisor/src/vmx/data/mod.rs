pub mod host_stack;
pub mod msr_bitmap;
pub mod region;
