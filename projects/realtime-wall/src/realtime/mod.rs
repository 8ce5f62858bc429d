pub mod allocator;
pub mod driver;
pub mod feed;
pub mod frames;
