pub mod http;
#[cfg(test)]
pub mod mock;
pub mod stop_all;
pub mod traits;
pub mod types;
