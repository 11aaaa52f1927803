pub mod codec;
pub mod connection;
pub mod constants;
pub mod debounce;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub mod mock;
