#[macro_use]
extern crate tracing;

pub mod aliyun;
pub mod config;
pub mod ecs;
pub mod http;
pub mod outputs;
pub mod signal;
#[cfg(test)]
pub mod testing;
pub mod trace;

/// The basic error type, dynamically dispatched and safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The basic result type, defined in terms of [`Error`] and generic over `T`
pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
