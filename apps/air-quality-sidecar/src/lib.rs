pub mod aqi;
pub mod config;
pub mod error;
pub mod history;
pub mod http;
pub mod poller;
pub mod position;
pub mod reading;
pub mod session;
pub mod source;

#[cfg(test)]
pub mod test_support;
