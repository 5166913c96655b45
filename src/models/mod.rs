pub mod credential;
pub mod mapping;
pub mod rate_limit;
pub mod usage;
