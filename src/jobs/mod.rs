pub mod rate_limit_reset;
