pub mod env;
pub mod redis;
pub mod retries;
pub mod time;
