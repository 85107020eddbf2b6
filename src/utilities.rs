pub mod config;
pub mod confirmation;
pub mod credential;
pub mod generator;
pub mod image_handle;
pub mod logchamp;
pub mod rate_limit;
pub mod storage;

#[cfg(test)]
pub mod test_fixtures;
