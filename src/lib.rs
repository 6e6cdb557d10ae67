pub mod client;
pub mod config;
pub mod config_validation;
pub mod connection_pool;
pub mod data_source;
pub mod errors;
pub mod load_models;
pub mod management;
pub mod metrics;
pub mod node;
pub mod percentiles;
pub mod ramp;
pub mod rate_limiter;
pub mod remote;
pub mod scale;
pub mod sink;
pub mod utils;
pub mod worker;
pub mod yaml_config;
