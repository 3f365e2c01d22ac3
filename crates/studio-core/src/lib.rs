pub mod adapters;
pub mod config;
pub mod config_store;
pub mod context;
pub mod hub;
pub mod logging;
pub mod model_router;
pub mod models;
pub mod orchestration;
pub mod polling;
pub mod providers;
pub mod registry;
pub mod router;
