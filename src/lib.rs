pub mod app;
pub mod config;
pub mod context;
pub mod crypt;
pub mod exec;
pub mod launch;
pub mod models;
pub mod queue;
pub mod rbac;
pub mod runtime;
pub mod shared;
pub mod store;
