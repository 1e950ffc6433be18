pub mod api;
pub mod app;
pub mod capture;
pub mod collector;
pub mod revision;
pub mod store;
