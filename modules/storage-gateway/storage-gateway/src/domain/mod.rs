pub mod cache;
pub mod coalescer;
pub mod path_guard;
pub mod pool;
pub mod ports;
pub mod retry;
pub mod service;
