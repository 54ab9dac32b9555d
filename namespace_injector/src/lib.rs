pub mod cluster;
pub mod controller;
pub mod event_filter;
pub mod instrumentation;
pub mod reconciler;
pub mod retry;
pub mod tracing;
pub mod utils;
