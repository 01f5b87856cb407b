//! The command boundary. Each function takes `&AppState` and plain
//! structured data, and returns plain structured data or a typed error;
//! nothing engine-specific leaks across.

pub mod apis;
pub mod engines;
pub mod logs;
pub mod metrics;

#[derive(serde::Serialize)]
pub struct PaginatedResult<T: serde::Serialize> {
    pub items: Vec<T>,
    pub total: i64,
}
