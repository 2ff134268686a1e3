pub mod api_types;
pub mod cache;
pub mod client;
pub mod service;
pub mod types;

pub use client::{BudgetApi, HttpBudgetApi};
pub use service::{BudgetService, CacheTtls, MutationOutcome, ServiceStats};
