// 导出模块
pub mod common;
pub mod filter;
pub mod notify;

// Re-export error types
pub use common::error::AppError;
