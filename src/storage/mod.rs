//! 存储层模块
//!
//! 提供数据持久化服务，支持进程内存储和 SurrealDB。

pub mod factory;
pub mod memory;

#[cfg(feature = "surrealdb")]
pub mod repository;

#[cfg(feature = "surrealdb")]
pub mod surrealdb;

pub use factory::{Repositories, StorageFactory, StorageInstance};
pub use memory::InMemoryStore;

use crate::error::{AppError, Result};

/// Largest page a blob listing may request
pub const MAX_PAGE_SIZE: usize = 100;

/// Row offset of a listing page. Oversized pages and offsets that do not
/// fit a query parameter are rejected.
pub fn page_offset(page: usize, page_size: usize) -> Result<usize> {
    if page_size > MAX_PAGE_SIZE {
        return Err(AppError::Validation(format!(
            "page_size {} exceeds the maximum of {}",
            page_size, MAX_PAGE_SIZE
        )));
    }
    page.checked_mul(page_size)
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| AppError::Validation(format!("page {} is out of range", page)))
}
