//! 核心数据模型模块
//!
//! 定义 Memoria 的核心数据结构：Blob, ProfileEntry, UserEvent, ProfileConfig，
//! 以及各自的仓储接口。

pub mod blob;
pub mod blob_repository;
pub mod event;
pub mod event_repository;
pub mod profile;
pub mod profile_config;
pub mod profile_repository;
pub mod project_repository;

pub use blob::*;
pub use blob_repository::BlobRepository;
pub use event::*;
pub use event_repository::EventRepository;
pub use profile::*;
pub use profile_config::*;
pub use profile_repository::ProfileRepository;
pub use project_repository::ProjectRepository;
