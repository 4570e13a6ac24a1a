//! 项目 DTO

use serde::{Deserialize, Serialize};

/// 项目画像配置（YAML 文本）
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProfileConfigBody {
    #[serde(default)]
    pub profile_config: Option<String>,
}
