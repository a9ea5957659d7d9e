//! 配置文件加载与管理

use crate::commands::{CommandOptions, CoordMode};
use crate::convert::{ConvertOptions, OutputFormat, DEFAULT_WARN_VOLUME};
use crate::transform::MirrorAxes;
use anyhow::{bail, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 当前目录下的配置文件名
pub const LOCAL_CONFIG: &str = "mcbridge.toml";

/// 主配置结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 转换配置
    pub convert: ConvertConfig,
    /// 方块翻译配置
    pub translation: TranslationConfig,
    /// 限制
    pub limits: LimitsConfig,
}

/// 转换配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// 默认输出格式
    pub format: OutputFormat,
    /// 顺时针旋转角度
    pub rotation: u32,
    /// 镜像轴，如 "x"、"xz"
    pub mirror: String,
    /// 挖空内部
    pub hollow: bool,
    /// 在重力方块下放置屏障
    pub structure_void: bool,
    /// 命令使用绝对坐标
    pub absolute: bool,
}

/// 方块翻译配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// 未知方块的替代方块
    pub default_target: String,
    /// 替换规则（源方块 → 目标方块）
    pub overrides: BTreeMap<String, String>,
}

/// 限制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// 超过这个体积时警告
    pub warn_volume: u64,
}

// ============== 默认值 ==============

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Pack,
            rotation: 0,
            mirror: String::new(),
            hollow: false,
            structure_void: true,
            absolute: false,
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            default_target: "minecraft:stone".to_string(),
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            warn_volume: DEFAULT_WARN_VOLUME,
        }
    }
}

// ============== 配置加载 ==============

impl Config {
    /// 从文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// 获取默认配置文件路径
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mcbridge").join("config.toml"))
    }

    /// 按优先级加载配置：
    /// 1. 当前目录的 mcbridge.toml
    /// 2. 用户配置目录的 config.toml
    /// 3. 默认配置
    pub fn load() -> Self {
        Self::load_from(Path::new(LOCAL_CONFIG), Self::default_config_path().as_deref())
    }

    fn load_from(local: &Path, user: Option<&Path>) -> Self {
        for path in std::iter::once(local).chain(user) {
            if !path.exists() {
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => {
                    info!("已加载配置: {}", path.display());
                    return config;
                }
                Err(e) => warn!("无法加载配置 {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// 生成默认配置文件内容
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// 转换为转换选项；命令行参数随后覆盖其中的值
    pub fn convert_options(&self) -> Result<ConvertOptions> {
        let Some(mirror) = MirrorAxes::parse(&self.convert.mirror) else {
            bail!("无效的镜像轴: {:?}（只能包含 x、y、z）", self.convert.mirror);
        };
        let default_target = self.translation.default_target.trim();
        Ok(ConvertOptions {
            format: self.convert.format,
            rotation: self.convert.rotation,
            mirror,
            hollow: self.convert.hollow,
            structure_void: self.convert.structure_void,
            commands: CommandOptions {
                mode: if self.convert.absolute {
                    CoordMode::Absolute
                } else {
                    CoordMode::Relative
                },
                origin: [0; 3],
            },
            default_target: (!default_target.is_empty()).then(|| default_target.to_string()),
            overrides: self
                .translation
                .overrides
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            warn_volume: self.limits.warn_volume,
            ..ConvertOptions::default()
        })
    }
}
