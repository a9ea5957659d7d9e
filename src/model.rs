//! 统一的体素模型

use crate::error::{ConvertError, Result};
use crate::nbt::{Compound, CompoundExt, Tag};
use std::collections::BTreeMap;
use std::fmt;

/// 空气
pub const AIR: &str = "minecraft:air";

/// 稠密网格的体积上限（约 1.3 亿个方块）
pub const MAX_GRID_VOLUME: u64 = 1 << 27;

/// 方块状态: 命名空间 ID + 属性
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockState {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> Self {
        Self::new(AIR)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// 解析 `minecraft:oak_stairs[facing=north,half=top]` 形式的字符串
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, props) = match s.find('[') {
            Some(open) => {
                let close = s
                    .rfind(']')
                    .filter(|&c| c > open)
                    .ok_or_else(|| ConvertError::format(format!("方块状态缺少 ']': {}", s)))?;
                (&s[..open], Some(&s[open + 1..close]))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(ConvertError::format("方块 ID 为空"));
        }

        let mut state = Self::new(name);
        if let Some(props) = props {
            for pair in props.split(',').filter(|p| !p.trim().is_empty()) {
                let (k, v) = pair
                    .split_once('=')
                    .ok_or_else(|| ConvertError::format(format!("属性格式错误: {}", pair)))?;
                state.properties.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        Ok(state)
    }

    /// 从 `{Name, Properties}` 复合标签读取（区块调色板、Litematica）
    pub fn from_nbt(tag: &Compound) -> Result<Self> {
        let name = tag
            .get_str("Name")
            .ok_or_else(|| ConvertError::format("调色板条目缺少 Name"))?;
        let mut state = Self::new(name);
        if let Some(props) = tag.get_compound("Properties") {
            for (k, v) in props {
                if let Some(v) = v.as_str() {
                    state.properties.insert(k.clone(), v.to_string());
                }
            }
        }
        Ok(state)
    }

    pub fn to_nbt(&self) -> Tag {
        let mut map = Compound::new();
        map.insert("Name".to_string(), Tag::String(self.name.clone()));
        if !self.properties.is_empty() {
            let props = self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), Tag::String(v.clone())))
                .collect();
            map.insert("Properties".to_string(), Tag::Compound(props));
        }
        Tag::Compound(map)
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "[{}]", props.join(","))?;
        }
        Ok(())
    }
}

/// 调色板条目
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PaletteEntry {
    /// 命名方块状态
    State(BlockState),
    /// 经典格式的数字 ID + 数据值
    Legacy { id: u16, data: u8 },
}

/// 方块实体（坐标相对于网格）
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEntity {
    pub pos: [u32; 3],
    pub id: String,
    pub data: Compound,
}

/// 实体（坐标相对于网格）
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub pos: [f64; 3],
    pub id: String,
    pub data: Compound,
}

/// 来源格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Classic,
    SpongeV2,
    SpongeV3,
    Litematic,
    World,
}

/// 网格尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub length: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32, length: u32) -> Self {
        Self {
            width,
            height,
            length,
        }
    }

    pub fn volume(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.length as u64
    }

    /// 分配稠密数组前检查体积，超过 [`MAX_GRID_VOLUME`] 时返回 `Format`
    pub fn dense_len(&self) -> Result<usize> {
        let volume = self.volume();
        if volume > MAX_GRID_VOLUME {
            return Err(ConvertError::format(format!(
                "尺寸 {} 共 {} 个方块，超过上限 {}",
                self, volume, MAX_GRID_VOLUME
            )));
        }
        usize::try_from(volume).map_err(|_| ConvertError::format(format!("尺寸过大: {}", self)))
    }

    pub fn contains(&self, x: u32, y: u32, z: u32) -> bool {
        x < self.width && y < self.height && z < self.length
    }

    /// YZX 顺序的线性索引
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (y as usize * self.length as usize + z as usize) * self.width as usize + x as usize
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.length)
    }
}

/// 读取器产出的体素网格，创建后不再修改
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    dims: Dimensions,
    palette: Vec<PaletteEntry>,
    indices: Vec<u32>,
    pub block_entities: Vec<BlockEntity>,
    pub entities: Vec<Entity>,
    /// 原始文件记录的坐标偏移
    pub offset: [i32; 3],
    /// 文件记录的 Minecraft 数据版本
    pub data_version: Option<i32>,
    pub source: SourceKind,
}

impl VoxelGrid {
    /// 创建网格。`indices` 为空表示文件中没有方块数据。
    pub fn new(
        dims: Dimensions,
        palette: Vec<PaletteEntry>,
        indices: Vec<u32>,
        source: SourceKind,
    ) -> Result<Self> {
        if dims.width == 0 || dims.height == 0 || dims.length == 0 {
            return Err(ConvertError::format(format!("尺寸无效: {}", dims)));
        }
        if !indices.is_empty() {
            if indices.len() as u64 != dims.volume() {
                return Err(ConvertError::format(format!(
                    "方块数量 {} 与尺寸 {} 不符",
                    indices.len(),
                    dims
                )));
            }
            if let Some(&bad) = indices.iter().find(|&&i| i as usize >= palette.len()) {
                return Err(ConvertError::format(format!(
                    "调色板索引 {} 超出调色板大小 {}",
                    bad,
                    palette.len()
                )));
            }
        }
        Ok(Self {
            dims,
            palette,
            indices,
            block_entities: Vec::new(),
            entities: Vec::new(),
            offset: [0; 3],
            data_version: None,
            source,
        })
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    pub fn width(&self) -> u32 {
        self.dims.width
    }

    pub fn height(&self) -> u32 {
        self.dims.height
    }

    pub fn length(&self) -> u32 {
        self.dims.length
    }

    pub fn palette(&self) -> &[PaletteEntry] {
        &self.palette
    }

    /// 文件中是否带有方块数据
    pub fn has_data(&self) -> bool {
        !self.indices.is_empty()
    }

    /// 坐标处的调色板索引；无数据时为 0
    pub fn palette_index(&self, x: u32, y: u32, z: u32) -> u32 {
        self.indices
            .get(self.dims.index(x, y, z))
            .copied()
            .unwrap_or(0)
    }

    pub fn entry_at(&self, x: u32, y: u32, z: u32) -> Option<&PaletteEntry> {
        self.palette.get(self.palette_index(x, y, z) as usize)
    }
}
