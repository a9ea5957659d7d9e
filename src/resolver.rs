//! 坐标 → 合并键 的解析链
//!
//! 每个变换都是一个包装内层解析器的 [`KeyResolver`]，
//! 命令生成器只通过最外层解析器读取方块。

use crate::model::{BlockEntity, Dimensions, AIR};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 合并键: 两个体素键相等时可以合并进同一个 fill
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    /// 目标（Bedrock）方块 ID
    pub name: String,
    /// 保留的 Java 朝向属性
    pub properties: BTreeMap<String, String>,
}

pub type ResolvedKey = Arc<BlockKey>;

static AIR_KEY: Lazy<ResolvedKey> = Lazy::new(|| Arc::new(BlockKey::new(AIR)));

impl BlockKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_properties(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    pub fn air() -> ResolvedKey {
        AIR_KEY.clone()
    }

    pub fn is_air(&self) -> bool {
        self.name == AIR
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl fmt::Display for BlockKey {
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

/// 坐标解析器
pub trait KeyResolver {
    fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey;
}

impl<F> KeyResolver for F
where
    F: Fn(u32, u32, u32) -> ResolvedKey,
{
    fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey {
        self(x, y, z)
    }
}

/// 内层坐标 → 本层坐标，落在外面时为 None
pub type PositionMap<'a> = Arc<dyn Fn([u32; 3]) -> Option<[u32; 3]> + 'a>;

/// 网格视图 + 解析器
///
/// 变换返回新的 Pipeline，尺寸可能改变（旋转时宽和长互换）。
/// 方块实体不经过解析器，而是随 `moves` 中的位置映射一起移动。
pub struct Pipeline<'a> {
    dims: Dimensions,
    resolver: Box<dyn KeyResolver + 'a>,
    block_entities: &'a [BlockEntity],
    moves: Vec<PositionMap<'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(dims: Dimensions, resolver: impl KeyResolver + 'a) -> Self {
        Self {
            dims,
            resolver: Box::new(resolver),
            block_entities: &[],
            moves: Vec::new(),
        }
    }

    /// 附带源网格的方块实体
    pub fn with_block_entities(mut self, block_entities: &'a [BlockEntity]) -> Self {
        self.block_entities = block_entities;
        self
    }

    /// 追加一个位置映射，变换改变方块位置时调用
    pub fn moved(mut self, map: impl Fn([u32; 3]) -> Option<[u32; 3]> + 'a) -> Self {
        self.moves.push(Arc::new(map));
        self
    }

    /// 方块实体在本层的位置；被映射到范围外的不返回
    pub fn placed_block_entities(&self) -> Vec<([u32; 3], &'a BlockEntity)> {
        self.block_entities
            .iter()
            .filter_map(|entity| {
                let pos = self
                    .moves
                    .iter()
                    .try_fold(entity.pos, |pos, map| map(pos))?;
                self.dims.contains(pos[0], pos[1], pos[2]).then_some((pos, entity))
            })
            .collect()
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    /// 坐标越界时返回空气
    pub fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey {
        if self.dims.contains(x, y, z) {
            self.resolver.resolve(x, y, z)
        } else {
            BlockKey::air()
        }
    }

    /// 用新的解析器包装当前解析器
    pub fn wrap<F, R>(self, dims: Dimensions, f: F) -> Pipeline<'a>
    where
        F: FnOnce(Box<dyn KeyResolver + 'a>) -> R,
        R: KeyResolver + 'a,
    {
        Pipeline {
            dims,
            resolver: Box::new(f(self.resolver)),
            block_entities: self.block_entities,
            moves: self.moves,
        }
    }

    /// 截取一个子区域，坐标相对于 origin
    pub fn window(&self, origin: [u32; 3], dims: Dimensions) -> Pipeline<'_> {
        let visible = Dimensions::new(
            dims.width.min(self.dims.width.saturating_sub(origin[0])),
            dims.height.min(self.dims.height.saturating_sub(origin[1])),
            dims.length.min(self.dims.length.saturating_sub(origin[2])),
        );
        let parent: &Pipeline<'a> = self;
        let mut moves: Vec<PositionMap<'_>> = self.moves.clone();
        moves.push(Arc::new(move |p: [u32; 3]| {
            Some([
                p[0].checked_sub(origin[0])?,
                p[1].checked_sub(origin[1])?,
                p[2].checked_sub(origin[2])?,
            ])
        }));
        Pipeline {
            moves,
            ..Pipeline::new(visible, move |x: u32, y: u32, z: u32| {
                parent.resolve(x + origin[0], y + origin[1], z + origin[2])
            })
            .with_block_entities(self.block_entities)
        }
    }
}
