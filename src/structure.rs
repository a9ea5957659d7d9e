//! McStructure 组装与序列化（小端 NBT）

use crate::commands::Operation;
use crate::error::{ConvertError, Result};
use crate::model::BlockEntity;
use crate::nbt::{Compound, NbtCodec, Tag};
use crate::resolver::ResolvedKey;
use crate::translation::{is_waterlogged, BedrockBlock, StateValue, TranslationTable, WATER};
use log::debug;
use std::collections::HashMap;

/// 单个结构的最大宽度和长度
pub const MAX_FOOTPRINT: u32 = 250;

/// 调色板条目的方块版本号（1.18.10）
pub const BLOCK_VERSION: i32 = 17_959_425;

/// 空位（结构中不放置方块）
const VOID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureDims {
    pub width: u32,
    pub height: u32,
    pub length: u32,
    /// `structure_world_origin`
    pub origin: [i32; 3],
}

impl StructureDims {
    pub fn new(width: u32, height: u32, length: u32) -> Self {
        Self {
            width,
            height,
            length,
            origin: [0; 3],
        }
    }

    pub fn volume(&self) -> usize {
        self.width as usize * self.height as usize * self.length as usize
    }

    /// 结构内的索引: x 最外层，z 最内层
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (x as usize * self.height as usize + y as usize) * self.length as usize + z as usize
    }
}

/// 组装好的结构，两层方块索引共享一个调色板
#[derive(Debug, Clone)]
pub struct StructureDocument {
    pub dims: StructureDims,
    pub palette: Vec<BedrockBlock>,
    pub primary: Vec<i32>,
    /// 第二层，含水方块在此放水
    pub overlay: Vec<i32>,
    /// 按方块索引存放的方块实体数据
    pub block_position_data: Compound,
}

impl StructureDocument {
    pub fn block_at(&self, x: u32, y: u32, z: u32) -> Option<&BedrockBlock> {
        let i = self.primary.get(self.dims.index(x, y, z))?;
        usize::try_from(*i).ok().and_then(|i| self.palette.get(i))
    }

    pub fn overlay_at(&self, x: u32, y: u32, z: u32) -> Option<&BedrockBlock> {
        let i = self.overlay.get(self.dims.index(x, y, z))?;
        usize::try_from(*i).ok().and_then(|i| self.palette.get(i))
    }

    /// 写入方块实体，键为方块索引；该位置没有方块时跳过
    pub fn add_block_entities<'e>(
        &mut self,
        entities: impl IntoIterator<Item = ([u32; 3], &'e BlockEntity)>,
    ) -> usize {
        let d = self.dims;
        let mut added = 0;
        for ([x, y, z], entity) in entities {
            if x >= d.width || y >= d.height || z >= d.length {
                continue;
            }
            let index = d.index(x, y, z);
            if self.primary[index] == VOID {
                continue;
            }
            let mut data = entity.data.clone();
            data.insert("id".to_string(), Tag::String(bedrock_entity_id(&entity.id)));
            for (axis, (key, value)) in ["x", "y", "z"].into_iter().zip([x, y, z]).enumerate() {
                let world = d.origin[axis].saturating_add(value as i32);
                data.insert(key.to_string(), Tag::Int(world));
            }
            let mut entry = Compound::new();
            entry.insert("block_entity_data".to_string(), Tag::Compound(data));
            self.block_position_data
                .insert(index.to_string(), Tag::Compound(entry));
            added += 1;
        }
        added
    }
}

/// `minecraft:brewing_stand` → `BrewingStand`
fn bedrock_entity_id(java: &str) -> String {
    let name = java.rsplit(':').next().unwrap_or(java);
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

struct PaletteBuilder {
    blocks: Vec<BedrockBlock>,
    lookup: HashMap<BedrockBlock, i32>,
}

impl PaletteBuilder {
    fn index(&mut self, block: BedrockBlock) -> i32 {
        if let Some(&i) = self.lookup.get(&block) {
            return i;
        }
        let i = self.blocks.len() as i32;
        self.blocks.push(block.clone());
        self.lookup.insert(block, i);
        i
    }
}

/// 把操作列表写入结构
///
/// 宽或长超过 250 时返回 `SizeLimit`，没有操作时返回 `EmptyResult`。
pub fn convert_commands_to_structure(
    ops: &[Operation],
    dims: StructureDims,
    table: &TranslationTable,
) -> Result<StructureDocument> {
    if dims.width > MAX_FOOTPRINT || dims.length > MAX_FOOTPRINT {
        return Err(ConvertError::SizeLimit {
            width: dims.width,
            length: dims.length,
            limit: MAX_FOOTPRINT,
        });
    }
    if ops.is_empty() {
        return Err(ConvertError::EmptyResult("没有生成任何方块".to_string()));
    }

    let mut palette = PaletteBuilder {
        blocks: Vec::new(),
        lookup: HashMap::new(),
    };
    let mut primary = vec![VOID; dims.volume()];
    let mut overlay = vec![VOID; dims.volume()];
    let mut cache: HashMap<&ResolvedKey, (i32, bool)> = HashMap::new();
    let mut water: Option<i32> = None;

    for op in ops {
        let (from, to) = op.bounds();
        if to[0] >= dims.width || to[1] >= dims.height || to[2] >= dims.length {
            return Err(ConvertError::format(format!(
                "操作 {:?}..{:?} 超出结构范围 {}x{}x{}",
                from, to, dims.width, dims.height, dims.length
            )));
        }

        let (index, waterlogged) = *cache.entry(op.key()).or_insert_with(|| {
            let block = table.bedrock_block(op.key());
            (palette.index(block), is_waterlogged(op.key()))
        });
        let water_index = if waterlogged {
            Some(*water.get_or_insert_with(|| palette.index(water_block())))
        } else {
            None
        };

        for x in from[0]..=to[0] {
            for y in from[1]..=to[1] {
                for z in from[2]..=to[2] {
                    let i = dims.index(x, y, z);
                    primary[i] = index;
                    if let Some(w) = water_index {
                        overlay[i] = w;
                    }
                }
            }
        }
    }

    debug!(
        "结构 {}x{}x{}: {} 条操作，调色板 {} 项",
        dims.width,
        dims.height,
        dims.length,
        ops.len(),
        palette.blocks.len()
    );

    Ok(StructureDocument {
        dims,
        palette: palette.blocks,
        primary,
        overlay,
        block_position_data: Compound::new(),
    })
}

fn water_block() -> BedrockBlock {
    BedrockBlock {
        name: WATER.to_string(),
        states: vec![("liquid_depth".to_string(), StateValue::Int(0))],
    }
}

fn state_tag(value: &StateValue) -> Tag {
    match value {
        StateValue::Bool(b) => Tag::Byte(i8::from(*b)),
        StateValue::Int(i) => Tag::Int(*i),
        StateValue::Str(s) => Tag::String(s.clone()),
    }
}

fn palette_tag(block: &BedrockBlock) -> Tag {
    let states: Compound = block
        .states
        .iter()
        .map(|(k, v)| (k.clone(), state_tag(v)))
        .collect();
    let mut entry = Compound::new();
    entry.insert("name".to_string(), Tag::String(block.name.clone()));
    entry.insert("states".to_string(), Tag::Compound(states));
    entry.insert("version".to_string(), Tag::Int(BLOCK_VERSION));
    Tag::Compound(entry)
}

fn int_list(values: impl IntoIterator<Item = i32>) -> Tag {
    Tag::List(values.into_iter().map(Tag::Int).collect())
}

/// 序列化为 .mcstructure 文件内容（小端 NBT，不压缩）
pub fn create_nbt_buffer(doc: &StructureDocument) -> Result<Vec<u8>> {
    let d = doc.dims;

    let mut default = Compound::new();
    default.insert(
        "block_palette".to_string(),
        Tag::List(doc.palette.iter().map(palette_tag).collect()),
    );
    default.insert(
        "block_position_data".to_string(),
        Tag::Compound(doc.block_position_data.clone()),
    );
    let mut palette = Compound::new();
    palette.insert("default".to_string(), Tag::Compound(default));

    let mut structure = Compound::new();
    structure.insert(
        "block_indices".to_string(),
        Tag::List(vec![
            int_list(doc.primary.iter().copied()),
            int_list(doc.overlay.iter().copied()),
        ]),
    );
    structure.insert("entities".to_string(), Tag::List(Vec::new()));
    structure.insert("palette".to_string(), Tag::Compound(palette));

    let mut root = Compound::new();
    root.insert("format_version".to_string(), Tag::Int(1));
    root.insert(
        "size".to_string(),
        int_list([d.width as i32, d.height as i32, d.length as i32]),
    );
    root.insert("structure".to_string(), Tag::Compound(structure));
    root.insert("structure_world_origin".to_string(), int_list(d.origin));

    NbtCodec::bedrock().encode("", &Tag::Compound(root))
}
