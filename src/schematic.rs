//! 建筑文件读取: 经典 .schematic、Sponge v2 / v3、Litematica
//!
//! 另可把任意网格导出为 Sponge v2 `.schem`。

use crate::error::{ConvertError, Result};
use crate::model::{
    BlockEntity, BlockState, Dimensions, Entity, PaletteEntry, SourceKind, VoxelGrid,
};
use crate::nbt::{Compound, CompoundExt, NbtCodec, Tag};
use crate::packed::{self, bits_for_palette, Layout};
use crate::translation::TranslationTable;
use log::{debug, info, warn};
use std::collections::HashMap;

/// 读取建筑文件（可以是 gzip 压缩的），按文件名和内容识别格式
pub fn load_schematic(bytes: &[u8], filename: &str) -> Result<VoxelGrid> {
    let root = NbtCodec::java().decode_compound(bytes)?;
    let lower = filename.to_lowercase();

    let grid = if lower.ends_with(".litematic") || root.contains_key("Regions") {
        read_litematic(&root)?
    } else if let Some(inner) = root.get_compound("Schematic") {
        // 少数工具把 v2 也包在 Schematic 里
        if inner.get_int("Version") == Some(3) || inner.contains_key("Blocks") {
            read_sponge_v3(inner)?
        } else {
            read_sponge_v2(inner)?
        }
    } else if root.get_int("Version") == Some(3) && root.contains_key("Blocks") {
        read_sponge_v3(&root)?
    } else if root.contains_key("Palette") || root.contains_key("BlockData") {
        read_sponge_v2(&root)?
    } else if root.contains_key("Blocks") {
        read_classic(&root)?
    } else {
        return Err(ConvertError::format(format!(
            "无法识别的建筑文件格式: {}",
            filename
        )));
    };

    info!(
        "读取 {} ({:?}): {}，调色板 {} 项",
        filename,
        grid.source,
        grid.dims(),
        grid.palette().len()
    );
    Ok(grid)
}

// ============== 通用字段 ==============

fn read_dimension(root: &Compound, key: &str) -> Result<u32> {
    let value = match root.get(key) {
        // Sponge 以无符号 short 存放尺寸
        Some(Tag::Short(v)) => *v as u16 as u32,
        Some(tag) => tag
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ConvertError::format(format!("{} 不是有效的尺寸", key)))?,
        None => return Err(ConvertError::format(format!("缺少 {}", key))),
    };
    if value == 0 {
        return Err(ConvertError::format(format!("{} 为 0", key)));
    }
    Ok(value)
}

fn read_dims(root: &Compound) -> Result<Dimensions> {
    Ok(Dimensions::new(
        read_dimension(root, "Width")?,
        read_dimension(root, "Height")?,
        read_dimension(root, "Length")?,
    ))
}

fn read_offset(root: &Compound) -> [i32; 3] {
    match root.get_int_array("Offset") {
        Some(&[x, y, z, ..]) => [x, y, z],
        _ => [0; 3],
    }
}

/// 加上偏移后的方块实体坐标必须落在网格内
fn block_entity_pos(dims: Dimensions, pos: [i64; 3]) -> Result<[u32; 3]> {
    let local = |v: i64| u32::try_from(v).ok();
    match (local(pos[0]), local(pos[1]), local(pos[2])) {
        (Some(x), Some(y), Some(z)) if dims.contains(x, y, z) => Ok([x, y, z]),
        _ => Err(ConvertError::format(format!(
            "方块实体坐标 {:?} 不在 {} 范围内",
            pos, dims
        ))),
    }
}

/// `Pos` 为 IntArray 的方块实体（Sponge）；缺少坐标或 ID 的条目忽略
fn sponge_block_entity(
    tag: &Compound,
    dims: Dimensions,
    shift: [i64; 3],
) -> Result<Option<BlockEntity>> {
    let (pos, id) = match (tag.get_int_array("Pos"), tag.get_str("Id").or_else(|| tag.get_str("id"))) {
        (Some(&[x, y, z]), Some(id)) => (
            [x as i64 + shift[0], y as i64 + shift[1], z as i64 + shift[2]],
            id.to_string(),
        ),
        _ => {
            debug!("忽略缺少 Pos 或 Id 的方块实体");
            return Ok(None);
        }
    };
    let pos = block_entity_pos(dims, pos)?;
    let data = match tag.get_compound("Data") {
        Some(data) => data.clone(),
        None => {
            let mut data = tag.clone();
            for key in ["Pos", "Id", "id"] {
                data.shift_remove(key);
            }
            data
        }
    };
    Ok(Some(BlockEntity { pos, id, data }))
}

/// `x` / `y` / `z` 为整数字段的方块实体（经典格式、Litematica）
fn flat_block_entity(
    tag: &Compound,
    dims: Dimensions,
    shift: [i64; 3],
) -> Result<Option<BlockEntity>> {
    let (Some(x), Some(y), Some(z)) = (tag.get_int("x"), tag.get_int("y"), tag.get_int("z")) else {
        debug!("忽略缺少坐标的方块实体");
        return Ok(None);
    };
    let pos = block_entity_pos(
        dims,
        [x as i64 + shift[0], y as i64 + shift[1], z as i64 + shift[2]],
    )?;
    let id = tag.get_str("id").or_else(|| tag.get_str("Id")).unwrap_or_default().to_string();
    let mut data = tag.clone();
    for key in ["x", "y", "z", "id", "Id"] {
        data.shift_remove(key);
    }
    Ok(Some(BlockEntity { pos, id, data }))
}

/// 读取方块实体列表，任一坐标越界即失败
fn block_entities<'a>(
    tags: impl Iterator<Item = &'a Compound>,
    read: impl Fn(&Compound) -> Result<Option<BlockEntity>>,
) -> Result<Vec<BlockEntity>> {
    let mut out = Vec::new();
    for tag in tags {
        if let Some(entity) = read(tag)? {
            out.push(entity);
        }
    }
    Ok(out)
}

fn entity(tag: &Compound, shift: [f64; 3]) -> Option<Entity> {
    let pos = tag.get_list("Pos")?;
    let coord = |i: usize| match pos.get(i) {
        Some(Tag::Double(v)) => Some(*v),
        Some(Tag::Float(v)) => Some(*v as f64),
        _ => None,
    };
    let pos = [coord(0)? + shift[0], coord(1)? + shift[1], coord(2)? + shift[2]];
    let id = tag.get_str("Id").or_else(|| tag.get_str("id"))?.to_string();
    Some(Entity {
        pos,
        id,
        data: tag.clone(),
    })
}

fn compounds<'a>(root: &'a Compound, key: &str) -> impl Iterator<Item = &'a Compound> {
    root.get_list(key)
        .unwrap_or(&[])
        .iter()
        .filter_map(Tag::as_compound)
}

// ============== 经典 .schematic ==============

fn read_classic(root: &Compound) -> Result<VoxelGrid> {
    let dims = read_dims(root)?;
    let blocks = root
        .get_byte_array("Blocks")
        .ok_or_else(|| ConvertError::format("Blocks 不是字节数组"))?;
    let volume = dims.volume() as usize;

    if blocks.is_empty() {
        warn!("建筑文件没有方块数据");
        return VoxelGrid::new(dims, Vec::new(), Vec::new(), SourceKind::Classic);
    }
    if blocks.len() != volume {
        return Err(ConvertError::format(format!(
            "Blocks 长度 {} 与尺寸 {} 不符",
            blocks.len(),
            dims
        )));
    }

    let data = root.get_byte_array("Data").unwrap_or(&[]);
    let add = root.get_byte_array("AddBlocks").unwrap_or(&[]);

    let mut palette = Vec::new();
    let mut lookup: HashMap<(u16, u8), u32> = HashMap::new();
    let mut indices = Vec::with_capacity(volume);
    for (i, &b) in blocks.iter().enumerate() {
        let high = match add.get(i >> 1) {
            // 偶数索引取高半字节
            Some(&a) if i & 1 == 0 => ((a as u8) >> 4) & 0x0f,
            Some(&a) => (a as u8) & 0x0f,
            None => 0,
        };
        let id = (u16::from(high) << 8) | u16::from(b as u8);
        let meta = data.get(i).map(|&d| (d as u8) & 0x0f).unwrap_or(0);
        let idx = *lookup.entry((id, meta)).or_insert_with(|| {
            palette.push(PaletteEntry::Legacy { id, data: meta });
            (palette.len() - 1) as u32
        });
        indices.push(idx);
    }

    let mut grid = VoxelGrid::new(dims, palette, indices, SourceKind::Classic)?;
    grid.block_entities = block_entities(compounds(root, "TileEntities"), |t| {
        flat_block_entity(t, dims, [0; 3])
    })?;
    grid.entities = compounds(root, "Entities")
        .filter_map(|t| entity(t, [0.0; 3]))
        .collect();
    grid.offset = [
        root.get_int("WEOffsetX").unwrap_or(0),
        root.get_int("WEOffsetY").unwrap_or(0),
        root.get_int("WEOffsetZ").unwrap_or(0),
    ];
    Ok(grid)
}

// ============== Sponge ==============

/// 解码 varint 序列
fn read_varints(bytes: &[i8], expected: usize) -> Result<Vec<u32>> {
    // 尺寸来自文件，预分配不超过实际字节数
    let mut values = Vec::with_capacity(expected.min(bytes.len()));
    let mut value: u32 = 0;
    let mut shift = 0;
    for &b in bytes {
        let b = b as u8;
        if shift >= 32 {
            return Err(ConvertError::format("BlockData 中的 varint 过长"));
        }
        value |= u32::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            values.push(value);
            value = 0;
            shift = 0;
        } else {
            shift += 7;
        }
    }
    if shift != 0 {
        return Err(ConvertError::format("BlockData 在 varint 中间截断"));
    }
    Ok(values)
}

/// Sponge 调色板: 方块状态字符串 → 索引
fn read_sponge_palette(palette: &Compound) -> Result<Vec<PaletteEntry>> {
    let mut entries: Vec<Option<PaletteEntry>> = Vec::new();
    for (state, index) in palette {
        let index = index
            .as_i64()
            .and_then(|i| usize::try_from(i).ok())
            .ok_or_else(|| ConvertError::format(format!("调色板索引无效: {}", state)))?;
        if index >= entries.len() {
            entries.resize(index + 1, None);
        }
        entries[index] = Some(PaletteEntry::State(BlockState::parse(state)?));
    }
    if entries.iter().any(Option::is_none) {
        debug!("调色板索引不连续，空位按空气处理");
    }
    Ok(entries
        .into_iter()
        .map(|e| e.unwrap_or_else(|| PaletteEntry::State(BlockState::air())))
        .collect())
}

fn sponge_blocks(
    palette: Option<&Compound>,
    data: Option<&[i8]>,
    dims: Dimensions,
) -> Result<(Vec<PaletteEntry>, Vec<u32>)> {
    let palette = match palette {
        Some(p) => read_sponge_palette(p)?,
        None => Vec::new(),
    };
    let data = data.unwrap_or(&[]);
    if data.is_empty() {
        warn!("建筑文件没有方块数据");
        return Ok((palette, Vec::new()));
    }
    let indices = read_varints(data, dims.dense_len()?)?;
    if indices.len() as u64 != dims.volume() {
        return Err(ConvertError::format(format!(
            "BlockData 含 {} 个方块，尺寸 {} 需要 {}",
            indices.len(),
            dims,
            dims.volume()
        )));
    }
    Ok((palette, indices))
}

fn read_sponge_v2(root: &Compound) -> Result<VoxelGrid> {
    let dims = read_dims(root)?;
    let (palette, indices) = sponge_blocks(
        root.get_compound("Palette"),
        root.get_byte_array("BlockData"),
        dims,
    )?;
    let mut grid = VoxelGrid::new(dims, palette, indices, SourceKind::SpongeV2)?;
    // v1 使用 TileEntities
    grid.block_entities = block_entities(
        compounds(root, "BlockEntities").chain(compounds(root, "TileEntities")),
        |t| sponge_block_entity(t, dims, [0; 3]),
    )?;
    grid.entities = compounds(root, "Entities")
        .filter_map(|t| entity(t, [0.0; 3]))
        .collect();
    grid.offset = read_offset(root);
    grid.data_version = root.get_int("DataVersion");
    Ok(grid)
}

fn read_sponge_v3(root: &Compound) -> Result<VoxelGrid> {
    let dims = read_dims(root)?;
    let blocks = root.get_compound("Blocks");
    let (palette, indices) = sponge_blocks(
        blocks.and_then(|b| b.get_compound("Palette")),
        blocks.and_then(|b| b.get_byte_array("Data")),
        dims,
    )?;
    let mut grid = VoxelGrid::new(dims, palette, indices, SourceKind::SpongeV3)?;
    if let Some(blocks) = blocks {
        grid.block_entities = block_entities(compounds(blocks, "BlockEntities"), |t| {
            sponge_block_entity(t, dims, [0; 3])
        })?;
    }
    grid.entities = compounds(root, "Entities")
        .filter_map(|t| entity(t, [0.0; 3]))
        .collect();
    grid.offset = read_offset(root);
    grid.data_version = root.get_int("DataVersion");
    Ok(grid)
}

// ============== Litematica ==============

fn read_vec3(tag: Option<&Compound>, what: &str) -> Result<[i32; 3]> {
    let tag = tag.ok_or_else(|| ConvertError::format(format!("缺少 {}", what)))?;
    let get = |k: &str| {
        tag.get_int(k)
            .ok_or_else(|| ConvertError::format(format!("{} 缺少 {}", what, k)))
    };
    Ok([get("x")?, get("y")?, get("z")?])
}

struct LitematicRegion<'a> {
    name: &'a str,
    /// 世界坐标中的最小角
    origin: [i64; 3],
    dims: Dimensions,
    tag: &'a Compound,
}

fn litematic_region<'a>(name: &'a str, tag: &'a Compound) -> Result<LitematicRegion<'a>> {
    let position = read_vec3(tag.get_compound("Position"), "Position")?;
    let size = read_vec3(tag.get_compound("Size"), "Size")?;
    if size.contains(&0) {
        return Err(ConvertError::format(format!("区域 {} 的尺寸为 0", name)));
    }
    // 负尺寸表示区域从 Position 向负方向延伸
    let origin = [0, 1, 2].map(|i| {
        let (p, s) = (i64::from(position[i]), i64::from(size[i]));
        if s < 0 {
            p + s + 1
        } else {
            p
        }
    });
    let dims = Dimensions::new(
        size[0].unsigned_abs(),
        size[1].unsigned_abs(),
        size[2].unsigned_abs(),
    );
    Ok(LitematicRegion {
        name,
        origin,
        dims,
        tag,
    })
}

fn read_litematic(root: &Compound) -> Result<VoxelGrid> {
    let regions_tag = root
        .get_compound("Regions")
        .ok_or_else(|| ConvertError::format("Litematica 文件缺少 Regions"))?;
    let regions: Vec<LitematicRegion> = regions_tag
        .iter()
        .filter_map(|(name, tag)| tag.as_compound().map(|t| (name, t)))
        .map(|(name, tag)| litematic_region(name, tag))
        .collect::<Result<_>>()?;
    if regions.is_empty() {
        return Err(ConvertError::format("Litematica 文件没有区域"));
    }

    // 所有区域的包围盒，i64 中计算，坐标必须落在 i32 范围内
    let mut min = regions[0].origin;
    let mut max = [i64::MIN; 3];
    for r in &regions {
        let extent = [r.dims.width, r.dims.height, r.dims.length];
        for i in 0..3 {
            min[i] = min[i].min(r.origin[i]);
            max[i] = max[i].max(r.origin[i] + i64::from(extent[i]) - 1);
        }
    }
    let coord = |v: i64| {
        i32::try_from(v).map_err(|_| ConvertError::format(format!("Litematica 区域坐标 {} 越界", v)))
    };
    let mut offset = [0i32; 3];
    let mut span = [0u32; 3];
    for i in 0..3 {
        offset[i] = coord(min[i])?;
        coord(max[i])?;
        span[i] = u32::try_from(max[i] - min[i] + 1)
            .map_err(|_| ConvertError::format("Litematica 区域跨度过大"))?;
    }
    let dims = Dimensions::new(span[0], span[1], span[2]);

    let mut palette = vec![PaletteEntry::State(BlockState::air())];
    let mut lookup: HashMap<BlockState, u32> = HashMap::new();
    let mut indices = vec![0u32; dims.dense_len()?];
    let mut tile_entities = Vec::new();
    let mut entities = Vec::new();
    let mut any_data = false;

    for region in &regions {
        let shift = [0, 1, 2].map(|i| region.origin[i] - min[i]);
        let region_palette: Vec<BlockState> = compounds(region.tag, "BlockStatePalette")
            .map(BlockState::from_nbt)
            .collect::<Result<_>>()?;
        let states = region.tag.get_long_array("BlockStates").unwrap_or(&[]);
        if region_palette.is_empty() || states.is_empty() {
            warn!("区域 {} 没有方块数据", region.name);
            continue;
        }
        any_data = true;

        let count = region.dims.volume() as usize;
        let bits = bits_for_palette(region_palette.len());
        let values = packed::decode(states, count, bits, Layout::Continuous)?;

        // 区域调色板 → 合并后的调色板；空气为 None，不覆盖其他区域
        let mapping: Vec<Option<u32>> = region_palette
            .iter()
            .map(|state| {
                if state.name == "minecraft:air" {
                    return None;
                }
                Some(*lookup.entry(state.clone()).or_insert_with(|| {
                    palette.push(PaletteEntry::State(state.clone()));
                    (palette.len() - 1) as u32
                }))
            })
            .collect();

        let rd = region.dims;
        for y in 0..rd.height {
            for z in 0..rd.length {
                for x in 0..rd.width {
                    let value = values[rd.index(x, y, z)] as usize;
                    let target = mapping.get(value).ok_or_else(|| {
                        ConvertError::format(format!(
                            "区域 {} 的调色板索引 {} 越界",
                            region.name, value
                        ))
                    })?;
                    if let Some(idx) = target {
                        let gx = x + shift[0] as u32;
                        let gy = y + shift[1] as u32;
                        let gz = z + shift[2] as u32;
                        indices[dims.index(gx, gy, gz)] = *idx;
                    }
                }
            }
        }

        tile_entities.extend(block_entities(compounds(region.tag, "TileEntities"), |t| {
            flat_block_entity(t, dims, shift)
        })?);
        let fshift = shift.map(|s| s as f64);
        entities.extend(compounds(region.tag, "Entities").filter_map(|t| entity(t, fshift)));
    }

    debug!("Litematica: {} 个区域合并为 {}", regions.len(), dims);
    let indices = if any_data { indices } else { Vec::new() };
    let mut grid = VoxelGrid::new(dims, palette, indices, SourceKind::Litematic)?;
    grid.block_entities = tile_entities;
    grid.entities = entities;
    grid.offset = offset;
    grid.data_version = root.get_int("MinecraftDataVersion");
    Ok(grid)
}

// ============== Sponge v2 导出 ==============

/// 文件未记录数据版本时写入的版本（1.17.1）
pub const DEFAULT_DATA_VERSION: i32 = 2730;

fn write_varint(out: &mut Vec<i8>, mut value: u32) {
    while value & !0x7f != 0 {
        out.push(((value & 0x7f) | 0x80) as u8 as i8);
        value >>= 7;
    }
    out.push(value as u8 as i8);
}

fn sponge_dimension(value: u32, key: &str) -> Result<Tag> {
    // 按无符号 short 存放
    u16::try_from(value)
        .map(|v| Tag::Short(v as i16))
        .map_err(|_| ConvertError::format(format!("{} = {} 超出 Sponge 格式上限 65535", key, value)))
}

/// 把网格写成 gzip 压缩的 Sponge v2 `.schem`
///
/// 经典格式的数字 ID 经翻译表换成方块状态，无法换算时失败。
pub fn write_sponge_schematic(grid: &VoxelGrid, table: &TranslationTable) -> Result<Vec<u8>> {
    if !grid.has_data() {
        return Err(ConvertError::EmptyResult("网格中没有方块数据".to_string()));
    }
    let dims = grid.dims();
    let sizes = [
        ("Width", sponge_dimension(dims.width, "Width")?),
        ("Height", sponge_dimension(dims.height, "Height")?),
        ("Length", sponge_dimension(dims.length, "Length")?),
    ];

    // 调色板条目可能换算成同一个状态，重新编号
    let mut palette = Compound::new();
    let mut remap = Vec::with_capacity(grid.palette().len());
    for entry in grid.palette() {
        let state = match entry {
            PaletteEntry::State(state) => state.to_string(),
            PaletteEntry::Legacy { id, data } => table
                .legacy_state(*id, *data)
                .map(ToString::to_string)
                .ok_or_else(|| ConvertError::format(format!("无法换算旧版方块 {}:{}", id, data)))?,
        };
        let next = palette.len() as i32;
        let index = match palette.get(&state) {
            Some(Tag::Int(i)) => *i,
            _ => {
                palette.insert(state, Tag::Int(next));
                next
            }
        };
        remap.push(index as u32);
    }

    let mut block_data = Vec::with_capacity(dims.dense_len()?);
    for y in 0..dims.height {
        for z in 0..dims.length {
            for x in 0..dims.width {
                write_varint(&mut block_data, remap[grid.palette_index(x, y, z) as usize]);
            }
        }
    }

    let block_entities = grid
        .block_entities
        .iter()
        .map(|be| {
            let mut tag = Compound::new();
            tag.insert(
                "Pos".to_string(),
                Tag::IntArray(be.pos.iter().map(|&v| v as i32).collect()),
            );
            tag.insert("Id".to_string(), Tag::String(be.id.clone()));
            for (k, v) in &be.data {
                tag.insert(k.clone(), v.clone());
            }
            Tag::Compound(tag)
        })
        .collect();
    let entities = grid
        .entities
        .iter()
        .map(|e| {
            let mut tag = e.data.clone();
            tag.insert("Pos".to_string(), Tag::List(e.pos.iter().map(|&v| Tag::Double(v)).collect()));
            tag.insert("Id".to_string(), Tag::String(e.id.clone()));
            tag.shift_remove("id");
            Tag::Compound(tag)
        })
        .collect();

    let mut metadata = Compound::new();
    for (key, value) in ["WEOffsetX", "WEOffsetY", "WEOffsetZ"].iter().zip(grid.offset) {
        metadata.insert(key.to_string(), Tag::Int(value));
    }

    let mut root = Compound::new();
    root.insert("Version".to_string(), Tag::Int(2));
    root.insert(
        "DataVersion".to_string(),
        Tag::Int(grid.data_version.unwrap_or(DEFAULT_DATA_VERSION)),
    );
    for (key, tag) in sizes {
        root.insert(key.to_string(), tag);
    }
    root.insert("PaletteMax".to_string(), Tag::Int(palette.len() as i32));
    root.insert("Palette".to_string(), Tag::Compound(palette));
    root.insert("BlockData".to_string(), Tag::ByteArray(block_data));
    root.insert("BlockEntities".to_string(), Tag::List(block_entities));
    root.insert("Entities".to_string(), Tag::List(entities));
    root.insert("Offset".to_string(), Tag::IntArray(grid.offset.to_vec()));
    root.insert("Metadata".to_string(), Tag::Compound(metadata));

    debug!(
        "导出 Sponge v2: {}，调色板 {} 项，{} 个方块实体",
        dims,
        root.get_int("PaletteMax").unwrap_or(0),
        grid.block_entities.len()
    );
    NbtCodec::java().encode_gzip("Schematic", &Tag::Compound(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(map: &mut Compound, key: &str, tag: Tag) {
        map.insert(key.to_string(), tag);
    }

    fn encode(root: Compound) -> Vec<u8> {
        NbtCodec::java().encode_gzip("", &Tag::Compound(root)).unwrap()
    }

    fn state_name(grid: &VoxelGrid, x: u32, y: u32, z: u32) -> String {
        match grid.entry_at(x, y, z) {
            Some(PaletteEntry::State(s)) => s.to_string(),
            Some(PaletteEntry::Legacy { id, data }) => format!("{}:{}", id, data),
            None => "<none>".to_string(),
        }
    }

    fn varints(values: &[u32]) -> Vec<i8> {
        let mut out = Vec::new();
        for &v in values {
            let mut v = v;
            loop {
                let b = (v & 0x7f) as u8;
                v >>= 7;
                if v == 0 {
                    out.push(b as i8);
                    break;
                }
                out.push((b | 0x80) as i8);
            }
        }
        out
    }

    #[test]
    fn classic_schematic() {
        let mut root = Compound::new();
        put(&mut root, "Width", Tag::Short(3));
        put(&mut root, "Height", Tag::Short(1));
        put(&mut root, "Length", Tag::Short(1));
        put(&mut root, "Materials", Tag::String("Alpha".into()));
        // 第三个方块 id = 0x101（偶数索引取 AddBlocks 高半字节）
        put(&mut root, "Blocks", Tag::ByteArray(vec![1, 35, 1]));
        put(&mut root, "Data", Tag::ByteArray(vec![0, 14, 0]));
        put(&mut root, "AddBlocks", Tag::ByteArray(vec![0x00, 0x10]));
        let mut chest = Compound::new();
        put(&mut chest, "id", Tag::String("Chest".into()));
        put(&mut chest, "x", Tag::Int(1));
        put(&mut chest, "y", Tag::Int(0));
        put(&mut chest, "z", Tag::Int(0));
        put(&mut root, "TileEntities", Tag::List(vec![Tag::Compound(chest)]));

        let grid = load_schematic(&encode(root), "house.schematic").unwrap();
        assert_eq!(grid.source, SourceKind::Classic);
        assert_eq!(grid.dims(), Dimensions::new(3, 1, 1));
        assert_eq!(state_name(&grid, 0, 0, 0), "1:0");
        assert_eq!(state_name(&grid, 1, 0, 0), "35:14");
        assert_eq!(state_name(&grid, 2, 0, 0), "257:0");
        assert_eq!(grid.block_entities.len(), 1);
        assert_eq!(grid.block_entities[0].pos, [1, 0, 0]);
    }

    #[test]
    fn classic_without_blocks_has_no_data() {
        let mut root = Compound::new();
        put(&mut root, "Width", Tag::Short(2));
        put(&mut root, "Height", Tag::Short(2));
        put(&mut root, "Length", Tag::Short(2));
        put(&mut root, "Blocks", Tag::ByteArray(vec![]));
        let grid = load_schematic(&encode(root), "empty.schematic").unwrap();
        assert!(!grid.has_data());
    }

    #[test]
    fn classic_length_mismatch_fails() {
        let mut root = Compound::new();
        put(&mut root, "Width", Tag::Short(2));
        put(&mut root, "Height", Tag::Short(1));
        put(&mut root, "Length", Tag::Short(1));
        put(&mut root, "Blocks", Tag::ByteArray(vec![1]));
        assert!(matches!(
            load_schematic(&encode(root), "bad.schematic"),
            Err(ConvertError::Format(_))
        ));
    }

    #[test]
    fn sponge_v2_with_multibyte_varints() {
        let mut palette = Compound::new();
        for i in 0..200 {
            put(&mut palette, &format!("minecraft:block_{}", i), Tag::Int(i));
        }
        put(&mut palette, "minecraft:oak_stairs[facing=east,half=top]", Tag::Int(200));

        let mut root = Compound::new();
        put(&mut root, "Version", Tag::Int(2));
        put(&mut root, "Width", Tag::Short(2));
        put(&mut root, "Height", Tag::Short(1));
        put(&mut root, "Length", Tag::Short(2));
        put(&mut root, "PaletteMax", Tag::Int(201));
        put(&mut root, "Palette", Tag::Compound(palette));
        put(&mut root, "BlockData", Tag::ByteArray(varints(&[0, 150, 200, 7])));
        put(&mut root, "Offset", Tag::IntArray(vec![-3, 64, 10]));
        let mut sign = Compound::new();
        put(&mut sign, "Id", Tag::String("minecraft:sign".into()));
        put(&mut sign, "Pos", Tag::IntArray(vec![1, 0, 1]));
        put(&mut root, "BlockEntities", Tag::List(vec![Tag::Compound(sign)]));

        let grid = load_schematic(&encode(root), "build.schem").unwrap();
        assert_eq!(grid.source, SourceKind::SpongeV2);
        assert_eq!(state_name(&grid, 1, 0, 0), "minecraft:block_150");
        assert_eq!(
            state_name(&grid, 0, 0, 1),
            "minecraft:oak_stairs[facing=east,half=top]"
        );
        assert_eq!(state_name(&grid, 1, 0, 1), "minecraft:block_7");
        assert_eq!(grid.offset, [-3, 64, 10]);
        assert_eq!(grid.block_entities[0].id, "minecraft:sign");
    }

    #[test]
    fn sponge_v3_nested_root() {
        let mut palette = Compound::new();
        put(&mut palette, "minecraft:air", Tag::Int(0));
        put(&mut palette, "minecraft:stone", Tag::Int(1));
        let mut blocks = Compound::new();
        put(&mut blocks, "Palette", Tag::Compound(palette));
        put(&mut blocks, "Data", Tag::ByteArray(varints(&[1, 0, 0, 1])));
        let mut inner = Compound::new();
        put(&mut inner, "Version", Tag::Int(3));
        put(&mut inner, "Width", Tag::Short(1));
        put(&mut inner, "Height", Tag::Short(2));
        put(&mut inner, "Length", Tag::Short(2));
        put(&mut inner, "Blocks", Tag::Compound(blocks));
        let mut root = Compound::new();
        put(&mut root, "Schematic", Tag::Compound(inner));

        let grid = load_schematic(&encode(root), "v3.schem").unwrap();
        assert_eq!(grid.source, SourceKind::SpongeV3);
        assert_eq!(state_name(&grid, 0, 0, 0), "minecraft:stone");
        assert_eq!(state_name(&grid, 0, 0, 1), "minecraft:air");
        assert_eq!(state_name(&grid, 0, 1, 1), "minecraft:stone");
    }

    #[test]
    fn truncated_varint_fails() {
        assert!(read_varints(&[0x80u8 as i8], 1).is_err());
        assert!(read_varints(&[-1, -1, -1, -1, -1, 1], 1).is_err());
        assert_eq!(read_varints(&varints(&[300, 1]), 2).unwrap(), vec![300, 1]);
    }

    fn region_tag(
        position: [i32; 3],
        size: [i32; 3],
        palette: &[&str],
        values: &[u32],
    ) -> Tag {
        let vec3 = |v: [i32; 3]| {
            let mut c = Compound::new();
            put(&mut c, "x", Tag::Int(v[0]));
            put(&mut c, "y", Tag::Int(v[1]));
            put(&mut c, "z", Tag::Int(v[2]));
            Tag::Compound(c)
        };
        let mut region = Compound::new();
        put(&mut region, "Position", vec3(position));
        put(&mut region, "Size", vec3(size));
        put(
            &mut region,
            "BlockStatePalette",
            Tag::List(
                palette
                    .iter()
                    .map(|s| BlockState::parse(s).unwrap().to_nbt())
                    .collect(),
            ),
        );
        let bits = bits_for_palette(palette.len());
        let words = packed::encode(values, bits, Layout::Continuous).unwrap();
        put(&mut region, "BlockStates", Tag::LongArray(words));
        Tag::Compound(region)
    }

    fn litematic(regions: Vec<(&str, Tag)>) -> Vec<u8> {
        let mut map = Compound::new();
        for (name, tag) in regions {
            put(&mut map, name, tag);
        }
        let mut root = Compound::new();
        put(&mut root, "Version", Tag::Int(6));
        put(&mut root, "Regions", Tag::Compound(map));
        encode(root)
    }

    #[test]
    fn litematic_negative_size() {
        // 尺寸 (-2, 1, 1) 从 x = 5 向负方向延伸: 覆盖 x = 4..=5
        let bytes = litematic(vec![(
            "main",
            region_tag([5, 0, 0], [-2, 1, 1], &["minecraft:air", "minecraft:stone"], &[1, 0]),
        )]);
        let grid = load_schematic(&bytes, "a.litematic").unwrap();
        assert_eq!(grid.source, SourceKind::Litematic);
        assert_eq!(grid.dims(), Dimensions::new(2, 1, 1));
        assert_eq!(grid.offset, [4, 0, 0]);
        assert_eq!(state_name(&grid, 0, 0, 0), "minecraft:stone");
        assert_eq!(state_name(&grid, 1, 0, 0), "minecraft:air");
    }

    #[test]
    fn litematic_many_palette_entries_straddle_longs() {
        // 5 位索引跨 long 边界
        let palette: Vec<String> = (0..20).map(|i| format!("minecraft:b{}", i)).collect();
        let refs: Vec<&str> = palette.iter().map(String::as_str).collect();
        let values: Vec<u32> = (0..40).map(|i| i % 20).collect();
        let bytes = litematic(vec![("r", region_tag([0, 0, 0], [40, 1, 1], &refs, &values))]);
        let grid = load_schematic(&bytes, "wide.litematic").unwrap();
        for x in 0..40 {
            assert_eq!(state_name(&grid, x, 0, 0), format!("minecraft:b{}", x % 20));
        }
    }

    #[test]
    fn litematic_regions_are_composited() {
        let bytes = litematic(vec![
            (
                "a",
                region_tag([0, 0, 0], [2, 1, 1], &["minecraft:air", "minecraft:stone"], &[1, 1]),
            ),
            (
                "b",
                region_tag([3, 0, 2], [1, 1, 1], &["minecraft:glass"], &[0]),
            ),
        ]);
        let grid = load_schematic(&bytes, "multi.litematic").unwrap();
        assert_eq!(grid.dims(), Dimensions::new(4, 1, 3));
        assert_eq!(state_name(&grid, 1, 0, 0), "minecraft:stone");
        assert_eq!(state_name(&grid, 3, 0, 2), "minecraft:glass");
        assert_eq!(state_name(&grid, 2, 0, 1), "minecraft:air");
    }

    #[test]
    fn litematic_extreme_positions_fail() {
        let stone = ["minecraft:stone"];
        let past_max = litematic(vec![("r", region_tag([i32::MAX, 0, 0], [2, 1, 1], &stone, &[0, 0]))]);
        assert!(matches!(
            load_schematic(&past_max, "far.litematic"),
            Err(ConvertError::Format(_))
        ));

        let far_apart = litematic(vec![
            ("a", region_tag([-2_000_000_000, 0, 0], [1, 1, 1], &stone, &[0])),
            ("b", region_tag([2_000_000_000, 0, 0], [1, 1, 1], &stone, &[0])),
        ]);
        assert!(matches!(
            load_schematic(&far_apart, "apart.litematic"),
            Err(ConvertError::Format(_))
        ));

        let below_min = litematic(vec![("r", region_tag([i32::MIN, 0, 0], [-2, 1, 1], &stone, &[0, 0]))]);
        assert!(matches!(
            load_schematic(&below_min, "low.litematic"),
            Err(ConvertError::Format(_))
        ));
    }

    #[test]
    fn block_entity_outside_grid_fails() {
        let mut palette = Compound::new();
        put(&mut palette, "minecraft:chest", Tag::Int(0));
        let mut chest = Compound::new();
        put(&mut chest, "Id", Tag::String("minecraft:chest".into()));
        put(&mut chest, "Pos", Tag::IntArray(vec![0, -1, 0]));
        let mut root = Compound::new();
        put(&mut root, "Version", Tag::Int(2));
        put(&mut root, "Width", Tag::Short(1));
        put(&mut root, "Height", Tag::Short(1));
        put(&mut root, "Length", Tag::Short(1));
        put(&mut root, "Palette", Tag::Compound(palette));
        put(&mut root, "BlockData", Tag::ByteArray(varints(&[0])));
        put(&mut root, "BlockEntities", Tag::List(vec![Tag::Compound(chest)]));
        assert!(matches!(
            load_schematic(&encode(root), "chest.schem"),
            Err(ConvertError::Format(_))
        ));

        // 区域偏移之后仍在网格外
        let mut sign = Compound::new();
        put(&mut sign, "id", Tag::String("minecraft:sign".into()));
        put(&mut sign, "x", Tag::Int(1));
        put(&mut sign, "y", Tag::Int(0));
        put(&mut sign, "z", Tag::Int(0));
        let Tag::Compound(mut region) = region_tag([0, 0, 0], [1, 1, 1], &["minecraft:stone"], &[0]) else {
            unreachable!()
        };
        put(&mut region, "TileEntities", Tag::List(vec![Tag::Compound(sign)]));
        let bytes = litematic(vec![("r", Tag::Compound(region))]);
        assert!(matches!(
            load_schematic(&bytes, "sign.litematic"),
            Err(ConvertError::Format(_))
        ));
    }

    #[test]
    fn litematic_exports_to_sponge_v2() {
        // 只有用到的状态进入合并后的调色板
        let names: Vec<String> = (0..200).map(|i| format!("minecraft:block_{}", i)).collect();
        let mut palette: Vec<&str> = vec!["minecraft:air"];
        palette.extend(names.iter().map(String::as_str));
        let Tag::Compound(mut a) = region_tag([5, 60, -2], [2, 1, 1], &palette, &[150, 3]) else {
            unreachable!()
        };
        let mut chest = Compound::new();
        put(&mut chest, "id", Tag::String("minecraft:chest".into()));
        put(&mut chest, "x", Tag::Int(1));
        put(&mut chest, "y", Tag::Int(0));
        put(&mut chest, "z", Tag::Int(0));
        put(&mut chest, "Items", Tag::List(vec![]));
        put(&mut a, "TileEntities", Tag::List(vec![Tag::Compound(chest)]));
        let b = region_tag([5, 61, -1], [1, 1, 1], &["minecraft:oak_stairs[facing=east,half=top]"], &[0]);

        let mut regions = Compound::new();
        put(&mut regions, "a", Tag::Compound(a));
        put(&mut regions, "b", b);
        let mut root = Compound::new();
        put(&mut root, "Version", Tag::Int(6));
        put(&mut root, "MinecraftDataVersion", Tag::Int(3465));
        put(&mut root, "Regions", Tag::Compound(regions));
        let source = load_schematic(&encode(root), "house.litematic").unwrap();

        let bytes = write_sponge_schematic(&source, TranslationTable::builtin()).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b], "输出应为 gzip");
        let (name, tag) = NbtCodec::java().decode(&bytes).unwrap();
        assert_eq!(name, "Schematic");
        let raw = tag.as_compound().unwrap();
        assert_eq!(raw.get_int("Version"), Some(2));
        assert_eq!(raw.get_int("DataVersion"), Some(3465));
        assert_eq!(raw.get("Width"), Some(&Tag::Short(2)));
        assert_eq!(raw.get("Height"), Some(&Tag::Short(2)));
        assert_eq!(raw.get("Length"), Some(&Tag::Short(2)));
        assert_eq!(raw.get_int("PaletteMax"), Some(4));

        let grid = load_schematic(&bytes, "house.schem").unwrap();
        assert_eq!(grid.source, SourceKind::SpongeV2);
        assert_eq!(grid.dims(), source.dims());
        assert_eq!(grid.offset, [5, 60, -2]);
        assert_eq!(grid.data_version, Some(3465));
        for y in 0..2 {
            for z in 0..2 {
                for x in 0..2 {
                    assert_eq!(
                        state_name(&grid, x, y, z),
                        state_name(&source, x, y, z),
                        "({}, {}, {}) 不一致",
                        x,
                        y,
                        z
                    );
                }
            }
        }
        assert_eq!(state_name(&grid, 0, 0, 0), "minecraft:block_149");
        assert_eq!(
            state_name(&grid, 0, 1, 1),
            "minecraft:oak_stairs[facing=east,half=top]"
        );
        assert_eq!(grid.block_entities, source.block_entities);
        assert_eq!(grid.block_entities[0].pos, [1, 0, 0]);
        assert!(grid.block_entities[0].data.contains_key("Items"));
    }

    #[test]
    fn sponge_export_resolves_legacy_ids() {
        let palette = vec![
            PaletteEntry::Legacy { id: 35, data: 14 },
            PaletteEntry::State(BlockState::parse("minecraft:red_wool").unwrap()),
        ];
        let grid = VoxelGrid::new(Dimensions::new(2, 1, 1), palette, vec![0, 1], SourceKind::Classic)
            .unwrap();
        let bytes = write_sponge_schematic(&grid, TranslationTable::builtin()).unwrap();
        let back = load_schematic(&bytes, "wool.schem").unwrap();
        // 两个条目换算后相同，合并为一项
        assert_eq!(back.palette().len(), 1);
        assert_eq!(state_name(&back, 1, 0, 0), "minecraft:red_wool");
        assert_eq!(back.data_version, Some(DEFAULT_DATA_VERSION));

        let unknown = VoxelGrid::new(
            Dimensions::new(1, 1, 1),
            vec![PaletteEntry::Legacy { id: 4000, data: 0 }],
            vec![0],
            SourceKind::Classic,
        )
        .unwrap();
        assert!(matches!(
            write_sponge_schematic(&unknown, TranslationTable::builtin()),
            Err(ConvertError::Format(_))
        ));
    }

    #[test]
    fn sponge_export_rejects_oversized_and_empty_grids() {
        let stone = vec![PaletteEntry::State(BlockState::parse("minecraft:stone").unwrap())];
        let wide = VoxelGrid::new(Dimensions::new(65536, 1, 1), stone.clone(), vec![0; 65536], SourceKind::SpongeV2)
            .unwrap();
        assert!(matches!(
            write_sponge_schematic(&wide, TranslationTable::builtin()),
            Err(ConvertError::Format(_))
        ));
        let empty = VoxelGrid::new(Dimensions::new(1, 1, 1), stone, Vec::new(), SourceKind::SpongeV2).unwrap();
        assert!(matches!(
            write_sponge_schematic(&empty, TranslationTable::builtin()),
            Err(ConvertError::EmptyResult(_))
        ));
    }

    #[test]
    fn unknown_format_fails() {
        let mut root = Compound::new();
        put(&mut root, "Something", Tag::Int(1));
        assert!(matches!(
            load_schematic(&encode(root), "x.nbt"),
            Err(ConvertError::Format(_))
        ));
        assert!(load_schematic(b"\x1f\x8b garbage", "x.schem").is_err());
    }
}
