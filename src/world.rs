//! Java 存档读取
//!
//! 只索引 `region/r.X.Z.mca`，按需逐个区块解码，
//! 任一时刻内存中只保留一个区块的方块数据。

use crate::error::{ConvertError, Result};
use crate::mca::{is_legacy_region_filename, parse_mca_filename, RegionFile, REGION_CHUNKS};
use crate::model::{BlockEntity, BlockState, Dimensions, PaletteEntry, SourceKind, VoxelGrid};
use crate::nbt::{Compound, CompoundExt, Tag};
use crate::packed::{self, ceil_log2, Layout};
use crate::progress::Progress;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;
use zip::ZipArchive;

/// 从该数据版本（20w17a）起，区块方块数据不再跨 long 存放
pub const PADDED_SINCE_DATA_VERSION: i32 = 2529;

const SECTION_SIZE: usize = 16;
const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;
const AIR_NAMES: [&str; 3] = ["minecraft:air", "minecraft:cave_air", "minecraft:void_air"];

type Archive = ZipArchive<Cursor<Arc<[u8]>>>;

/// 世界坐标中的包围盒（两端都包含）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBox {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl BlockBox {
    /// 由任意两个对角点构造
    pub fn new(a: [i32; 3], b: [i32; 3]) -> Self {
        Self {
            min: [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])],
            max: [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])],
        }
    }

    pub fn dims(&self) -> Dimensions {
        let span = |i: usize| {
            u32::try_from(self.max[i] as i64 - self.min[i] as i64 + 1).unwrap_or(u32::MAX)
        };
        Dimensions::new(span(0), span(1), span(2))
    }

    pub fn contains(&self, p: [i32; 3]) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// 相对于 min 的坐标
    pub fn local(&self, p: [i32; 3]) -> [u32; 3] {
        [
            (p[0] - self.min[0]) as u32,
            (p[1] - self.min[1]) as u32,
            (p[2] - self.min[2]) as u32,
        ]
    }

    fn chunk_contains(&self, cx: i32, cz: i32) -> bool {
        cx >= self.min[0].div_euclid(16)
            && cx <= self.max[0].div_euclid(16)
            && cz >= self.min[2].div_euclid(16)
            && cz <= self.max[2].div_euclid(16)
    }

    fn region_contains(&self, rx: i32, rz: i32) -> bool {
        let r = REGION_CHUNKS as i32 * 16;
        rx >= self.min[0].div_euclid(r)
            && rx <= self.max[0].div_euclid(r)
            && rz >= self.min[2].div_euclid(r)
            && rz <= self.max[2].div_euclid(r)
    }

    /// 与 [lo, lo + 16) 的交集，返回局部范围
    fn clip(&self, axis: usize, lo: i32) -> Option<(usize, usize)> {
        let start = self.min[axis].max(lo);
        let end = self.max[axis].min(lo + SECTION_SIZE as i32 - 1);
        (start <= end).then(|| ((start - lo) as usize, (end - lo + 1) as usize))
    }
}

#[derive(Debug, Clone)]
enum RegionSource {
    Archive(String),
    File(PathBuf),
}

/// 存档中的区域文件索引，键为 (rz, rx)
#[derive(Debug, Clone)]
pub struct RegionSet {
    archive: Option<Arc<[u8]>>,
    regions: BTreeMap<(i32, i32), RegionSource>,
}

/// 路径是否为主世界的 region 目录下的文件
fn overworld_region_file<'a>(components: &[&'a str]) -> Option<&'a str> {
    let (file, dirs) = components.split_last()?;
    if dirs.last() != Some(&"region") || dirs.iter().any(|d| d.starts_with("DIM")) {
        return None;
    }
    Some(*file)
}

fn finish_index(
    archive: Option<Arc<[u8]>>,
    regions: BTreeMap<(i32, i32), RegionSource>,
    legacy: usize,
) -> Result<RegionSet> {
    if regions.is_empty() {
        if legacy > 0 {
            return Err(ConvertError::UnsupportedVersion(format!(
                "存档只包含 {} 个 .mcr 区域文件（Anvil 之前的格式），请先在 Java 版 1.2 以上打开并保存",
                legacy
            )));
        }
        return Err(ConvertError::format("没有找到 region/r.X.Z.mca 区域文件"));
    }
    if legacy > 0 {
        warn!("忽略 {} 个 .mcr 区域文件", legacy);
    }
    info!("找到 {} 个区域文件", regions.len());
    Ok(RegionSet { archive, regions })
}

/// 索引压缩包中的区域文件，不解压任何区块
pub fn load_world_regions(bytes: Vec<u8>) -> Result<RegionSet> {
    let data: Arc<[u8]> = Arc::from(bytes);
    let archive = ZipArchive::new(Cursor::new(data.clone()))?;

    let mut regions = BTreeMap::new();
    let mut legacy = 0;
    for name in archive.file_names() {
        let normalized = name.replace('\\', "/");
        let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();
        let Some(file) = overworld_region_file(&components) else {
            continue;
        };
        if let Some((rx, rz)) = parse_mca_filename(file) {
            if regions.contains_key(&(rz, rx)) {
                warn!("重复的区域文件 {}，已忽略", name);
                continue;
            }
            regions.insert((rz, rx), RegionSource::Archive(name.to_string()));
        } else if is_legacy_region_filename(file) {
            legacy += 1;
        }
    }
    finish_index(Some(data), regions, legacy)
}

/// 索引解压后的存档目录
pub fn load_world_directory(path: &Path) -> Result<RegionSet> {
    if !path.is_dir() {
        return Err(ConvertError::format(format!("不是目录: {}", path.display())));
    }

    let mut regions = BTreeMap::new();
    let mut legacy = 0;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(path) else {
            continue;
        };
        let components: Vec<&str> = relative.iter().filter_map(|c| c.to_str()).collect();
        let Some(file) = overworld_region_file(&components) else {
            continue;
        };
        if let Some((rx, rz)) = parse_mca_filename(file) {
            regions
                .entry((rz, rx))
                .or_insert_with(|| RegionSource::File(entry.path().to_path_buf()));
        } else if is_legacy_region_filename(file) {
            legacy += 1;
        }
    }
    finish_index(None, regions, legacy)
}

impl RegionSet {
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// 区域坐标 (rx, rz)，按 (rz, rx) 排序
    pub fn region_coords(&self) -> Vec<(i32, i32)> {
        self.regions.keys().map(|&(rz, rx)| (rx, rz)).collect()
    }

    fn read_region(&self, archive: &mut Option<Archive>, key: (i32, i32)) -> Result<Vec<u8>> {
        match self.regions.get(&key) {
            Some(RegionSource::File(path)) => Ok(fs::read(path)?),
            Some(RegionSource::Archive(name)) => {
                if archive.is_none() {
                    let data = self
                        .archive
                        .clone()
                        .ok_or_else(|| ConvertError::format("区域索引缺少压缩包数据"))?;
                    *archive = Some(ZipArchive::new(Cursor::new(data))?);
                }
                let zip = archive
                    .as_mut()
                    .ok_or_else(|| ConvertError::format("压缩包未打开"))?;
                let mut file = zip.by_name(name)?;
                let mut out = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut out)?;
                Ok(out)
            }
            None => Err(ConvertError::format(format!(
                "区域 r.{}.{}.mca 不存在",
                key.1, key.0
            ))),
        }
    }
}

/// 流中的一项，坐标为世界绝对坐标
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Block {
        pos: [i32; 3],
        state: Arc<BlockState>,
    },
    BlockEntity {
        pos: [i32; 3],
        id: String,
        data: Compound,
    },
}

/// 一个区块段内待输出的方块
struct SectionCursor {
    origin: [i32; 3],
    palette: Vec<Arc<BlockState>>,
    air: Vec<bool>,
    /// 为空表示整个区块段都是 palette[0]
    indices: Vec<u32>,
    lo: [usize; 3],
    hi: [usize; 3],
    cur: [usize; 3],
    done: bool,
}

impl SectionCursor {
    fn advance(&mut self) {
        self.cur[0] += 1;
        if self.cur[0] < self.hi[0] {
            return;
        }
        self.cur[0] = self.lo[0];
        self.cur[2] += 1;
        if self.cur[2] < self.hi[2] {
            return;
        }
        self.cur[2] = self.lo[2];
        self.cur[1] += 1;
        if self.cur[1] >= self.hi[1] {
            self.done = true;
        }
    }
}

impl Iterator for SectionCursor {
    type Item = StreamItem;

    fn next(&mut self) -> Option<StreamItem> {
        while !self.done {
            let [x, y, z] = self.cur;
            self.advance();
            let idx = if self.indices.is_empty() {
                0
            } else {
                self.indices[(y * SECTION_SIZE + z) * SECTION_SIZE + x] as usize
            };
            if self.air[idx] {
                continue;
            }
            return Some(StreamItem::Block {
                pos: [
                    self.origin[0] + x as i32,
                    self.origin[1] + y as i32,
                    self.origin[2] + z as i32,
                ],
                state: self.palette[idx].clone(),
            });
        }
        None
    }
}

#[derive(Default)]
struct DecodedChunk {
    sections: Vec<SectionCursor>,
    block_entities: Vec<StreamItem>,
}

/// 按调色板大小确定位宽，与实际 long 数交叉校验
fn section_bits(len: usize, palette_len: usize, layout: Layout) -> Result<u32> {
    let expected = ceil_log2(palette_len).max(4);
    if packed::words_needed(SECTION_VOLUME, expected, layout) == len {
        return Ok(expected);
    }
    (ceil_log2(palette_len).max(1)..=32)
        .find(|&bits| packed::words_needed(SECTION_VOLUME, bits, layout) == len)
        .ok_or_else(|| {
            ConvertError::format(format!(
                "区块段数据长度 {} 与调色板大小 {} 不匹配",
                len, palette_len
            ))
        })
}

fn decode_section(
    section: &Compound,
    cx: i32,
    cz: i32,
    layout: Layout,
    bounds: &BlockBox,
) -> Result<Option<SectionCursor>> {
    // 先识别格式，包围盒之外的旧版区块段同样报错
    let (palette, data) = if let Some(states) = section.get_compound("block_states") {
        (states.get_list("palette"), states.get_long_array("data"))
    } else if let Some(palette) = section.get_list("Palette") {
        (Some(palette), section.get_long_array("BlockStates"))
    } else if section.contains_key("Blocks") {
        return Err(ConvertError::UnsupportedVersion(
            "区块使用调色板之前的数字 ID 格式（1.13 之前），请先在新版本中打开并保存存档".to_string(),
        ));
    } else {
        return Ok(None);
    };

    let Some(y) = section.get("Y").and_then(Tag::as_i64) else {
        return Ok(None);
    };
    let section_y = y
        .checked_mul(SECTION_SIZE as i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| {
            ConvertError::format(format!("区块 ({}, {}) 的区块段 Y = {} 无效", cx, cz, y))
        })?;
    let origin = [cx * 16, section_y, cz * 16];
    let (Some(xr), Some(yr), Some(zr)) = (
        bounds.clip(0, origin[0]),
        bounds.clip(1, origin[1]),
        bounds.clip(2, origin[2]),
    ) else {
        return Ok(None);
    };
    let Some(palette) = palette.filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let palette: Vec<Arc<BlockState>> = palette
        .iter()
        .map(|entry| {
            entry
                .as_compound()
                .ok_or_else(|| ConvertError::format("区块调色板条目不是复合标签"))
                .and_then(BlockState::from_nbt)
                .map(Arc::new)
        })
        .collect::<Result<_>>()?;
    let air: Vec<bool> = palette
        .iter()
        .map(|s| AIR_NAMES.contains(&s.name.as_str()))
        .collect();
    if air.iter().all(|&a| a) {
        return Ok(None);
    }

    let indices = match data {
        Some(words) if palette.len() > 1 => {
            let bits = section_bits(words.len(), palette.len(), layout)?;
            let indices = packed::decode(words, SECTION_VOLUME, bits, layout)?;
            if let Some(&bad) = indices.iter().find(|&&i| i as usize >= palette.len()) {
                return Err(ConvertError::format(format!(
                    "区块 ({}, {}) 的调色板索引 {} 越界",
                    cx, cz, bad
                )));
            }
            indices
        }
        None if palette.len() > 1 => {
            return Err(ConvertError::format(format!(
                "区块 ({}, {}) 缺少方块数据",
                cx, cz
            )))
        }
        _ => Vec::new(),
    };

    let lo = [xr.0, yr.0, zr.0];
    let hi = [xr.1, yr.1, zr.1];
    Ok(Some(SectionCursor {
        origin,
        palette,
        air,
        indices,
        lo,
        hi,
        cur: lo,
        done: false,
    }))
}

fn decode_chunk(root: &Compound, cx: i32, cz: i32, bounds: &BlockBox) -> Result<DecodedChunk> {
    let data_version = root.get_int("DataVersion").unwrap_or(0);
    let layout = if data_version >= PADDED_SINCE_DATA_VERSION {
        Layout::Padded
    } else {
        Layout::Continuous
    };

    let (sections, block_entities) = if let Some(sections) = root.get_list("sections") {
        (sections, root.get_list("block_entities"))
    } else if let Some(level) = root.get_compound("Level") {
        match level.get_list("Sections") {
            Some(sections) => (sections, level.get_list("TileEntities")),
            None => return Ok(DecodedChunk::default()),
        }
    } else {
        debug!("区块 ({}, {}) 没有方块数据", cx, cz);
        return Ok(DecodedChunk::default());
    };

    let mut decoded = DecodedChunk::default();
    for section in sections.iter().filter_map(Tag::as_compound) {
        if let Some(cursor) = decode_section(section, cx, cz, layout, bounds)? {
            decoded.sections.push(cursor);
        }
    }
    decoded.sections.sort_by_key(|s| s.origin[1]);

    for entity in block_entities.unwrap_or(&[]).iter().filter_map(Tag::as_compound) {
        let (Some(x), Some(y), Some(z)) =
            (entity.get_int("x"), entity.get_int("y"), entity.get_int("z"))
        else {
            continue;
        };
        let pos = [x, y, z];
        if !bounds.contains(pos) {
            continue;
        }
        let id = entity.get_str("id").unwrap_or_default().to_string();
        let mut data = entity.clone();
        for key in ["x", "y", "z", "id"] {
            data.shift_remove(key);
        }
        decoded
            .block_entities
            .push(StreamItem::BlockEntity { pos, id, data });
    }
    Ok(decoded)
}

struct OpenRegion {
    rx: i32,
    rz: i32,
    file: RegionFile,
    pending: VecDeque<(u8, u8)>,
}

/// 按固定顺序输出包围盒内非空气方块的迭代器
///
/// 顺序: 区域 (z, x) → 区块 (z, x) → 区块段 y 升序 → 方块 (y, z, x)。
/// 出错时输出一次 `Err`，之后结束。
pub struct BlockStream<'a> {
    regions: &'a RegionSet,
    bounds: BlockBox,
    archive: Option<Archive>,
    queue: VecDeque<(i32, i32)>,
    total_regions: usize,
    region: Option<OpenRegion>,
    sections: VecDeque<SectionCursor>,
    current: Option<SectionCursor>,
    entities: VecDeque<StreamItem>,
    progress: Box<dyn FnMut(&Progress) + 'a>,
    chunks_read: usize,
    finished: bool,
}

/// 创建流式读取器，from / to 为包围盒的两个对角（包含）
pub fn create_block_stream_from_world<'a>(
    regions: &'a RegionSet,
    from: [i32; 3],
    to: [i32; 3],
    progress: impl FnMut(&Progress) + 'a,
) -> BlockStream<'a> {
    let bounds = BlockBox::new(from, to);
    let queue: VecDeque<(i32, i32)> = regions
        .regions
        .keys()
        .copied()
        .filter(|&(rz, rx)| bounds.region_contains(rx, rz))
        .collect();
    debug!(
        "包围盒 {:?}..{:?} 涉及 {} 个区域",
        bounds.min,
        bounds.max,
        queue.len()
    );
    BlockStream {
        regions,
        bounds,
        archive: None,
        total_regions: queue.len(),
        queue,
        region: None,
        sections: VecDeque::new(),
        current: None,
        entities: VecDeque::new(),
        progress: Box::new(progress),
        chunks_read: 0,
        finished: false,
    }
}

impl BlockStream<'_> {
    pub fn bounds(&self) -> BlockBox {
        self.bounds
    }

    /// 读入下一个区块；没有更多区块时返回 false
    fn advance_chunk(&mut self) -> Result<bool> {
        loop {
            if let Some(open) = &mut self.region {
                if let Some((lx, lz)) = open.pending.pop_front() {
                    let cx = open.rx * REGION_CHUNKS as i32 + lx as i32;
                    let cz = open.rz * REGION_CHUNKS as i32 + lz as i32;
                    let Some(root) = open.file.read_chunk(lx, lz)? else {
                        continue;
                    };
                    let decoded = decode_chunk(&root, cx, cz, &self.bounds)?;
                    self.chunks_read += 1;
                    self.entities.extend(decoded.block_entities);
                    self.sections.extend(decoded.sections);
                    return Ok(true);
                }
                self.region = None;
            }

            let Some((rz, rx)) = self.queue.pop_front() else {
                return Ok(false);
            };
            let index = self.total_regions - self.queue.len();
            (self.progress)(&Progress::new(
                "读取区域",
                format!("r.{}.{}.mca ({}/{})", rx, rz, index, self.total_regions),
            ));

            let file = RegionFile::parse(self.regions.read_region(&mut self.archive, (rz, rx))?)?;
            let bounds = self.bounds;
            let pending = file
                .present_chunks()
                .into_iter()
                .filter(|&(lx, lz)| {
                    bounds.chunk_contains(
                        rx * REGION_CHUNKS as i32 + lx as i32,
                        rz * REGION_CHUNKS as i32 + lz as i32,
                    )
                })
                .collect();
            self.region = Some(OpenRegion {
                rx,
                rz,
                file,
                pending,
            });
        }
    }
}

impl Iterator for BlockStream<'_> {
    type Item = Result<StreamItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(item) = self.entities.pop_front() {
                return Some(Ok(item));
            }
            if let Some(cursor) = &mut self.current {
                if let Some(item) = cursor.next() {
                    return Some(Ok(item));
                }
                self.current = None;
            }
            if let Some(section) = self.sections.pop_front() {
                self.current = Some(section);
                continue;
            }
            match self.advance_chunk() {
                Ok(true) => continue,
                Ok(false) => {
                    self.finished = true;
                    (self.progress)(&Progress::new(
                        "完成",
                        format!("共读取 {} 个区块", self.chunks_read),
                    ));
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// 把流写入一个稠密网格，未出现的位置为空气
pub fn load_schematic_from_stream(stream: BlockStream<'_>) -> Result<VoxelGrid> {
    let bounds = stream.bounds();
    let dims = bounds.dims();
    let volume = dims.dense_len()?;

    let mut palette = vec![PaletteEntry::State(BlockState::air())];
    let mut lookup: HashMap<Arc<BlockState>, u32> = HashMap::new();
    let mut indices = vec![0u32; volume];
    let mut block_entities = Vec::new();

    for item in stream {
        match item? {
            StreamItem::Block { pos, state } => {
                let idx = match lookup.get(&state) {
                    Some(&idx) => idx,
                    None => {
                        let idx = palette.len() as u32;
                        palette.push(PaletteEntry::State((*state).clone()));
                        lookup.insert(state, idx);
                        idx
                    }
                };
                let [x, y, z] = bounds.local(pos);
                indices[dims.index(x, y, z)] = idx;
            }
            StreamItem::BlockEntity { pos, id, data } => {
                block_entities.push(BlockEntity {
                    pos: bounds.local(pos),
                    id,
                    data,
                });
            }
        }
    }

    debug!("区域 {}: 调色板 {} 项", dims, palette.len());
    let mut grid = VoxelGrid::new(dims, palette, indices, SourceKind::World)?;
    grid.block_entities = block_entities;
    grid.offset = bounds.min;
    Ok(grid)
}
