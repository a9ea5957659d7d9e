//! Java → Bedrock 方块映射
//!
//! 映射数据编译进二进制（`data/translation.json`），启动时解析一次。
//! 解析顺序: 用户替换规则 → 重命名表 → 同名方块 → 后缀规则 → 默认方块。

use crate::error::{ConvertError, Result};
use crate::model::{BlockState, PaletteEntry, VoxelGrid, AIR};
use crate::resolver::{BlockKey, Pipeline, ResolvedKey};
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

const BUILTIN_DATA: &str = include_str!("../data/translation.json");

static BUILTIN: Lazy<TranslationTable> = Lazy::new(|| {
    TranslationTable::from_json(BUILTIN_DATA).expect("内置方块映射数据无效")
});

pub const BARRIER: &str = "minecraft:barrier";
pub const WATER: &str = "minecraft:water";

/// 参与合并键的 Java 属性，其余属性（powered、distance 等）丢弃
const ORIENTATION_PROPERTIES: &[&str] = &[
    "facing",
    "axis",
    "half",
    "type",
    "shape",
    "hinge",
    "open",
    "rotation",
    "waterlogged",
];

#[derive(Deserialize)]
struct RawTable {
    default_target: String,
    colors: Vec<String>,
    air: Vec<String>,
    gravity: Vec<String>,
    #[serde(default)]
    gravity_colored: Vec<String>,
    directional: Vec<String>,
    rename: HashMap<String, String>,
    #[serde(default)]
    suffix_rename: BTreeMap<String, String>,
    #[serde(default)]
    expand: Vec<Expansion>,
    #[serde(default)]
    legacy_colored: HashMap<String, String>,
    legacy: HashMap<String, String>,
    bedrock_blocks: Vec<String>,
}

#[derive(Deserialize)]
struct Expansion {
    prefixes: Vec<String>,
    suffixes: Vec<String>,
}

/// Bedrock 方块状态值
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateValue {
    Bool(bool),
    Int(i32),
    Str(String),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{}", b),
            StateValue::Int(i) => write!(f, "{}", i),
            StateValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// 映射后的 Bedrock 方块
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BedrockBlock {
    pub name: String,
    pub states: Vec<(String, StateValue)>,
}

impl BedrockBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
        }
    }

    fn push(&mut self, key: &str, value: StateValue) {
        self.states.push((key.to_string(), value));
    }
}

/// 朝向属性的映射方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Stairs,
    Slab,
    Pillar,
    Horizontal,
    Directional,
    Sign,
    Door,
    Trapdoor,
    FenceGate,
    Plain,
}

impl Family {
    /// 该方式会读取的 Java 属性
    fn accepts(self, property: &str) -> bool {
        let accepted: &[&str] = match self {
            Family::Stairs => &["facing", "half", "shape", "waterlogged"],
            Family::Slab => &["type", "waterlogged"],
            Family::Pillar => &["axis"],
            Family::Horizontal | Family::Directional => &["facing", "waterlogged"],
            Family::Sign => &["rotation", "waterlogged"],
            Family::Door => &["facing", "half", "hinge", "open"],
            Family::Trapdoor => &["facing", "half", "open", "waterlogged"],
            Family::FenceGate => &["facing", "open"],
            Family::Plain => &[],
        };
        accepted.contains(&property)
    }
}

/// 带 axis 属性的柱状方块
const PILLAR_SUFFIXES: &[&str] = &[
    "_log",
    "_wood",
    "_stem",
    "_hyphae",
    "_pillar",
    "basalt",
    "hay_block",
    "bone_block",
];

/// 经过校验的替换规则（源 ID → 目标 ID，均已规范化）
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    map: HashMap<String, String>,
}

impl Overrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.map.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// 方块映射表
#[derive(Debug, Clone)]
pub struct TranslationTable {
    default_target: String,
    air: HashSet<String>,
    gravity: HashSet<String>,
    directional: HashSet<String>,
    rename: HashMap<String, String>,
    suffix_rename: Vec<(String, String)>,
    legacy: HashMap<(u16, u8), BlockState>,
    known: HashSet<String>,
}

/// 规范化方块 ID: 去首尾空白、转小写、空白替换为下划线、补全 `minecraft:` 前缀
pub fn normalize_block_id(raw: &str) -> String {
    let id = raw
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    if id.is_empty() || id.contains(':') {
        id
    } else {
        format!("minecraft:{}", id)
    }
}

fn parse_legacy_key(key: &str) -> Result<(u16, u8)> {
    let bad = || ConvertError::format(format!("旧版 ID 格式错误: {}", key));
    match key.split_once(':') {
        Some((id, data)) => Ok((
            id.parse().map_err(|_| bad())?,
            data.parse().map_err(|_| bad())?,
        )),
        None => Ok((key.parse().map_err(|_| bad())?, 0)),
    }
}

impl TranslationTable {
    /// 内置映射表
    pub fn builtin() -> &'static TranslationTable {
        &BUILTIN
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawTable = serde_json::from_str(json)
            .map_err(|e| ConvertError::format(format!("映射数据解析失败: {}", e)))?;

        let mut known: HashSet<String> = raw.bedrock_blocks.into_iter().collect();
        for expansion in &raw.expand {
            for prefix in &expansion.prefixes {
                for suffix in &expansion.suffixes {
                    known.insert(format!("minecraft:{}_{}", prefix, suffix));
                }
            }
        }

        let mut gravity: HashSet<String> = raw.gravity.into_iter().collect();
        for suffix in &raw.gravity_colored {
            for color in &raw.colors {
                gravity.insert(format!("minecraft:{}_{}", color, suffix));
            }
        }

        let mut legacy = HashMap::new();
        for (key, value) in &raw.legacy {
            legacy.insert(parse_legacy_key(key)?, BlockState::parse(value)?);
        }
        for (id, suffix) in &raw.legacy_colored {
            let id: u16 = id
                .parse()
                .map_err(|_| ConvertError::format(format!("旧版 ID 格式错误: {}", id)))?;
            for (data, color) in raw.colors.iter().enumerate() {
                legacy.insert(
                    (id, data as u8),
                    BlockState::new(format!("minecraft:{}_{}", color, suffix)),
                );
            }
        }

        // 长后缀优先
        let mut suffix_rename: Vec<(String, String)> = raw.suffix_rename.into_iter().collect();
        suffix_rename.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let table = Self {
            default_target: normalize_block_id(&raw.default_target),
            air: raw.air.into_iter().collect(),
            gravity,
            directional: raw.directional.into_iter().collect(),
            rename: raw.rename,
            suffix_rename,
            legacy,
            known,
        };
        if !table.is_known(&table.default_target) {
            return Err(ConvertError::format(format!(
                "默认方块不存在: {}",
                table.default_target
            )));
        }
        debug!(
            "映射表: {} 个已知方块, {} 条重命名, {} 条旧版 ID",
            table.known.len(),
            table.rename.len(),
            table.legacy.len()
        );
        Ok(table)
    }

    /// 替换未知方块时使用的默认方块
    pub fn with_default_target(mut self, target: &str) -> Result<Self> {
        let target = normalize_block_id(target);
        if !self.is_known(&target) {
            return Err(ConvertError::Validation(vec![format!(
                "默认方块 {} 不是有效的 Bedrock 方块",
                target
            )]));
        }
        self.default_target = target;
        Ok(self)
    }

    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    /// 已规范化的 ID 是否为已知的 Bedrock 方块
    pub fn is_known(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    /// 任意写法的 ID 是否有效
    pub fn is_valid_block_id(&self, raw: &str) -> bool {
        let id = normalize_block_id(raw);
        !id.is_empty() && self.is_known(&id)
    }

    /// 校验替换规则，所有无效目标汇总到一个错误中
    pub fn validate_overrides<I, S, T>(&self, rules: I) -> Result<Overrides>
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut map = HashMap::new();
        let mut errors = Vec::new();
        for (source, target) in rules {
            let (source_raw, target_raw) = (source.as_ref(), target.as_ref());
            let source = normalize_block_id(source_raw);
            let target = normalize_block_id(target_raw);
            if source.is_empty() && target.is_empty() {
                continue;
            }
            if source.is_empty() {
                errors.push(format!("替换为 \"{}\" 的规则缺少源方块", target_raw.trim()));
                continue;
            }
            if !self.is_known(&target) {
                errors.push(format!(
                    "{} → \"{}\": 目标不是有效的 Bedrock 方块",
                    source,
                    target_raw.trim()
                ));
                continue;
            }
            map.insert(source, target);
        }
        if !errors.is_empty() {
            return Err(ConvertError::Validation(errors));
        }
        Ok(Overrides { map })
    }

    /// 经典格式的数字 ID 对应的方块状态
    pub fn legacy_state(&self, id: u16, data: u8) -> Option<&BlockState> {
        self.legacy
            .get(&(id, data))
            .or_else(|| self.legacy.get(&(id, 0)))
    }

    fn destination(&self, source: &str) -> Option<String> {
        if let Some(target) = self.rename.get(source) {
            return Some(target.clone());
        }
        if self.is_known(source) {
            return Some(source.to_string());
        }
        self.suffix_rename.iter().find_map(|(from, to)| {
            let base = source.strip_suffix(from.as_str())?;
            let candidate = format!("{}{}", base, to);
            self.is_known(&candidate).then_some(candidate)
        })
    }

    /// Java 方块状态 → 合并键
    pub fn resolve_state(&self, state: &BlockState, overrides: &Overrides) -> BlockKey {
        let source = normalize_block_id(&state.name);
        if self.air.contains(&source) {
            return BlockKey::new(AIR);
        }

        let properties: BTreeMap<String, String> = state
            .properties
            .iter()
            .filter(|(k, _)| ORIENTATION_PROPERTIES.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(target) = overrides.get(&source) {
            // 只保留目标方块能表达的朝向属性
            let family = self.name_family(target);
            let properties = properties
                .into_iter()
                .filter(|(k, _)| family.is_some_and(|f| f.accepts(k)))
                .collect();
            return BlockKey::with_properties(target, properties);
        }
        match self.destination(&source) {
            Some(name) => BlockKey::with_properties(name, properties),
            None => {
                warn!("未知方块 {}，替换为 {}", source, self.default_target);
                BlockKey::new(self.default_target.clone())
            }
        }
    }

    /// 调色板条目 → 合并键
    pub fn resolve_entry(&self, entry: &PaletteEntry, overrides: &Overrides) -> BlockKey {
        match entry {
            PaletteEntry::State(state) => self.resolve_state(state, overrides),
            PaletteEntry::Legacy { id, data } => match self.legacy_state(*id, *data) {
                Some(state) => self.resolve_state(state, overrides),
                None => {
                    warn!("未知旧版方块 {}:{}，替换为 {}", id, data, self.default_target);
                    BlockKey::new(self.default_target.clone())
                }
            },
        }
    }

    pub fn is_gravity(&self, key: &BlockKey) -> bool {
        self.gravity.contains(&key.name)
    }

    /// 仅凭方块 ID 就能确定的映射方式
    fn name_family(&self, name: &str) -> Option<Family> {
        let family = if name.contains("trapdoor") {
            Family::Trapdoor
        } else if name.ends_with("_door") {
            Family::Door
        } else if name.ends_with("fence_gate") {
            Family::FenceGate
        } else if name.ends_with("_stairs") {
            Family::Stairs
        } else if name.ends_with("_slab") {
            Family::Slab
        } else if self.directional.contains(name) || name.ends_with("_wall_sign") {
            Family::Directional
        } else if name.ends_with("standing_sign") {
            Family::Sign
        } else if PILLAR_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            Family::Pillar
        } else {
            return None;
        };
        Some(family)
    }

    fn family(&self, key: &BlockKey) -> Family {
        if let Some(family) = self.name_family(&key.name) {
            family
        } else if key.properties.contains_key("axis") {
            Family::Pillar
        } else if key.properties.contains_key("rotation") {
            Family::Sign
        } else if key.properties.contains_key("facing") {
            Family::Horizontal
        } else {
            Family::Plain
        }
    }

    /// 合并键 → Bedrock 方块名与状态
    pub fn bedrock_block(&self, key: &BlockKey) -> BedrockBlock {
        let mut block = BedrockBlock::new(key.name.clone());
        let facing = key.property("facing");
        let flag = |prop: &str, value: &str| StateValue::Bool(key.property(prop) == Some(value));

        match self.family(key) {
            Family::Stairs => {
                if let Some(d) = facing.and_then(weirdo_direction) {
                    block.push("weirdo_direction", StateValue::Int(d));
                }
                block.push("upside_down_bit", flag("half", "top"));
            }
            Family::Slab => {
                let half = match key.property("type") {
                    Some("double") => {
                        block.name = double_slab_name(&key.name);
                        "bottom"
                    }
                    Some("top") => "top",
                    _ => "bottom",
                };
                block.push("minecraft:vertical_half", StateValue::Str(half.to_string()));
            }
            Family::Pillar => {
                if let Some(axis) = key.property("axis") {
                    block.push("pillar_axis", StateValue::Str(axis.to_string()));
                }
            }
            Family::Sign => {
                if let Some(r) = key.property("rotation").and_then(|r| r.parse::<i32>().ok()) {
                    block.push("ground_sign_direction", StateValue::Int(r.rem_euclid(16)));
                }
            }
            Family::Directional => {
                if let Some(d) = facing.and_then(facing_direction) {
                    block.push("facing_direction", StateValue::Int(d));
                }
            }
            Family::Horizontal => {
                if let Some(f) = facing.filter(|f| is_cardinal(f)) {
                    block.push("minecraft:cardinal_direction", StateValue::Str(f.to_string()));
                }
            }
            Family::Trapdoor => {
                if let Some(d) = facing.and_then(weirdo_direction) {
                    block.push("direction", StateValue::Int(d));
                }
                block.push("open_bit", flag("open", "true"));
                block.push("upside_down_bit", flag("half", "top"));
            }
            Family::Door => {
                if let Some(d) = facing.and_then(door_direction) {
                    block.push("direction", StateValue::Int(d));
                }
                block.push("door_hinge_bit", flag("hinge", "right"));
                block.push("open_bit", flag("open", "true"));
                block.push("upper_block_bit", flag("half", "upper"));
            }
            Family::FenceGate => {
                if let Some(d) = facing.and_then(gate_direction) {
                    block.push("direction", StateValue::Int(d));
                }
                block.push("open_bit", flag("open", "true"));
            }
            Family::Plain => {}
        }
        block
    }
}

/// 含水方块需要在第二层放水
pub fn is_waterlogged(key: &BlockKey) -> bool {
    key.property("waterlogged") == Some("true")
}

pub(crate) fn is_cardinal(facing: &str) -> bool {
    matches!(facing, "north" | "east" | "south" | "west")
}

fn weirdo_direction(facing: &str) -> Option<i32> {
    match facing {
        "east" => Some(0),
        "west" => Some(1),
        "south" => Some(2),
        "north" => Some(3),
        _ => None,
    }
}

fn facing_direction(facing: &str) -> Option<i32> {
    match facing {
        "down" => Some(0),
        "up" => Some(1),
        "north" => Some(2),
        "south" => Some(3),
        "west" => Some(4),
        "east" => Some(5),
        _ => None,
    }
}

fn door_direction(facing: &str) -> Option<i32> {
    match facing {
        "east" => Some(0),
        "south" => Some(1),
        "west" => Some(2),
        "north" => Some(3),
        _ => None,
    }
}

fn gate_direction(facing: &str) -> Option<i32> {
    match facing {
        "south" => Some(0),
        "west" => Some(1),
        "north" => Some(2),
        "east" => Some(3),
        _ => None,
    }
}

fn double_slab_name(name: &str) -> String {
    match name.strip_suffix("_slab") {
        Some(base) => format!("{}_double_slab", base),
        None => name.to_string(),
    }
}

/// 为网格建立最内层解析器
///
/// 每个调色板条目只解析一次，相同的键共享同一个 `Arc`。
pub fn make_merge_key_getter<'g>(
    grid: &'g VoxelGrid,
    table: &TranslationTable,
    overrides: &Overrides,
) -> Pipeline<'g> {
    let mut interned: HashMap<BlockKey, ResolvedKey> = HashMap::new();
    let keys: Vec<ResolvedKey> = grid
        .palette()
        .iter()
        .map(|entry| {
            let key = table.resolve_entry(entry, overrides);
            if key.is_air() {
                return BlockKey::air();
            }
            interned
                .entry(key.clone())
                .or_insert_with(|| Arc::new(key))
                .clone()
        })
        .collect();
    debug!("调色板 {} 项 → {} 个合并键", keys.len(), interned.len());

    let air = BlockKey::air();
    Pipeline::new(grid.dims(), move |x: u32, y: u32, z: u32| {
        keys.get(grid.palette_index(x, y, z) as usize)
            .cloned()
            .unwrap_or_else(|| air.clone())
    })
    .with_block_entities(&grid.block_entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dimensions, SourceKind};

    fn table() -> &'static TranslationTable {
        TranslationTable::builtin()
    }

    fn key(s: &str) -> BlockKey {
        let state = BlockState::parse(s).unwrap();
        BlockKey::with_properties(state.name, state.properties)
    }

    #[test]
    fn normalizes_user_input() {
        assert_eq!(normalize_block_id("  Oak Planks "), "minecraft:oak_planks");
        assert_eq!(normalize_block_id("STONE"), "minecraft:stone");
        assert_eq!(normalize_block_id("mod:Thing"), "mod:thing");
        assert_eq!(normalize_block_id("  "), "");
    }

    #[test]
    fn builtin_renames_point_to_known_blocks() {
        let t = table();
        for target in t.rename.values() {
            assert!(t.is_known(target), "{} 不在已知方块中", target);
        }
        for state in t.legacy.values() {
            let resolved = t.resolve_state(state, &Overrides::none());
            assert!(
                state.name == t.default_target() || resolved.name != t.default_target(),
                "旧版方块 {} 没有映射",
                state
            );
        }
        assert!(t.is_known(BARRIER));
        assert!(t.is_known(WATER));
    }

    #[test]
    fn legacy_lookup_falls_back_to_data_zero() {
        let t = table();
        assert_eq!(t.legacy_state(35, 14).unwrap().name, "minecraft:red_wool");
        let log = t.legacy_state(17, 4).unwrap();
        assert_eq!(log.properties.get("axis").map(String::as_str), Some("x"));
        assert_eq!(t.legacy_state(17, 12).unwrap().name, "minecraft:oak_log");
        assert!(t.legacy_state(4000, 0).is_none());
    }

    #[test]
    fn resolution_order() {
        let t = table();
        let none = Overrides::none();
        assert!(t.resolve_state(&BlockState::new("minecraft:cave_air"), &none).is_air());
        assert_eq!(
            t.resolve_state(&BlockState::new("minecraft:dirt_path"), &none).name,
            "minecraft:grass_path"
        );
        assert_eq!(
            t.resolve_state(&BlockState::new("minecraft:spruce_sign"), &none).name,
            "minecraft:spruce_standing_sign"
        );
        assert_eq!(
            t.resolve_state(&BlockState::new("minecraft:no_such_block"), &none).name,
            t.default_target()
        );

        let overrides = t
            .validate_overrides([("dirt path", "diamond_block")])
            .unwrap();
        assert_eq!(
            t.resolve_state(&BlockState::new("minecraft:dirt_path"), &overrides).name,
            "minecraft:diamond_block"
        );
    }

    #[test]
    fn overrides_keep_only_target_properties() {
        let t = table();
        let overrides = t
            .validate_overrides([
                ("oak_stairs", "stone"),
                ("birch_stairs", "spruce_stairs"),
                ("oak_log", "stone"),
            ])
            .unwrap();
        let stairs = BlockState::parse("minecraft:oak_stairs[facing=east,half=top,waterlogged=true]").unwrap();
        let stone = t.resolve_state(&stairs, &overrides);
        assert_eq!(stone.name, "minecraft:stone");
        assert!(stone.properties.is_empty());
        assert!(t.bedrock_block(&stone).states.is_empty());

        let birch = BlockState::parse("minecraft:birch_stairs[facing=east,half=top]").unwrap();
        let spruce = t.resolve_state(&birch, &overrides);
        assert_eq!(spruce.name, "minecraft:spruce_stairs");
        assert_eq!(spruce.property("facing"), Some("east"));
        assert_eq!(spruce.property("half"), Some("top"));

        let log = BlockState::parse("minecraft:oak_log[axis=x]").unwrap();
        assert!(t.resolve_state(&log, &overrides).properties.is_empty());
    }

    #[test]
    fn irrelevant_properties_are_dropped() {
        let state = BlockState::new("minecraft:oak_leaves")
            .with_property("distance", "3")
            .with_property("persistent", "true");
        let key = table().resolve_state(&state, &Overrides::none());
        assert!(key.properties.is_empty());
    }

    #[test]
    fn validation_reports_only_invalid_rules() {
        let err = table()
            .validate_overrides([
                ("minecraft:stone", "minecraft:diamond_block"),
                ("minecraft:dirt", "minecraft:not_a_block"),
            ])
            .unwrap_err();
        match err {
            ConvertError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("not_a_block"));
                assert!(!errors[0].contains("diamond_block"));
            }
            other => panic!("意外的错误: {:?}", other),
        }
    }

    #[test]
    fn validation_aggregates_all_errors() {
        let err = table()
            .validate_overrides([("a", "bogus_one"), ("b", "bogus_two"), ("", "")])
            .unwrap_err();
        assert!(matches!(err, ConvertError::Validation(ref e) if e.len() == 2));
        assert!(err.to_string().contains("bogus_one"));
        assert!(err.to_string().contains("bogus_two"));
    }

    #[test]
    fn default_target_must_be_known() {
        let t = table().clone();
        assert!(t.clone().with_default_target("minecraft:nope").is_err());
        let t = t.with_default_target("Glass").unwrap();
        assert_eq!(t.default_target(), "minecraft:glass");
    }

    #[test]
    fn stairs_states() {
        let block = table().bedrock_block(&key("minecraft:oak_stairs[facing=north,half=top]"));
        assert_eq!(block.name, "minecraft:oak_stairs");
        assert_eq!(
            block.states,
            vec![
                ("weirdo_direction".to_string(), StateValue::Int(3)),
                ("upside_down_bit".to_string(), StateValue::Bool(true)),
            ]
        );
    }

    #[test]
    fn slab_states() {
        let t = table();
        let double = t.bedrock_block(&key("minecraft:oak_slab[type=double]"));
        assert_eq!(double.name, "minecraft:oak_double_slab");
        let top = t.bedrock_block(&key("minecraft:oak_slab[type=top]"));
        assert_eq!(
            top.states,
            vec![(
                "minecraft:vertical_half".to_string(),
                StateValue::Str("top".to_string())
            )]
        );
    }

    #[test]
    fn orientation_families() {
        let t = table();
        let log = t.bedrock_block(&key("minecraft:oak_log[axis=z]"));
        assert_eq!(log.states[0], ("pillar_axis".to_string(), StateValue::Str("z".to_string())));

        let observer = t.bedrock_block(&key("minecraft:observer[facing=up]"));
        assert_eq!(observer.states[0], ("facing_direction".to_string(), StateValue::Int(1)));

        let furnace = t.bedrock_block(&key("minecraft:furnace[facing=west]"));
        assert_eq!(
            furnace.states[0],
            (
                "minecraft:cardinal_direction".to_string(),
                StateValue::Str("west".to_string())
            )
        );

        let sign = t.bedrock_block(&key("minecraft:standing_sign[rotation=12]"));
        assert_eq!(sign.states[0], ("ground_sign_direction".to_string(), StateValue::Int(12)));

        let door = t.bedrock_block(&key("minecraft:wooden_door[facing=north,half=upper,hinge=right,open=false]"));
        assert!(door.states.contains(&("direction".to_string(), StateValue::Int(3))));
        assert!(door.states.contains(&("upper_block_bit".to_string(), StateValue::Bool(true))));
        assert!(door.states.contains(&("door_hinge_bit".to_string(), StateValue::Bool(true))));

        assert!(t.bedrock_block(&key("minecraft:stone")).states.is_empty());
    }

    #[test]
    fn state_value_rendering() {
        assert_eq!(StateValue::Bool(true).to_string(), "true");
        assert_eq!(StateValue::Int(3).to_string(), "3");
        assert_eq!(StateValue::Str("top".into()).to_string(), "\"top\"");
    }

    #[test]
    fn gravity_blocks() {
        let t = table();
        assert!(t.is_gravity(&BlockKey::new("minecraft:sand")));
        assert!(t.is_gravity(&BlockKey::new("minecraft:lime_concrete_powder")));
        assert!(!t.is_gravity(&BlockKey::new("minecraft:stone")));
    }

    #[test]
    fn merge_key_getter_shares_keys() {
        let palette = vec![
            PaletteEntry::State(BlockState::air()),
            PaletteEntry::State(BlockState::new("minecraft:stone")),
            PaletteEntry::State(BlockState::new("minecraft:stone").with_property("powered", "true")),
            PaletteEntry::Legacy { id: 1, data: 0 },
        ];
        let grid = VoxelGrid::new(
            Dimensions::new(4, 1, 1),
            palette,
            vec![0, 1, 2, 3],
            SourceKind::Classic,
        )
        .unwrap();
        let pipeline = make_merge_key_getter(&grid, table(), &Overrides::none());
        assert!(pipeline.resolve(0, 0, 0).is_air());
        let a = pipeline.resolve(1, 0, 0);
        let b = pipeline.resolve(2, 0, 0);
        let c = pipeline.resolve(3, 0, 0);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
    }
}
