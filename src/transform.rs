//! 几何变换
//!
//! 每个变换包装内层解析器，返回新的 [`Pipeline`]。
//! 顺序固定: 旋转 → 镜像 → 镂空 → 重力支撑。

use crate::error::{ConvertError, Result};
use crate::model::Dimensions;
use crate::resolver::{BlockKey, KeyResolver, Pipeline, ResolvedKey};
use crate::translation::{TranslationTable, BARRIER};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;

static BARRIER_KEY: Lazy<ResolvedKey> = Lazy::new(|| Arc::new(BlockKey::new(BARRIER)));

/// 镜像轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirrorAxes {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl MirrorAxes {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        !(self.x || self.y || self.z)
    }

    /// 从 "xz" 这样的字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        let mut axes = Self::none();
        for c in s.chars().filter(|c| !c.is_whitespace() && *c != ',') {
            match c.to_ascii_lowercase() {
                'x' => axes.x = true,
                'y' => axes.y = true,
                'z' => axes.z = true,
                _ => return None,
            }
        }
        Some(axes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
    Z,
}

// ============== 属性变换 ==============

const CARDINALS: [&str; 4] = ["north", "east", "south", "west"];

fn rotate_direction(dir: &str, turns: u32) -> Option<&'static str> {
    let i = CARDINALS.iter().position(|c| *c == dir)?;
    Some(CARDINALS[(i + turns as usize) % 4])
}

fn mirror_direction(dir: &str, axis: Axis) -> Option<&'static str> {
    let flipped = match (axis, dir) {
        (Axis::X, "east") => "west",
        (Axis::X, "west") => "east",
        (Axis::Z, "north") => "south",
        (Axis::Z, "south") => "north",
        (Axis::Y, "up") => "down",
        (Axis::Y, "down") => "up",
        _ => return None,
    };
    Some(flipped)
}

/// 铁轨 shape 里的方向词: `south_east`、`ascending_north` 等
fn map_shape(shape: &str, f: impl Fn(&str) -> Option<&'static str>) -> Option<String> {
    let parts: Vec<&str> = shape.split('_').collect();
    if !parts.iter().any(|p| CARDINALS.contains(p)) {
        return None;
    }
    let mut dirs: Vec<&str> = parts.iter().map(|&p| f(p).unwrap_or(p)).collect();
    // 两个方向的形状南北在前: north_south, south_east, north_west
    if dirs.len() == 2 && dirs.iter().all(|d| CARDINALS.contains(d)) {
        let rank = |d: &str| match d {
            "north" => 0,
            "south" => 1,
            "east" => 2,
            _ => 3,
        };
        dirs.sort_by_key(|&d| rank(d));
    }
    Some(dirs.join("_"))
}

fn swap_handedness(value: &str) -> Option<String> {
    if value.contains("left") {
        Some(value.replace("left", "right"))
    } else if value.contains("right") {
        Some(value.replace("right", "left"))
    } else {
        None
    }
}

fn transform_key(
    key: &ResolvedKey,
    f: impl Fn(&str, &str) -> Option<String>,
) -> ResolvedKey {
    if key.properties.is_empty() {
        return key.clone();
    }
    let mut changed = false;
    let properties: BTreeMap<String, String> = key
        .properties
        .iter()
        .map(|(k, v)| match f(k.as_str(), v.as_str()) {
            Some(new) if new != *v => {
                changed = true;
                (k.clone(), new)
            }
            _ => (k.clone(), v.clone()),
        })
        .collect();
    if changed {
        Arc::new(BlockKey::with_properties(key.name.clone(), properties))
    } else {
        key.clone()
    }
}

/// 顺时针旋转 turns 个 90°（俯视）
pub fn rotate_key(key: &ResolvedKey, turns: u32) -> ResolvedKey {
    let turns = turns % 4;
    if turns == 0 {
        return key.clone();
    }
    transform_key(key, |prop, value| match prop {
        "facing" => rotate_direction(value, turns).map(str::to_string),
        "axis" if turns % 2 == 1 => match value {
            "x" => Some("z".to_string()),
            "z" => Some("x".to_string()),
            _ => None,
        },
        "rotation" => value
            .parse::<u32>()
            .ok()
            .map(|r| ((r + 4 * turns) % 16).to_string()),
        "shape" => map_shape(value, |d| rotate_direction(d, turns)),
        _ => None,
    })
}

fn mirror_key(key: &ResolvedKey, axis: Axis) -> ResolvedKey {
    transform_key(key, |prop, value| match (prop, axis) {
        ("facing", _) => mirror_direction(value, axis).map(str::to_string),
        ("rotation", Axis::X) => value.parse::<u32>().ok().map(|r| ((16 - r % 16) % 16).to_string()),
        ("rotation", Axis::Z) => value.parse::<u32>().ok().map(|r| ((24 - r % 16) % 16).to_string()),
        ("half", Axis::Y) => match value {
            "top" => Some("bottom".to_string()),
            "bottom" => Some("top".to_string()),
            "upper" => Some("lower".to_string()),
            "lower" => Some("upper".to_string()),
            _ => None,
        },
        ("type", Axis::Y) => match value {
            "top" => Some("bottom".to_string()),
            "bottom" => Some("top".to_string()),
            _ => None,
        },
        ("shape", Axis::X | Axis::Z) => {
            map_shape(value, |d| mirror_direction(d, axis)).or_else(|| swap_handedness(value))
        }
        ("hinge", Axis::X | Axis::Z) => swap_handedness(value),
        _ => None,
    })
}

// ============== 解析器 ==============

struct Rotated<'a> {
    inner: Box<dyn KeyResolver + 'a>,
    turns: u32,
    src: Dimensions,
}

impl KeyResolver for Rotated<'_> {
    fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey {
        let (w, l) = (self.src.width, self.src.length);
        let (sx, sz) = match self.turns {
            1 => (z, l - 1 - x),
            2 => (w - 1 - x, l - 1 - z),
            3 => (w - 1 - z, x),
            _ => (x, z),
        };
        rotate_key(&self.inner.resolve(sx, y, sz), self.turns)
    }
}

struct Mirrored<'a> {
    inner: Box<dyn KeyResolver + 'a>,
    axes: MirrorAxes,
    dims: Dimensions,
}

impl KeyResolver for Mirrored<'_> {
    fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey {
        let sx = if self.axes.x { self.dims.width - 1 - x } else { x };
        let sy = if self.axes.y { self.dims.height - 1 - y } else { y };
        let sz = if self.axes.z { self.dims.length - 1 - z } else { z };
        let mut key = self.inner.resolve(sx, sy, sz);
        if self.axes.x {
            key = mirror_key(&key, Axis::X);
        }
        if self.axes.y {
            key = mirror_key(&key, Axis::Y);
        }
        if self.axes.z {
            key = mirror_key(&key, Axis::Z);
        }
        key
    }
}

struct Hollowed<'a> {
    inner: Box<dyn KeyResolver + 'a>,
    dims: Dimensions,
}

impl Hollowed<'_> {
    fn solid(&self, x: u32, y: u32, z: u32) -> bool {
        !self.inner.resolve(x, y, z).is_air()
    }
}

impl KeyResolver for Hollowed<'_> {
    fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey {
        let key = self.inner.resolve(x, y, z);
        if key.is_air() {
            return key;
        }
        let d = self.dims;
        let on_boundary = x == 0
            || y == 0
            || z == 0
            || x + 1 >= d.width
            || y + 1 >= d.height
            || z + 1 >= d.length;
        if on_boundary {
            return key;
        }
        let enclosed = self.solid(x - 1, y, z)
            && self.solid(x + 1, y, z)
            && self.solid(x, y - 1, z)
            && self.solid(x, y + 1, z)
            && self.solid(x, y, z - 1)
            && self.solid(x, y, z + 1);
        if enclosed {
            BlockKey::air()
        } else {
            key
        }
    }
}

struct Supported<'a> {
    inner: Box<dyn KeyResolver + 'a>,
    table: &'a TranslationTable,
    dims: Dimensions,
}

impl KeyResolver for Supported<'_> {
    fn resolve(&self, x: u32, y: u32, z: u32) -> ResolvedKey {
        let key = self.inner.resolve(x, y, z);
        if !key.is_air() || y + 1 >= self.dims.height {
            return key;
        }
        if self.table.is_gravity(&self.inner.resolve(x, y + 1, z)) {
            BARRIER_KEY.clone()
        } else {
            key
        }
    }
}

// ============== Pipeline 变换 ==============

/// 按 90° 的倍数顺时针旋转（俯视）
///
/// 90° 和 270° 时宽和长互换。
pub fn apply_rotation(pipeline: Pipeline<'_>, degrees: u32) -> Result<Pipeline<'_>> {
    if degrees % 90 != 0 {
        return Err(ConvertError::Validation(vec![format!(
            "旋转角度必须是 90 的倍数: {}",
            degrees
        )]));
    }
    let turns = (degrees / 90) % 4;
    if turns == 0 {
        return Ok(pipeline);
    }
    let src = pipeline.dims();
    let dims = if turns % 2 == 1 {
        Dimensions::new(src.length, src.height, src.width)
    } else {
        src
    };
    let (w, l) = (src.width, src.length);
    Ok(pipeline
        .wrap(dims, |inner| Rotated { inner, turns, src })
        .moved(move |[sx, y, sz]| {
            let (x, z) = match turns {
                1 => (l.checked_sub(sz + 1)?, sx),
                2 => (w.checked_sub(sx + 1)?, l.checked_sub(sz + 1)?),
                _ => (sz, w.checked_sub(sx + 1)?),
            };
            Some([x, y, z])
        }))
}

/// 沿选定的轴镜像
pub fn apply_mirroring(pipeline: Pipeline<'_>, axes: MirrorAxes) -> Pipeline<'_> {
    if axes.is_none() {
        return pipeline;
    }
    let dims = pipeline.dims();
    let flip = |flipped: bool, v: u32, size: u32| if flipped { size.checked_sub(v + 1) } else { Some(v) };
    pipeline
        .wrap(dims, |inner| Mirrored { inner, axes, dims })
        .moved(move |[x, y, z]| {
            Some([
                flip(axes.x, x, dims.width)?,
                flip(axes.y, y, dims.height)?,
                flip(axes.z, z, dims.length)?,
            ])
        })
}

/// 挖空内部: 六个邻居都不是空气的内部体素变为空气
pub fn hollow_out_schematic(pipeline: Pipeline<'_>) -> Pipeline<'_> {
    let dims = pipeline.dims();
    pipeline.wrap(dims, |inner| Hollowed { inner, dims })
}

/// 在重力方块正下方的空气处放置屏障，防止加载后下落
pub fn add_structure_void_support<'a>(
    pipeline: Pipeline<'a>,
    table: &'a TranslationTable,
) -> Pipeline<'a> {
    let dims = pipeline.dims();
    pipeline.wrap(dims, |inner| Supported { inner, table, dims })
}
