//! 贪心合并的 fill / setblock 命令生成

use crate::resolver::{BlockKey, Pipeline, ResolvedKey};
use crate::translation::{BedrockBlock, TranslationTable};
use log::debug;
use std::collections::HashMap;

/// 单条 fill 命令最多覆盖的方块数
pub const MAX_FILL_VOLUME: u64 = 32768;

/// 渲染命令时使用的坐标形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordMode {
    /// `~x ~y ~z`，相对执行位置
    #[default]
    Relative,
    /// origin 加上局部坐标
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandOptions {
    pub mode: CoordMode,
    pub origin: [i32; 3],
}

/// 一次写入: 轴对齐的长方体或单个方块，坐标为网格内的局部坐标
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Fill {
        from: [u32; 3],
        to: [u32; 3],
        key: ResolvedKey,
    },
    Point {
        at: [u32; 3],
        key: ResolvedKey,
    },
}

impl Operation {
    pub fn key(&self) -> &ResolvedKey {
        match self {
            Operation::Fill { key, .. } | Operation::Point { key, .. } => key,
        }
    }

    /// 包含的最小角和最大角
    pub fn bounds(&self) -> ([u32; 3], [u32; 3]) {
        match self {
            Operation::Fill { from, to, .. } => (*from, *to),
            Operation::Point { at, .. } => (*at, *at),
        }
    }

    pub fn volume(&self) -> u64 {
        let (from, to) = self.bounds();
        (0..3).map(|i| u64::from(to[i] - from[i] + 1)).product()
    }
}

/// 按 y、z、x 顺序扫描，沿 x、z、y 贪心扩展相同键的长方体。空气不生成命令。
///
/// 坐标形式在 [`render_commands`] 中决定。
pub fn generate_commands(pipeline: &Pipeline<'_>) -> Vec<Operation> {
    let dims = pipeline.dims();
    let (ids, keys) = intern(pipeline);
    let mut done = vec![false; ids.len()];
    let mut ops = Vec::new();

    // id 0 为空气
    let open = |done: &[bool], x: u32, y: u32, z: u32, id: u32| {
        let i = dims.index(x, y, z);
        ids[i] == id && !done[i]
    };

    for y in 0..dims.height {
        for z in 0..dims.length {
            for x in 0..dims.width {
                let start = dims.index(x, y, z);
                let id = ids[start];
                if id == 0 || done[start] {
                    continue;
                }

                let mut x2 = x;
                while x2 + 1 < dims.width
                    && u64::from(x2 - x + 2) <= MAX_FILL_VOLUME
                    && open(&done, x2 + 1, y, z, id)
                {
                    x2 += 1;
                }
                let row = u64::from(x2 - x + 1);

                let mut z2 = z;
                while z2 + 1 < dims.length
                    && row * u64::from(z2 - z + 2) <= MAX_FILL_VOLUME
                    && (x..=x2).all(|xi| open(&done, xi, y, z2 + 1, id))
                {
                    z2 += 1;
                }
                let layer = row * u64::from(z2 - z + 1);

                let mut y2 = y;
                while y2 + 1 < dims.height
                    && layer * u64::from(y2 - y + 2) <= MAX_FILL_VOLUME
                    && (z..=z2).all(|zi| (x..=x2).all(|xi| open(&done, xi, y2 + 1, zi, id)))
                {
                    y2 += 1;
                }

                for yi in y..=y2 {
                    for zi in z..=z2 {
                        for xi in x..=x2 {
                            done[dims.index(xi, yi, zi)] = true;
                        }
                    }
                }

                let key = keys[id as usize].clone();
                ops.push(if (x, y, z) == (x2, y2, z2) {
                    Operation::Point { at: [x, y, z], key }
                } else {
                    Operation::Fill {
                        from: [x, y, z],
                        to: [x2, y2, z2],
                        key,
                    }
                });
            }
        }
    }

    debug!(
        "{} 生成 {} 条命令（{} 种方块）",
        dims,
        ops.len(),
        keys.len() - 1
    );
    ops
}

/// 每个坐标解析一次，相同的键映射到同一个 id
fn intern(pipeline: &Pipeline<'_>) -> (Vec<u32>, Vec<ResolvedKey>) {
    let dims = pipeline.dims();
    let mut lookup: HashMap<ResolvedKey, u32> = HashMap::new();
    let mut keys = vec![BlockKey::air()];
    let mut ids = Vec::with_capacity(dims.volume() as usize);
    for y in 0..dims.height {
        for z in 0..dims.length {
            for x in 0..dims.width {
                let key = pipeline.resolve(x, y, z);
                if key.is_air() {
                    ids.push(0);
                    continue;
                }
                let id = *lookup.entry(key.clone()).or_insert_with(|| {
                    keys.push(key);
                    (keys.len() - 1) as u32
                });
                ids.push(id);
            }
        }
    }
    (ids, keys)
}

fn coord(options: &CommandOptions, axis: usize, value: u32) -> String {
    match options.mode {
        CoordMode::Relative => format!("~{}", value),
        CoordMode::Absolute => (options.origin[axis] + value as i32).to_string(),
    }
}

fn position(options: &CommandOptions, p: [u32; 3]) -> String {
    format!(
        "{} {} {}",
        coord(options, 0, p[0]),
        coord(options, 1, p[1]),
        coord(options, 2, p[2])
    )
}

/// `name ["key"=value,...]`
pub fn block_argument(block: &BedrockBlock) -> String {
    if block.states.is_empty() {
        return block.name.clone();
    }
    let states: Vec<String> = block
        .states
        .iter()
        .map(|(k, v)| format!("\"{}\"={}", k, v))
        .collect();
    format!("{} [{}]", block.name, states.join(","))
}

/// 渲染为 Bedrock 命令
pub fn render_commands(
    ops: &[Operation],
    options: &CommandOptions,
    table: &TranslationTable,
) -> Vec<String> {
    let mut blocks: HashMap<&ResolvedKey, String> = HashMap::new();
    ops.iter()
        .map(|op| {
            let block = blocks
                .entry(op.key())
                .or_insert_with(|| block_argument(&table.bedrock_block(op.key())));
            match op {
                Operation::Fill { from, to, .. } => format!(
                    "fill {} {} {}",
                    position(options, *from),
                    position(options, *to),
                    block
                ),
                Operation::Point { at, .. } => {
                    format!("setblock {} {}", position(options, *at), block)
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dimensions;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn key(name: &str, props: &[(&str, &str)]) -> ResolvedKey {
        let properties = props
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(BlockKey::with_properties(name, properties))
    }

    fn grid_pipeline(dims: Dimensions, cells: &[ResolvedKey]) -> Pipeline<'_> {
        Pipeline::new(dims, move |x: u32, y: u32, z: u32| {
            cells[dims.index(x, y, z)].clone()
        })
    }

    fn replay(dims: Dimensions, ops: &[Operation]) -> Vec<ResolvedKey> {
        let mut cells = vec![BlockKey::air(); dims.volume() as usize];
        for op in ops {
            let (from, to) = op.bounds();
            for y in from[1]..=to[1] {
                for z in from[2]..=to[2] {
                    for x in from[0]..=to[0] {
                        let i = dims.index(x, y, z);
                        assert!(cells[i].is_air(), "({}, {}, {}) 被写入两次", x, y, z);
                        cells[i] = op.key().clone();
                    }
                }
            }
        }
        cells
    }

    #[test]
    fn replaying_operations_rebuilds_grid() {
        let choices = [
            BlockKey::air(),
            BlockKey::air(),
            key("minecraft:stone", &[]),
            key("minecraft:oak_stairs", &[("facing", "east"), ("half", "bottom")]),
            key("minecraft:glass", &[]),
        ];
        for seed in 0..5 {
            let dims = Dimensions::new(7, 5, 9);
            let mut rng = StdRng::seed_from_u64(seed);
            // 成块的区域更容易合并
            let cells: Vec<ResolvedKey> = (0..dims.volume())
                .map(|i| {
                    if rng.gen_bool(0.3) {
                        choices[rng.gen_range(0..choices.len())].clone()
                    } else {
                        choices[(i as usize / 11) % choices.len()].clone()
                    }
                })
                .collect();
            let ops = generate_commands(&grid_pipeline(dims, &cells));
            assert!(ops.iter().all(|op| !op.key().is_air()));
            assert_eq!(replay(dims, &ops), cells);
        }
    }

    #[test]
    fn uniform_cube_is_one_fill() {
        let dims = Dimensions::new(4, 4, 4);
        let cells = vec![key("minecraft:stone", &[]); 64];
        let ops = generate_commands(&grid_pipeline(dims, &cells));
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].bounds(), ([0, 0, 0], [3, 3, 3]));
    }

    #[test]
    fn fills_respect_volume_limit() {
        let dims = Dimensions::new(40, 40, 40);
        let cells = vec![key("minecraft:stone", &[]); dims.volume() as usize];
        let ops = generate_commands(&grid_pipeline(dims, &cells));
        assert!(ops.len() > 1);
        assert!(ops.iter().all(|op| op.volume() <= MAX_FILL_VOLUME));
        assert_eq!(replay(dims, &ops), cells);
    }

    #[test]
    fn empty_grid_has_no_operations() {
        let dims = Dimensions::new(3, 3, 3);
        let cells = vec![BlockKey::air(); 27];
        assert!(generate_commands(&grid_pipeline(dims, &cells)).is_empty());
    }

    #[test]
    fn renders_relative_and_absolute() {
        let table = TranslationTable::builtin();
        let ops = vec![
            Operation::Fill {
                from: [0, 0, 0],
                to: [2, 0, 1],
                key: key("minecraft:stone", &[]),
            },
            Operation::Point {
                at: [1, 2, 3],
                key: key("minecraft:oak_stairs", &[("facing", "east"), ("half", "top")]),
            },
        ];
        let relative = render_commands(&ops, &CommandOptions::default(), table);
        assert_eq!(relative[0], "fill ~0 ~0 ~0 ~2 ~0 ~1 minecraft:stone");
        assert_eq!(
            relative[1],
            "setblock ~1 ~2 ~3 minecraft:oak_stairs [\"weirdo_direction\"=0,\"upside_down_bit\"=true]"
        );

        let absolute = CommandOptions {
            mode: CoordMode::Absolute,
            origin: [100, -10, 5],
        };
        let lines = render_commands(&ops, &absolute, table);
        assert_eq!(lines[0], "fill 100 -10 5 102 -10 6 minecraft:stone");
        assert!(lines[1].starts_with("setblock 101 -8 8 "));
    }
}
