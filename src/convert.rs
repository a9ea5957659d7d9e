//! 转换流程: 读取 → 翻译 → 变换 → 输出

use crate::commands::{generate_commands, render_commands, CommandOptions};
use crate::error::{ConvertError, Result};
use crate::model::{Dimensions, VoxelGrid};
use crate::pack::build_mcpack;
use crate::progress::Progress;
use crate::resolver::Pipeline;
use crate::schematic::{load_schematic, write_sponge_schematic};
use crate::structure::{
    convert_commands_to_structure, create_nbt_buffer, StructureDims, MAX_FOOTPRINT,
};
use crate::transform::{
    add_structure_void_support, apply_mirroring, apply_rotation, hollow_out_schematic, MirrorAxes,
};
use crate::translation::{make_merge_key_getter, Overrides, TranslationTable};
use crate::world::{create_block_stream_from_world, load_schematic_from_stream, BlockBox, RegionSet};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// 超过这个体积时给出警告
pub const DEFAULT_WARN_VOLUME: u64 = 1_000_000;

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// 按 40x40x40 切分的 .mcpack
    #[default]
    Pack,
    /// 单个 .mcstructure（最大 250x250）
    Structure,
    /// fill / setblock 命令
    Commands,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pack => "mcpack",
            OutputFormat::Structure => "mcstructure",
            OutputFormat::Commands => "mcfunction",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pack" | "mcpack" => Ok(OutputFormat::Pack),
            "structure" | "mcstructure" => Ok(OutputFormat::Structure),
            "commands" | "mcfunction" => Ok(OutputFormat::Commands),
            other => Err(format!("未知的输出格式: {}（可选 pack / structure / commands）", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::Pack => "pack",
            OutputFormat::Structure => "structure",
            OutputFormat::Commands => "commands",
        };
        f.write_str(name)
    }
}

/// 一次转换的全部选项
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub format: OutputFormat,
    /// 输出名称（行为包命名空间）
    pub name: String,
    /// 顺时针旋转角度，0 / 90 / 180 / 270
    pub rotation: u32,
    pub mirror: MirrorAxes,
    pub hollow: bool,
    /// 在重力方块下方放置屏障
    pub structure_void: bool,
    pub commands: CommandOptions,
    /// 未知方块的替代方块
    pub default_target: Option<String>,
    /// 用户替换规则（源 → 目标）
    pub overrides: Vec<(String, String)>,
    pub warn_volume: u64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            name: "structure".to_string(),
            rotation: 0,
            mirror: MirrorAxes::none(),
            hollow: false,
            structure_void: true,
            commands: CommandOptions::default(),
            default_target: None,
            overrides: Vec::new(),
            warn_volume: DEFAULT_WARN_VOLUME,
        }
    }
}

/// 转换摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertSummary {
    /// 读取到的原始尺寸
    pub source_dims: Dimensions,
    /// 变换后的尺寸
    pub output_dims: Dimensions,
    /// 命令或结构的操作数；行为包为 0
    pub operations: usize,
    pub warnings: Vec<String>,
}

/// 转换结果，字节全部生成后才返回
#[derive(Debug, Clone)]
pub struct ConvertOutput {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub summary: ConvertSummary,
}

/// 在读取任何数据之前校验替换规则和默认方块
fn prepare_table(options: &ConvertOptions) -> Result<Cow<'static, TranslationTable>> {
    let builtin = TranslationTable::builtin();
    match &options.default_target {
        Some(target) => Ok(Cow::Owned(builtin.clone().with_default_target(target)?)),
        None => Ok(Cow::Borrowed(builtin)),
    }
}

fn validate(options: &ConvertOptions) -> Result<(Cow<'static, TranslationTable>, Overrides)> {
    let table = prepare_table(options)?;
    let overrides = table.validate_overrides(options.overrides.iter().map(|(s, t)| (s, t)))?;
    Ok((table, overrides))
}

/// 体积超过阈值时的警告，同时作为进度事件发出
fn volume_warning(
    dims: Dimensions,
    options: &ConvertOptions,
    progress: &mut impl FnMut(&Progress),
) -> Vec<String> {
    if dims.volume() <= options.warn_volume {
        return Vec::new();
    }
    let message = format!(
        "体积 {} ({} 个方块) 超过 {}，转换可能很慢并占用大量内存",
        dims,
        dims.volume(),
        options.warn_volume
    );
    warn!("{}", message);
    progress(&Progress::new("警告", message.clone()));
    vec![message]
}

fn loaded(grid: &VoxelGrid) -> Progress {
    Progress::new(
        "已读取",
        format!(
            "{}，调色板 {} 项，{} 个方块实体",
            grid.dims(),
            grid.palette().len(),
            grid.block_entities.len()
        ),
    )
}

/// 读取建筑文件并转换
pub fn convert_schematic(
    bytes: &[u8],
    filename: &str,
    options: &ConvertOptions,
    mut progress: impl FnMut(&Progress),
) -> Result<ConvertOutput> {
    let (table, overrides) = validate(options)?;

    progress(&Progress::new("读取", format!("解析 {}", filename)));
    let grid = load_schematic(bytes, filename)?;
    progress(&loaded(&grid));
    let warnings = volume_warning(grid.dims(), options, &mut progress);
    convert_loaded(&grid, &table, &overrides, options, warnings, progress)
}

/// 从存档中截取包围盒并转换
///
/// 包围盒的体积在读取任何区块之前检查。
pub fn convert_world(
    regions: &RegionSet,
    from: [i32; 3],
    to: [i32; 3],
    options: &ConvertOptions,
    mut progress: impl FnMut(&Progress),
) -> Result<ConvertOutput> {
    let (table, overrides) = validate(options)?;

    let dims = BlockBox::new(from, to).dims();
    dims.dense_len()?;
    let warnings = volume_warning(dims, options, &mut progress);

    let stream = create_block_stream_from_world(regions, from, to, &mut progress);
    let grid = load_schematic_from_stream(stream)?;
    progress(&loaded(&grid));
    convert_loaded(&grid, &table, &overrides, options, warnings, progress)
}

/// 把建筑文件（通常是 .litematic）另存为 Sponge v2 `.schem`
///
/// 方块保持 Java 版状态，不做翻译和变换。
pub fn export_sponge_schematic(
    bytes: &[u8],
    filename: &str,
    mut progress: impl FnMut(&Progress),
) -> Result<Vec<u8>> {
    progress(&Progress::new("读取", format!("解析 {}", filename)));
    let grid = load_schematic(bytes, filename)?;
    progress(&loaded(&grid));
    let out = write_sponge_schematic(&grid, TranslationTable::builtin())?;
    progress(&Progress::new("完成", format!("{} 字节", out.len())));
    Ok(out)
}

/// 对已读取的网格执行翻译、变换和输出
pub fn convert_grid(
    grid: &VoxelGrid,
    table: &TranslationTable,
    options: &ConvertOptions,
    mut progress: impl FnMut(&Progress),
) -> Result<ConvertOutput> {
    let overrides = table.validate_overrides(options.overrides.iter().map(|(s, t)| (s, t)))?;
    let warnings = volume_warning(grid.dims(), options, &mut progress);
    convert_loaded(grid, table, &overrides, options, warnings, progress)
}

fn convert_loaded(
    grid: &VoxelGrid,
    table: &TranslationTable,
    overrides: &Overrides,
    options: &ConvertOptions,
    warnings: Vec<String>,
    mut progress: impl FnMut(&Progress),
) -> Result<ConvertOutput> {
    if !grid.has_data() {
        return Err(ConvertError::EmptyResult("文件中没有方块数据".to_string()));
    }

    let source_dims = grid.dims();
    let pipeline = build_pipeline(grid, table, overrides, options, &mut progress)?;
    let output_dims = pipeline.dims();
    info!("{} → {}", source_dims, output_dims);

    let (bytes, operations) = match options.format {
        OutputFormat::Commands => {
            let ops = generate_commands(&pipeline);
            if ops.is_empty() {
                return Err(ConvertError::EmptyResult("没有生成任何命令".to_string()));
            }
            progress(&Progress::new("生成命令", format!("{} 条", ops.len())));
            let mut text = render_commands(&ops, &options.commands, table).join("\n");
            text.push('\n');
            (text.into_bytes(), ops.len())
        }
        OutputFormat::Structure => {
            if output_dims.width > MAX_FOOTPRINT || output_dims.length > MAX_FOOTPRINT {
                return Err(ConvertError::SizeLimit {
                    width: output_dims.width,
                    length: output_dims.length,
                    limit: MAX_FOOTPRINT,
                });
            }
            let ops = generate_commands(&pipeline);
            progress(&Progress::new("生成命令", format!("{} 条", ops.len())));
            let mut dims = StructureDims::new(
                output_dims.width,
                output_dims.height,
                output_dims.length,
            );
            dims.origin = options.commands.origin;
            let mut doc = convert_commands_to_structure(&ops, dims, table)?;
            doc.add_block_entities(pipeline.placed_block_entities());
            progress(&Progress::new(
                "生成结构",
                format!("调色板 {} 项", doc.palette.len()),
            ));
            (create_nbt_buffer(&doc)?, ops.len())
        }
        OutputFormat::Pack => (
            build_mcpack(&pipeline, table, &options.name, &mut progress)?,
            0,
        ),
    };

    Ok(ConvertOutput {
        bytes,
        extension: options.format.extension(),
        summary: ConvertSummary {
            source_dims,
            output_dims,
            operations,
            warnings,
        },
    })
}

/// 固定顺序: 旋转 → 镜像 → 挖空 → 重力支撑，每施加一个变换报告一次
fn build_pipeline<'a>(
    grid: &'a VoxelGrid,
    table: &'a TranslationTable,
    overrides: &Overrides,
    options: &ConvertOptions,
    progress: &mut impl FnMut(&Progress),
) -> Result<Pipeline<'a>> {
    let mut pipeline = make_merge_key_getter(grid, table, overrides);
    let mut applied = |what: String, dims: Dimensions| {
        progress(&Progress::new("变换", format!("{} → {}", what, dims)));
    };
    pipeline = apply_rotation(pipeline, options.rotation)?;
    if options.rotation % 360 != 0 {
        applied(format!("旋转 {}°", options.rotation), pipeline.dims());
    }
    if !options.mirror.is_none() {
        pipeline = apply_mirroring(pipeline, options.mirror);
        applied(format!("镜像 {:?}", options.mirror), pipeline.dims());
    }
    if options.hollow {
        pipeline = hollow_out_schematic(pipeline);
        applied("挖空".to_string(), pipeline.dims());
    }
    if options.structure_void {
        pipeline = add_structure_void_support(pipeline, table);
        applied("重力支撑".to_string(), pipeline.dims());
    }
    Ok(pipeline)
}
