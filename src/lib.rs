//! Minecraft Java → Bedrock 转换工具
//!
//! 读取 Java 版建筑文件或存档区域，翻译方块并施加几何变换，
//! 输出 Bedrock 的 fill 命令、.mcstructure 或 .mcpack。

pub mod commands;
pub mod config;
pub mod convert;
pub mod error;
pub mod mca;
pub mod model;
pub mod nbt;
pub mod pack;
pub mod packed;
pub mod progress;
pub mod resolver;
pub mod schematic;
pub mod structure;
pub mod transform;
pub mod translation;
pub mod world;

pub use commands::{generate_commands, render_commands, CommandOptions, CoordMode, Operation};
pub use config::Config;
pub use convert::{
    convert_grid, convert_schematic, convert_world, export_sponge_schematic, ConvertOptions, ConvertOutput, ConvertSummary,
    OutputFormat,
};
pub use error::{ConvertError, Result};
pub use model::{BlockState, Dimensions, PaletteEntry, SourceKind, VoxelGrid};
pub use pack::{build_mcpack, plan_mcpack};
pub use progress::Progress;
pub use resolver::{BlockKey, KeyResolver, Pipeline, ResolvedKey};
pub use schematic::{load_schematic, write_sponge_schematic};
pub use structure::{convert_commands_to_structure, create_nbt_buffer, StructureDocument};
pub use transform::{
    add_structure_void_support, apply_mirroring, apply_rotation, hollow_out_schematic, MirrorAxes,
};
pub use translation::{make_merge_key_getter, Overrides, TranslationTable};
pub use world::{
    create_block_stream_from_world, load_schematic_from_stream, load_world_directory,
    load_world_regions, BlockStream, RegionSet, StreamItem,
};
