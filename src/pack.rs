//! 行为包构建: 按 40x40x40 切分为多个结构，附带加载脚本和函数

use crate::commands::generate_commands;
use crate::error::{ConvertError, Result};
use crate::model::Dimensions;
use crate::progress::Progress;
use crate::resolver::Pipeline;
use crate::structure::{convert_commands_to_structure, create_nbt_buffer, StructureDims};
use crate::translation::TranslationTable;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use xxhash_rust::xxh64::xxh64;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// 每个子结构的边长
pub const PART_SIZE: u32 = 40;

const MIN_ENGINE_VERSION: [u32; 3] = [1, 20, 0];
const SERVER_MODULE_VERSION: &str = "1.8.0";

// ============== manifest.json ==============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackManifest {
    pub format_version: u32,
    pub header: PackHeader,
    pub modules: Vec<PackModule>,
    pub dependencies: Vec<PackDependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackHeader {
    pub name: String,
    pub description: String,
    pub uuid: String,
    pub version: [u32; 3],
    pub min_engine_version: [u32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackModule {
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: String,
    pub version: [u32; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackDependency {
    pub module_name: String,
    pub version: String,
}

/// 由包名和用途派生固定的 UUID，同名的包总是得到相同的 UUID
pub fn pack_uuid(name: &str, purpose: &str) -> String {
    let input = format!("{}/{}", name, purpose);
    let hi = xxh64(input.as_bytes(), 0);
    let lo = xxh64(input.as_bytes(), hi);
    // 版本 4 / RFC 4122 变体位
    let hi = (hi & 0xffff_ffff_ffff_0fff) | 0x0000_0000_0000_4000;
    let lo = (lo & 0x3fff_ffff_ffff_ffff) | 0x8000_0000_0000_0000;
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        hi >> 32,
        (hi >> 16) & 0xffff,
        hi & 0xffff,
        lo >> 48,
        lo & 0xffff_ffff_ffff
    )
}

impl PackManifest {
    pub fn new(name: &str, parts: usize) -> Self {
        let version = [1, 0, 0];
        PackManifest {
            format_version: 2,
            header: PackHeader {
                name: name.to_string(),
                description: format!("{} 个结构，使用 /scriptevent {}:build 放置", parts, name),
                uuid: pack_uuid(name, "header"),
                version,
                min_engine_version: MIN_ENGINE_VERSION,
            },
            modules: vec![
                PackModule {
                    kind: "data".to_string(),
                    uuid: pack_uuid(name, "data"),
                    version,
                    language: None,
                    entry: None,
                },
                PackModule {
                    kind: "script".to_string(),
                    uuid: pack_uuid(name, "script"),
                    version,
                    language: Some("javascript".to_string()),
                    entry: Some("scripts/main.js".to_string()),
                },
            ],
            dependencies: vec![PackDependency {
                module_name: "@minecraft/server".to_string(),
                version: SERVER_MODULE_VERSION.to_string(),
            }],
        }
    }
}

// ============== 放置表 ==============

/// 一个子结构在整体中的位置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placement {
    /// 结构标识，如 `castle:part_0_0_0`
    pub name: String,
    pub offset: [u32; 3],
    pub size: [u32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacementList {
    pub name: String,
    pub size: [u32; 3],
    pub parts: Vec<Placement>,
}

/// 结构文件
#[derive(Debug, Clone)]
pub struct PackPart {
    pub placement: Placement,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// 打包前的全部内容
#[derive(Debug, Clone)]
pub struct McPack {
    pub namespace: String,
    pub manifest: PackManifest,
    pub placements: PlacementList,
    pub parts: Vec<PackPart>,
}

/// 结构命名空间只允许小写字母、数字和下划线
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "structure".to_string()
    } else {
        cleaned.to_string()
    }
}

/// 按 x、z、y 顺序切分子区域，边缘的子区域会变小
pub fn split_parts(dims: Dimensions) -> Vec<([u32; 3], Dimensions)> {
    let mut parts = Vec::new();
    for y in (0..dims.height).step_by(PART_SIZE as usize) {
        for z in (0..dims.length).step_by(PART_SIZE as usize) {
            for x in (0..dims.width).step_by(PART_SIZE as usize) {
                let size = Dimensions::new(
                    PART_SIZE.min(dims.width - x),
                    PART_SIZE.min(dims.height - y),
                    PART_SIZE.min(dims.length - z),
                );
                parts.push(([x, y, z], size));
            }
        }
    }
    parts
}

/// 生成所有子结构；空的子区域跳过，全部为空时返回 `EmptyResult`
pub fn plan_mcpack(
    pipeline: &Pipeline<'_>,
    table: &TranslationTable,
    name: &str,
    mut progress: impl FnMut(&Progress),
) -> Result<McPack> {
    let namespace = sanitize_name(name);
    let dims = pipeline.dims();
    let layout = split_parts(dims);
    let total = layout.len();
    info!("{} 切分为 {} 个子区域", dims, total);

    let mut parts = Vec::new();
    for (i, (origin, size)) in layout.into_iter().enumerate() {
        let window = pipeline.window(origin, size);
        let ops = generate_commands(&window);
        if ops.is_empty() {
            debug!("子区域 {:?} 为空，跳过", origin);
        } else {
            let mut doc = convert_commands_to_structure(
                &ops,
                StructureDims::new(size.width, size.height, size.length),
                table,
            )?;
            doc.add_block_entities(window.placed_block_entities());
            let part_name = format!("part_{}_{}_{}", origin[0], origin[1], origin[2]);
            parts.push(PackPart {
                placement: Placement {
                    name: format!("{}:{}", namespace, part_name),
                    offset: origin,
                    size: [size.width, size.height, size.length],
                },
                file_name: format!("structures/{}/{}.mcstructure", namespace, part_name),
                bytes: create_nbt_buffer(&doc)?,
            });
        }
        progress(&Progress::new(
            "生成结构",
            format!("{}/{} 子区域，{} 个结构", i + 1, total, parts.len()),
        ));
    }

    if parts.is_empty() {
        return Err(ConvertError::EmptyResult("所有子区域都是空气".to_string()));
    }

    Ok(McPack {
        manifest: PackManifest::new(&namespace, parts.len()),
        placements: PlacementList {
            name: namespace.clone(),
            size: [dims.width, dims.height, dims.length],
            parts: parts.iter().map(|p| p.placement.clone()).collect(),
        },
        namespace,
        parts,
    })
}

fn json_error(e: serde_json::Error) -> ConvertError {
    ConvertError::format(format!("JSON 序列化失败: {}", e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(json_error)
}

impl McPack {
    /// 逐个放置结构的函数文件
    pub fn function(&self) -> String {
        let mut out = format!("# {}: {} 个结构\n", self.namespace, self.parts.len());
        for p in &self.placements.parts {
            out.push_str(&format!(
                "structure load {} ~{} ~{} ~{}\n",
                p.name, p.offset[0], p.offset[1], p.offset[2]
            ));
        }
        out
    }

    /// 监听 `<name>:build` 脚本事件的加载脚本
    pub fn script(&self) -> Result<String> {
        let parts = serde_json::to_string(&self.placements.parts).map_err(json_error)?;
        Ok(format!(
            r#"import {{ system, world }} from "@minecraft/server";

const EVENT_ID = "{ns}:build";
const PARTS = {parts};

system.afterEvents.scriptEventReceive.subscribe((event) => {{
  if (event.id !== EVENT_ID) return;
  const source = event.sourceEntity;
  if (!source) return;
  const base = {{
    x: Math.floor(source.location.x),
    y: Math.floor(source.location.y),
    z: Math.floor(source.location.z),
  }};
  for (const part of PARTS) {{
    world.structureManager.place(part.name, source.dimension, {{
      x: base.x + part.offset[0],
      y: base.y + part.offset[1],
      z: base.z + part.offset[2],
    }});
  }}
  world.sendMessage(`{ns}: ${{PARTS.length}} structures placed`);
}});
"#,
            ns = self.namespace,
            parts = parts
        ))
    }

    /// 写成 .mcpack（zip）
    pub fn to_zip(&self) -> Result<Vec<u8>> {
        let manifest = to_json(&self.manifest)?;
        let placements = to_json(&self.placements)?;

        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let mut add = |path: &str, bytes: &[u8]| -> Result<()> {
            writer.start_file(path, opts)?;
            writer.write_all(bytes)?;
            Ok(())
        };

        add("manifest.json", manifest.as_bytes())?;
        add("scripts/main.js", self.script()?.as_bytes())?;
        add(
            &format!("functions/{}/build.mcfunction", self.namespace),
            self.function().as_bytes(),
        )?;
        add(
            &format!("structures/{}/placements.json", self.namespace),
            placements.as_bytes(),
        )?;
        for part in &self.parts {
            add(&part.file_name, &part.bytes)?;
        }

        Ok(writer.finish()?.into_inner())
    }
}

/// 生成完整的 .mcpack 文件内容
pub fn build_mcpack(
    pipeline: &Pipeline<'_>,
    table: &TranslationTable,
    name: &str,
    mut progress: impl FnMut(&Progress),
) -> Result<Vec<u8>> {
    let pack = plan_mcpack(pipeline, table, name, &mut progress)?;
    progress(&Progress::new(
        "打包",
        format!("写入 {} 个结构文件", pack.parts.len()),
    ));
    let bytes = pack.to_zip()?;
    progress(&Progress::new("完成", format!("{} 字节", bytes.len())));
    info!(
        "行为包 {}: {} 个结构，{} 字节",
        pack.namespace,
        pack.parts.len(),
        bytes.len()
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{BlockKey, ResolvedKey};
    use std::io::Read;
    use std::sync::Arc;
    use zip::ZipArchive;

    fn solid(dims: Dimensions, skip: impl Fn(u32, u32, u32) -> bool + 'static) -> Pipeline<'static> {
        let stone: ResolvedKey = Arc::new(BlockKey::new("minecraft:stone"));
        Pipeline::new(dims, move |x: u32, y: u32, z: u32| {
            if skip(x, y, z) {
                BlockKey::air()
            } else {
                stone.clone()
            }
        })
    }

    #[test]
    fn splits_into_forty_cubed_parts() {
        let parts = split_parts(Dimensions::new(100, 10, 100));
        assert_eq!(parts.len(), 9);
        assert_eq!(parts[0], ([0, 0, 0], Dimensions::new(40, 10, 40)));
        assert_eq!(parts[1], ([40, 0, 0], Dimensions::new(40, 10, 40)));
        assert_eq!(parts[2], ([80, 0, 0], Dimensions::new(20, 10, 40)));
        assert_eq!(parts[3].0, [0, 0, 40]);
        assert_eq!(parts[8], ([80, 0, 80], Dimensions::new(20, 10, 20)));
    }

    #[test]
    fn hundred_by_hundred_gives_nine_structures() {
        let pipeline = solid(Dimensions::new(100, 10, 100), |_, _, _| false);
        let mut stages = Vec::new();
        let bytes = build_mcpack(&pipeline, TranslationTable::builtin(), "My Castle", |p: &Progress| {
            stages.push(p.stage.clone())
        })
        .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let structures: Vec<String> = archive
            .file_names()
            .filter(|n| n.ends_with(".mcstructure"))
            .map(str::to_string)
            .collect();
        assert_eq!(structures.len(), 9);
        assert!(structures.contains(&"structures/my_castle/part_80_0_80.mcstructure".to_string()));

        let mut function = String::new();
        archive
            .by_name("functions/my_castle/build.mcfunction")
            .unwrap()
            .read_to_string(&mut function)
            .unwrap();
        assert!(function.contains("structure load my_castle:part_40_0_0 ~40 ~0 ~0"));

        let mut manifest = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        let manifest: PackManifest = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest.header.uuid, pack_uuid("my_castle", "header"));
        assert_eq!(manifest.modules[1].entry.as_deref(), Some("scripts/main.js"));

        let mut script = String::new();
        archive
            .by_name("scripts/main.js")
            .unwrap()
            .read_to_string(&mut script)
            .unwrap();
        assert!(script.contains("\"my_castle:build\""));

        assert_eq!(stages.iter().filter(|s| *s == "生成结构").count(), 9);
        assert_eq!(stages.last().map(String::as_str), Some("完成"));
    }

    #[test]
    fn empty_parts_are_skipped() {
        // 只有 x < 40 的部分有方块
        let pipeline = solid(Dimensions::new(100, 5, 30), |x, _, _| x >= 40);
        let pack = plan_mcpack(&pipeline, TranslationTable::builtin(), "half", |_: &Progress| {})
            .unwrap();
        assert_eq!(pack.parts.len(), 1);
        assert_eq!(pack.placements.parts[0].name, "half:part_0_0_0");
    }

    #[test]
    fn all_air_fails() {
        let pipeline = solid(Dimensions::new(50, 5, 50), |_, _, _| true);
        assert!(matches!(
            build_mcpack(&pipeline, TranslationTable::builtin(), "air", |_: &Progress| {}),
            Err(ConvertError::EmptyResult(_))
        ));
    }

    #[test]
    fn uuids_are_deterministic() {
        let a = pack_uuid("castle", "header");
        assert_eq!(a, pack_uuid("castle", "header"));
        assert_ne!(a, pack_uuid("castle", "data"));
        assert_ne!(a, pack_uuid("tower", "header"));
        assert_eq!(a.len(), 36);
        assert_eq!(&a[14..15], "4");
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("My Castle!"), "my_castle");
        assert_eq!(sanitize_name("  "), "structure");
        assert_eq!(sanitize_name("tower_2"), "tower_2");
    }
}
