//! Minecraft Java 建筑 / 存档转换为 Bedrock 结构与行为包

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use mcbridge::{
    convert_schematic, convert_world, export_sponge_schematic, load_world_directory,
    load_world_regions, Config, ConvertOptions, ConvertOutput, CoordMode, MirrorAxes, OutputFormat, Progress,
};

/// Minecraft Java 建筑 / 存档转换为 Bedrock 结构与行为包
#[derive(Parser)]
#[command(name = "mcbridge", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 转换建筑文件（.schematic / .schem / .litematic）
    Schematic {
        /// 建筑文件路径
        file: PathBuf,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// 从存档中截取一块区域转换
    World {
        /// 存档 zip 或存档文件夹
        input: PathBuf,
        /// 包围盒的一个角，如 0,64,0
        #[arg(long, value_parser = parse_coords, allow_hyphen_values = true)]
        from: [i32; 3],
        /// 包围盒的另一个角
        #[arg(long, value_parser = parse_coords, allow_hyphen_values = true)]
        to: [i32; 3],
        #[command(flatten)]
        output: OutputArgs,
    },
    /// 把 .litematic 另存为 Sponge v2 .schem（不做方块翻译）
    Export {
        /// 建筑文件路径
        file: PathBuf,
        /// 输出路径（默认: 同名 .schem）
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 覆盖已存在的文件
        #[arg(long, visible_alias = "overwrite")]
        force: bool,
    },
    /// 生成默认配置文件
    Config {
        /// 输出路径（默认: mcbridge.toml）
        #[arg(short, long, default_value = "mcbridge.toml")]
        output: PathBuf,
        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

/// 两种转换共用的选项，未指定时使用配置文件中的值
#[derive(Args)]
struct OutputArgs {
    /// 输出格式: pack / structure / commands
    #[arg(short, long)]
    format: Option<OutputFormat>,
    /// 输出文件路径
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// 名称（行为包命名空间），默认取输入文件名
    #[arg(short, long)]
    name: Option<String>,
    /// 顺时针旋转: 0 / 90 / 180 / 270
    #[arg(long)]
    rotate: Option<u32>,
    /// 镜像轴，如 x、xz
    #[arg(long)]
    mirror: Option<String>,
    /// 挖空内部
    #[arg(long)]
    hollow: bool,
    /// 不在重力方块下放置屏障
    #[arg(long)]
    no_falling: bool,
    /// 方块替换规则 SRC=DST，可重复
    #[arg(long = "replace", value_name = "SRC=DST", value_parser = parse_rule)]
    replace: Vec<(String, String)>,
    /// 未知方块的替代方块
    #[arg(long)]
    default_block: Option<String>,
    /// 命令使用绝对坐标
    #[arg(long)]
    absolute: bool,
    /// 绝对坐标的原点
    #[arg(long, value_parser = parse_coords, allow_hyphen_values = true)]
    origin: Option<[i32; 3]>,
    /// 覆盖已存在的输出文件
    #[arg(long, visible_alias = "overwrite")]
    force: bool,
}

fn parse_coords(s: &str) -> std::result::Result<[i32; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("坐标应为 x,y,z: {}", s));
    };
    let parse = |v: &str| v.parse::<i32>().map_err(|e| format!("{}: {}", v, e));
    Ok([parse(x)?, parse(y)?, parse(z)?])
}

fn parse_rule(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(a, b)| (a.trim().to_string(), b.trim().to_string()))
        .ok_or_else(|| format!("替换规则应为 SRC=DST: {}", s))
}

fn load_config(config_path: Option<PathBuf>) -> Config {
    if let Some(path) = config_path {
        match Config::load_from_file(&path) {
            Ok(config) => {
                log::info!("已加载配置: {}", path.display());
                return config;
            }
            Err(e) => {
                log::warn!("无法加载配置 {}: {}", path.display(), e);
            }
        }
    }
    Config::load()
}

impl OutputArgs {
    /// 配置文件的值，被命令行参数覆盖
    fn options(&self, config: &Config, default_name: &str) -> Result<ConvertOptions> {
        let mut options = config.convert_options()?;
        if let Some(format) = self.format {
            options.format = format;
        }
        options.name = self.name.clone().unwrap_or_else(|| default_name.to_string());
        if let Some(rotation) = self.rotate {
            options.rotation = rotation;
        }
        if let Some(mirror) = &self.mirror {
            options.mirror = MirrorAxes::parse(mirror)
                .with_context(|| format!("无效的镜像轴: {}", mirror))?;
        }
        options.hollow |= self.hollow;
        if self.no_falling {
            options.structure_void = false;
        }
        options.overrides.extend(self.replace.iter().cloned());
        if let Some(block) = &self.default_block {
            options.default_target = Some(block.clone());
        }
        if self.absolute || self.origin.is_some() {
            options.commands.mode = CoordMode::Absolute;
        }
        if let Some(origin) = self.origin {
            options.commands.origin = origin;
        }
        Ok(options)
    }

    fn output_path(&self, options: &ConvertOptions) -> Result<PathBuf> {
        let path = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.{}", options.name, options.format.extension())));
        if path.exists() && !self.force {
            bail!("输出文件已存在: {:?}\n使用 --force 覆盖", path);
        }
        Ok(path)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("structure")
        .to_string()
}

fn print_progress(progress: &Progress) {
    println!("  {}", progress);
}

fn print_options(options: &ConvertOptions, output: &Path) {
    println!("输出文件: {:?}", output);
    println!("输出格式: {}", options.format);
    if options.rotation != 0 {
        println!("旋转: {}°", options.rotation);
    }
    if !options.mirror.is_none() {
        println!("镜像: {:?}", options.mirror);
    }
    println!("挖空: {}", if options.hollow { "是" } else { "否" });
    println!("重力支撑: {}", if options.structure_void { "是" } else { "否" });
    if !options.overrides.is_empty() {
        println!("替换规则: {} 条", options.overrides.len());
    }
    println!();
}

fn finish(output: ConvertOutput, path: &Path, start: Instant) -> Result<()> {
    // 结果完整后才写文件
    fs::write(path, &output.bytes).with_context(|| format!("无法写入 {:?}", path))?;

    let summary = &output.summary;
    println!();
    println!("尺寸: {} → {}", summary.source_dims, summary.output_dims);
    if summary.operations > 0 {
        println!("操作数: {}", summary.operations);
    }
    for warning in &summary.warnings {
        println!("警告: {}", warning);
    }
    println!("已写入: {:?} ({} 字节)", path, output.bytes.len());
    println!("\n耗时: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config);

    match cli.command {
        Commands::Schematic { file, output } => {
            let options = output.options(&config, &file_stem(&file))?;
            let path = output.output_path(&options)?;

            println!("转换建筑: {:?}", file);
            print_options(&options, &path);

            let start = Instant::now();
            let bytes = fs::read(&file).with_context(|| format!("无法读取 {:?}", file))?;
            let filename = file
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let result = convert_schematic(&bytes, filename, &options, print_progress)
                .with_context(|| format!("转换失败: {:?}", file))?;
            finish(result, &path, start)?;
        }

        Commands::World {
            input,
            from,
            to,
            output,
        } => {
            let options = output.options(&config, &file_stem(&input))?;
            let path = output.output_path(&options)?;

            println!("转换存档: {:?}", input);
            println!("区域: {:?} → {:?}", from, to);
            print_options(&options, &path);

            let start = Instant::now();
            let regions = if input.is_dir() {
                load_world_directory(&input)
            } else {
                let bytes = fs::read(&input).with_context(|| format!("无法读取 {:?}", input))?;
                load_world_regions(bytes)
            }
            .with_context(|| format!("无法读取存档: {:?}", input))?;
            println!("找到 {} 个区域文件", regions.len());

            let result = convert_world(&regions, from, to, &options, print_progress)
                .with_context(|| format!("转换失败: {:?}", input))?;
            finish(result, &path, start)?;
        }

        Commands::Export {
            file,
            output,
            force,
        } => {
            let path = output.unwrap_or_else(|| file.with_extension("schem"));
            if path == file {
                bail!("输出路径与输入相同: {:?}", path);
            }
            if path.exists() && !force {
                bail!("输出文件已存在: {:?}\n使用 --force 覆盖", path);
            }

            println!("导出 Sponge v2: {:?} → {:?}", file, path);
            let start = Instant::now();
            let bytes = fs::read(&file).with_context(|| format!("无法读取 {:?}", file))?;
            let filename = file
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let schem = export_sponge_schematic(&bytes, filename, print_progress)
                .with_context(|| format!("导出失败: {:?}", file))?;
            fs::write(&path, &schem).with_context(|| format!("无法写入 {:?}", path))?;
            println!("已写入: {:?} ({} 字节)", path, schem.len());
            println!("\n耗时: {:.2}s", start.elapsed().as_secs_f64());
        }

        Commands::Config { output, force } => {
            if output.exists() && !force {
                bail!("文件已存在: {:?}\n使用 --force 覆盖", output);
            }

            let default_config = Config::default();
            default_config.save_to_file(&output)?;
            println!("已生成配置文件: {:?}", output);
            println!("\n配置项说明:");
            println!("  [convert]");
            println!(
                "    format = \"{}\"        # pack / structure / commands",
                default_config.convert.format
            );
            println!("    rotation = 0            # 顺时针旋转 0 / 90 / 180 / 270");
            println!("    mirror = \"\"             # 镜像轴，如 \"xz\"");
            println!(
                "    structure_void = {}   # 在重力方块下放置屏障",
                default_config.convert.structure_void
            );
            println!("  [translation]");
            println!(
                "    default_target = \"{}\"  # 未知方块的替代方块",
                default_config.translation.default_target
            );
            println!("  [translation.overrides]");
            println!("    \"minecraft:dirt\" = \"minecraft:grass\"  # 替换规则");
            println!("  [limits]");
            println!(
                "    warn_volume = {}   # 超过此体积时警告",
                default_config.limits.warn_volume
            );
        }
    }

    Ok(())
}
