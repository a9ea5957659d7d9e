//! MCA 区域文件解析与写入

use crate::error::{ConvertError, Result};
use crate::nbt::{Compound, NbtCodec, Tag};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Read, Write};

/// 扇区大小（字节）
pub const SECTOR_SIZE: usize = 4096;

/// 每个区域 32x32 个区块
pub const REGION_CHUNKS: usize = 32;

/// 位置表和时间戳表各占一个扇区
const HEADER_SIZE: usize = SECTOR_SIZE * 2;

static MCA_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r\.(-?\d+)\.(-?\d+)\.mca$").expect("正则无效"));
static MCR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r\.-?\d+\.-?\d+\.mcr$").expect("正则无效"));

/// 区块数据（坐标为区域内的局部坐标）
#[derive(Debug, Clone)]
pub struct ChunkData {
    pub x: u8,
    pub z: u8,
    pub data: Compound,
}

/// 位置表的一项: 3 字节扇区偏移 + 1 字节扇区数
#[derive(Debug, Clone, Copy, Default)]
struct Location {
    sector: usize,
    count: usize,
}

impl Location {
    fn decode(entry: &[u8]) -> Self {
        Self {
            sector: u32::from_be_bytes([0, entry[0], entry[1], entry[2]]) as usize,
            count: entry[3] as usize,
        }
    }

    fn encode(self, entry: &mut [u8]) {
        entry[..3].copy_from_slice(&(self.sector as u32).to_be_bytes()[1..]);
        entry[3] = self.count as u8;
    }

    fn is_present(self) -> bool {
        self.sector != 0 && self.count != 0
    }
}

/// 位置表中的槽位，x 优先
fn slot(x: u8, z: u8) -> usize {
    (z as usize % REGION_CHUNKS) * REGION_CHUNKS + x as usize % REGION_CHUNKS
}

/// 区块负载的压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip = 1,
    Zlib = 2,
    Uncompressed = 3,
}

impl Compression {
    fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Gzip),
            2 => Some(Self::Zlib),
            3 => Some(Self::Uncompressed),
            _ => None,
        }
    }

    fn unpack(self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::Gzip => flate2::read::GzDecoder::new(payload).read_to_end(&mut out)?,
            Self::Zlib => flate2::read::ZlibDecoder::new(payload).read_to_end(&mut out)?,
            Self::Uncompressed => {
                out.extend_from_slice(payload);
                payload.len()
            }
        };
        Ok(out)
    }
}

/// 已载入内存的区域文件
pub struct RegionFile {
    data: Vec<u8>,
    locations: Vec<Location>,
}

impl RegionFile {
    /// 解析位置表。空文件视为没有区块的区域。
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self {
                data,
                locations: vec![Location::default(); REGION_CHUNKS * REGION_CHUNKS],
            });
        }
        if data.len() < HEADER_SIZE {
            return Err(ConvertError::format(format!(
                "区域文件头不完整: {} 字节",
                data.len()
            )));
        }

        let locations = data[..SECTOR_SIZE].chunks_exact(4).map(Location::decode).collect();
        Ok(Self { data, locations })
    }

    fn location(&self, x: u8, z: u8) -> Location {
        self.locations[slot(x, z)]
    }

    /// 存在的区块，按 (z, x) 顺序
    pub fn present_chunks(&self) -> Vec<(u8, u8)> {
        let mut chunks = Vec::new();
        for z in 0..REGION_CHUNKS as u8 {
            for x in 0..REGION_CHUNKS as u8 {
                if self.location(x, z).is_present() {
                    chunks.push((x, z));
                }
            }
        }
        chunks
    }

    /// 读取一个区块；不存在时返回 None
    pub fn read_chunk(&self, x: u8, z: u8) -> Result<Option<Compound>> {
        let loc = self.location(x, z);
        if !loc.is_present() {
            return Ok(None);
        }

        let start = loc.sector * SECTOR_SIZE;
        let Some(header) = self.data.get(start..start + 5).filter(|_| start >= HEADER_SIZE) else {
            return Err(ConvertError::format(format!(
                "区块 ({}, {}) 的扇区偏移 {} 超出文件范围",
                x, z, loc.sector
            )));
        };
        // 长度包含压缩方式的 1 字节
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let payload = match length.checked_sub(1) {
            Some(n) => self.data.get(start + 5..start + 5 + n),
            None => None,
        };
        let Some(payload) = payload else {
            return Err(ConvertError::format(format!(
                "区块 ({}, {}) 长度 {} 超出文件范围",
                x, z, length
            )));
        };
        let compression = Compression::from_id(header[4]).ok_or_else(|| {
            ConvertError::format(format!(
                "区块 ({}, {}) 使用了不支持的压缩方式 {}",
                x, z, header[4]
            ))
        })?;

        NbtCodec::java()
            .decode_compound(&compression.unpack(payload)?)
            .map(Some)
    }
}

/// 把区块写成区域文件，负载使用 zlib，时间戳全为 0
///
/// 转换本身只读区域文件；这里为构造测试存档而保留。
#[doc(hidden)]
pub fn write_region(chunks: &[ChunkData]) -> Result<Vec<u8>> {
    let mut data = vec![0u8; HEADER_SIZE];
    for chunk in chunks {
        let raw = NbtCodec::java().encode("", &Tag::Compound(chunk.data.clone()))?;
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw)?;
        let payload = encoder.finish()?;

        let loc = Location {
            sector: data.len() / SECTOR_SIZE,
            count: (payload.len() + 5).div_ceil(SECTOR_SIZE),
        };
        if loc.count > u8::MAX as usize {
            return Err(ConvertError::format(format!(
                "区块 ({}, {}) 占用 {} 个扇区，超过 255",
                chunk.x, chunk.z, loc.count
            )));
        }
        data.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
        data.push(Compression::Zlib as u8);
        data.extend_from_slice(&payload);
        data.resize((loc.sector + loc.count) * SECTOR_SIZE, 0);

        let entry = slot(chunk.x, chunk.z) * 4;
        loc.encode(&mut data[entry..entry + 4]);
    }
    Ok(data)
}

/// 解析 MCA 文件名，返回 (rx, rz)
pub fn parse_mca_filename(filename: &str) -> Option<(i32, i32)> {
    let caps = MCA_NAME.captures(filename)?;
    let rx = caps.get(1)?.as_str().parse().ok()?;
    let rz = caps.get(2)?.as_str().parse().ok()?;
    Some((rx, rz))
}

/// 是否为 Anvil 之前的 .mcr 区域文件
pub fn is_legacy_region_filename(filename: &str) -> bool {
    MCR_NAME.is_match(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nbt::CompoundExt;

    fn chunk(x: u8, z: u8, marker: i32) -> ChunkData {
        let mut data = Compound::new();
        data.insert("xPos".to_string(), Tag::Int(x as i32));
        data.insert("zPos".to_string(), Tag::Int(z as i32));
        data.insert("Marker".to_string(), Tag::Int(marker));
        ChunkData { x, z, data }
    }

    #[test]
    fn write_then_read_chunks() {
        let bytes = write_region(&[chunk(3, 0, 7), chunk(0, 1, 9), chunk(31, 31, 11)]).unwrap();
        assert_eq!(bytes.len() % SECTOR_SIZE, 0);

        let region = RegionFile::parse(bytes).unwrap();
        assert_eq!(region.present_chunks(), vec![(3, 0), (0, 1), (31, 31)]);
        let c = region.read_chunk(0, 1).unwrap().unwrap();
        assert_eq!(c.get_int("Marker"), Some(9));
        assert!(region.read_chunk(5, 5).unwrap().is_none());
    }

    #[test]
    fn uncompressed_and_gzip_chunks() {
        let mut data = Compound::new();
        data.insert("Marker".to_string(), Tag::Int(5));
        let raw = NbtCodec::java().encode("", &Tag::Compound(data)).unwrap();
        let gz = {
            let mut e = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            e.write_all(&raw).unwrap();
            e.finish().unwrap()
        };

        for (compression, payload) in [(3u8, raw.clone()), (1u8, gz)] {
            let mut bytes = vec![0u8; SECTOR_SIZE * 3];
            bytes[2] = 2; // 扇区 2
            bytes[3] = 1;
            let start = SECTOR_SIZE * 2;
            bytes[start..start + 4].copy_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
            bytes[start + 4] = compression;
            bytes[start + 5..start + 5 + payload.len()].copy_from_slice(&payload);

            let region = RegionFile::parse(bytes).unwrap();
            let c = region.read_chunk(0, 0).unwrap().unwrap();
            assert_eq!(c.get_int("Marker"), Some(5));
        }
    }

    #[test]
    fn location_entries_are_big_endian() {
        let mut entry = [0u8; 4];
        Location { sector: 0x01_02_03, count: 9 }.encode(&mut entry);
        assert_eq!(entry, [1, 2, 3, 9]);
        let back = Location::decode(&entry);
        assert_eq!((back.sector, back.count), (0x01_02_03, 9));
        assert_eq!(slot(31, 1), 63);
    }

    #[test]
    fn chunks_larger_than_a_sector() {
        let mut big = chunk(2, 2, 1);
        // 随机字节压缩后仍然超过一个扇区
        let mut state = 0x2545_f491_u32;
        let noise = (0..SECTOR_SIZE * 3)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as i8
            })
            .collect();
        big.data.insert("Noise".to_string(), Tag::ByteArray(noise));
        let bytes = write_region(&[big, chunk(0, 0, 2)]).unwrap();

        let region = RegionFile::parse(bytes).unwrap();
        assert!(region.location(2, 2).count >= 3);
        assert_eq!(region.location(0, 0).sector, region.location(2, 2).sector + region.location(2, 2).count);
        let c = region.read_chunk(2, 2).unwrap().unwrap();
        assert_eq!(c.get_byte_array("Noise").map(|n| n.len()), Some(SECTOR_SIZE * 3));
        assert_eq!(region.read_chunk(0, 0).unwrap().unwrap().get_int("Marker"), Some(2));
    }

    #[test]
    fn corrupt_offsets_fail() {
        let mut bytes = vec![0u8; SECTOR_SIZE * 2];
        bytes[0] = 0xff; // 扇区远超文件大小
        bytes[3] = 1;
        let region = RegionFile::parse(bytes).unwrap();
        assert!(matches!(region.read_chunk(0, 0), Err(ConvertError::Format(_))));

        assert!(RegionFile::parse(vec![0u8; 100]).is_err());

        // 长度为 0 或超出文件
        for length in [0u32, 10_000] {
            let mut bytes = vec![0u8; SECTOR_SIZE * 3];
            bytes[2] = 2;
            bytes[3] = 1;
            bytes[SECTOR_SIZE * 2..SECTOR_SIZE * 2 + 4].copy_from_slice(&length.to_be_bytes());
            bytes[SECTOR_SIZE * 2 + 4] = 2;
            let region = RegionFile::parse(bytes).unwrap();
            assert!(matches!(region.read_chunk(0, 0), Err(ConvertError::Format(_))));
        }
        assert!(RegionFile::parse(Vec::new()).unwrap().present_chunks().is_empty());
    }

    #[test]
    fn unsupported_compression_fails() {
        let mut bytes = vec![0u8; SECTOR_SIZE * 3];
        bytes[2] = 2;
        bytes[3] = 1;
        bytes[SECTOR_SIZE * 2 + 3] = 2;
        bytes[SECTOR_SIZE * 2 + 4] = 4; // LZ4
        let region = RegionFile::parse(bytes).unwrap();
        assert!(region.read_chunk(0, 0).is_err());
    }

    #[test]
    fn region_filenames() {
        assert_eq!(parse_mca_filename("r.0.0.mca"), Some((0, 0)));
        assert_eq!(parse_mca_filename("r.-3.12.mca"), Some((-3, 12)));
        assert_eq!(parse_mca_filename("r.0.0.mcr"), None);
        assert_eq!(parse_mca_filename("r.a.0.mca"), None);
        assert!(is_legacy_region_filename("r.1.-1.mcr"));
        assert!(!is_legacy_region_filename("r.1.-1.mca"));
    }
}
