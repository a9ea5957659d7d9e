//! NBT 标签树编解码
//!
//! Java 版使用大端序，Bedrock 版使用小端序。字节序是编解码器的构造参数，
//! 不存在全局设置。

use crate::error::{ConvertError, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use indexmap::IndexMap;
use std::io::{Read, Write};
use std::marker::PhantomData;

/// 复合标签（保持插入顺序，编码结果稳定）
pub type Compound = IndexMap<String, Tag>;

/// 最大嵌套深度
const MAX_DEPTH: usize = 512;

pub const TAG_END: u8 = 0;
pub const TAG_BYTE: u8 = 1;
pub const TAG_SHORT: u8 = 2;
pub const TAG_INT: u8 = 3;
pub const TAG_LONG: u8 = 4;
pub const TAG_FLOAT: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_BYTE_ARRAY: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_LIST: u8 = 9;
pub const TAG_COMPOUND: u8 = 10;
pub const TAG_INT_ARRAY: u8 = 11;
pub const TAG_LONG_ARRAY: u8 = 12;

/// NBT 节点
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    End,
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Tag>),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    /// 标签类型字节
    pub fn id(&self) -> u8 {
        match self {
            Tag::End => TAG_END,
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::String(_) => TAG_STRING,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Tag]> {
        match self {
            Tag::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }

    /// 整数类标签统一读取为 i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Tag::Byte(v) => Some(*v as i64),
            Tag::Short(v) => Some(*v as i64),
            Tag::Int(v) => Some(*v as i64),
            Tag::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }
}

/// 复合标签的便捷读取
pub trait CompoundExt {
    fn get_compound(&self, key: &str) -> Option<&Compound>;
    fn get_list(&self, key: &str) -> Option<&[Tag]>;
    fn get_str(&self, key: &str) -> Option<&str>;
    fn get_int(&self, key: &str) -> Option<i32>;
    fn get_byte_array(&self, key: &str) -> Option<&[i8]>;
    fn get_int_array(&self, key: &str) -> Option<&[i32]>;
    fn get_long_array(&self, key: &str) -> Option<&[i64]>;
}

impl CompoundExt for Compound {
    fn get_compound(&self, key: &str) -> Option<&Compound> {
        self.get(key).and_then(Tag::as_compound)
    }

    fn get_list(&self, key: &str) -> Option<&[Tag]> {
        self.get(key).and_then(Tag::as_list)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Tag::as_str)
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Tag::as_i32)
    }

    fn get_byte_array(&self, key: &str) -> Option<&[i8]> {
        match self.get(key) {
            Some(Tag::ByteArray(v)) => Some(v),
            _ => None,
        }
    }

    fn get_int_array(&self, key: &str) -> Option<&[i32]> {
        match self.get(key) {
            Some(Tag::IntArray(v)) => Some(v),
            _ => None,
        }
    }

    fn get_long_array(&self, key: &str) -> Option<&[i64]> {
        match self.get(key) {
            Some(Tag::LongArray(v)) => Some(v),
            _ => None,
        }
    }
}

/// 数值字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// NBT 编解码器
#[derive(Debug, Clone, Copy)]
pub struct NbtCodec {
    endianness: Endianness,
}

impl NbtCodec {
    pub fn new(endianness: Endianness) -> Self {
        Self { endianness }
    }

    /// Java 版方言（大端序）
    pub fn java() -> Self {
        Self::new(Endianness::Big)
    }

    /// Bedrock 版方言（小端序）
    pub fn bedrock() -> Self {
        Self::new(Endianness::Little)
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// 解码，返回 (根名称, 根标签)
    ///
    /// 先探测 gzip / zlib 魔数，必要时解压。
    pub fn decode(&self, bytes: &[u8]) -> Result<(String, Tag)> {
        let data = maybe_decompress(bytes)?;
        match self.endianness {
            Endianness::Big => Reader::<BigEndian>::new(&data).read_root(),
            Endianness::Little => Reader::<LittleEndian>::new(&data).read_root(),
        }
    }

    /// 解码并要求根为复合标签
    pub fn decode_compound(&self, bytes: &[u8]) -> Result<Compound> {
        match self.decode(bytes)?.1 {
            Tag::Compound(map) => Ok(map),
            _ => Err(ConvertError::format("根标签不是复合标签")),
        }
    }

    /// 编码（未压缩）
    pub fn encode(&self, name: &str, root: &Tag) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self.endianness {
            Endianness::Big => write_named::<BigEndian>(&mut out, name, root)?,
            Endianness::Little => write_named::<LittleEndian>(&mut out, name, root)?,
        }
        Ok(out)
    }

    /// 编码并 gzip 压缩
    pub fn encode_gzip(&self, name: &str, root: &Tag) -> Result<Vec<u8>> {
        let raw = self.encode(name, root)?;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }
}

/// 按魔数判断是否压缩，必要时解压
pub fn maybe_decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        flate2::read::GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| ConvertError::format(format!("gzip 解压失败: {}", e)))?;
    } else if bytes.len() >= 2
        && bytes[0] & 0x0f == 8
        && (u16::from(bytes[0]) << 8 | u16::from(bytes[1])) % 31 == 0
    {
        flate2::read::ZlibDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| ConvertError::format(format!("zlib 解压失败: {}", e)))?;
    } else {
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

// ============== 解码 ==============

struct Reader<'a, B> {
    buf: &'a [u8],
    pos: usize,
    _order: PhantomData<B>,
}

impl<'a, B: ByteOrder> Reader<'a, B> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            _order: PhantomData,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ConvertError::format(format!(
                "数据被截断: 位置 {} 需要 {} 字节，剩余 {}",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(B::read_i16(self.take(2)?))
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(B::read_u16(self.take(2)?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(B::read_i32(self.take(4)?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(B::read_i64(self.take(8)?))
    }

    /// 读取数组长度，并确认剩余数据足够
    fn array_len(&mut self, elem_size: usize) -> Result<usize> {
        let len = self.i32()?;
        if len < 0 {
            return Err(ConvertError::format(format!("负数长度: {}", len)));
        }
        let len = len as usize;
        if len.saturating_mul(elem_size) > self.remaining() {
            return Err(ConvertError::format(format!(
                "数组长度 {} 超出剩余数据 {}",
                len,
                self.remaining()
            )));
        }
        Ok(len)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            // Java 的 modified UTF-8
            Err(_) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    fn read_root(mut self) -> Result<(String, Tag)> {
        let id = self.u8()?;
        if id != TAG_COMPOUND {
            return Err(ConvertError::format(format!("根标签类型无效: {}", id)));
        }
        let name = self.string()?;
        let tag = self.payload(id, 0)?;
        Ok((name, tag))
    }

    fn payload(&mut self, id: u8, depth: usize) -> Result<Tag> {
        if depth > MAX_DEPTH {
            return Err(ConvertError::format("NBT 嵌套过深"));
        }
        let tag = match id {
            TAG_END => Tag::End,
            TAG_BYTE => Tag::Byte(self.u8()? as i8),
            TAG_SHORT => Tag::Short(self.i16()?),
            TAG_INT => Tag::Int(self.i32()?),
            TAG_LONG => Tag::Long(self.i64()?),
            TAG_FLOAT => Tag::Float(B::read_f32(self.take(4)?)),
            TAG_DOUBLE => Tag::Double(B::read_f64(self.take(8)?)),
            TAG_BYTE_ARRAY => {
                let len = self.array_len(1)?;
                Tag::ByteArray(self.take(len)?.iter().map(|&b| b as i8).collect())
            }
            TAG_STRING => Tag::String(self.string()?),
            TAG_LIST => {
                let elem = self.u8()?;
                let len = self.array_len(1)?;
                if elem == TAG_END && len > 0 {
                    return Err(ConvertError::format("End 类型的列表长度非零"));
                }
                let mut list = Vec::with_capacity(len);
                for _ in 0..len {
                    list.push(self.payload(elem, depth + 1)?);
                }
                Tag::List(list)
            }
            TAG_COMPOUND => {
                let mut map = Compound::new();
                loop {
                    let child = self.u8()?;
                    if child == TAG_END {
                        break;
                    }
                    let name = self.string()?;
                    let value = self.payload(child, depth + 1)?;
                    map.insert(name, value);
                }
                Tag::Compound(map)
            }
            TAG_INT_ARRAY => {
                let len = self.array_len(4)?;
                let bytes = self.take(len * 4)?;
                Tag::IntArray(bytes.chunks_exact(4).map(B::read_i32).collect())
            }
            TAG_LONG_ARRAY => {
                let len = self.array_len(8)?;
                let bytes = self.take(len * 8)?;
                Tag::LongArray(bytes.chunks_exact(8).map(B::read_i64).collect())
            }
            other => {
                return Err(ConvertError::format(format!(
                    "未知的标签类型 {} (位置 {})",
                    other,
                    self.pos - 1
                )))
            }
        };
        Ok(tag)
    }
}

// ============== 编码 ==============

fn write_named<B: ByteOrder>(out: &mut Vec<u8>, name: &str, tag: &Tag) -> Result<()> {
    out.push(tag.id());
    write_string::<B>(out, name)?;
    write_payload::<B>(out, tag)
}

fn write_string<B: ByteOrder>(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| ConvertError::format(format!("字符串过长: {} 字节", s.len())))?;
    let mut b = [0u8; 2];
    B::write_u16(&mut b, len);
    out.extend_from_slice(&b);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_len<B: ByteOrder>(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| ConvertError::format(format!("数组过长: {}", len)))?;
    let mut b = [0u8; 4];
    B::write_i32(&mut b, len);
    out.extend_from_slice(&b);
    Ok(())
}

fn write_payload<B: ByteOrder>(out: &mut Vec<u8>, tag: &Tag) -> Result<()> {
    match tag {
        Tag::End => {}
        Tag::Byte(v) => out.push(*v as u8),
        Tag::Short(v) => {
            let mut b = [0u8; 2];
            B::write_i16(&mut b, *v);
            out.extend_from_slice(&b);
        }
        Tag::Int(v) => {
            let mut b = [0u8; 4];
            B::write_i32(&mut b, *v);
            out.extend_from_slice(&b);
        }
        Tag::Long(v) => {
            let mut b = [0u8; 8];
            B::write_i64(&mut b, *v);
            out.extend_from_slice(&b);
        }
        Tag::Float(v) => {
            let mut b = [0u8; 4];
            B::write_f32(&mut b, *v);
            out.extend_from_slice(&b);
        }
        Tag::Double(v) => {
            let mut b = [0u8; 8];
            B::write_f64(&mut b, *v);
            out.extend_from_slice(&b);
        }
        Tag::ByteArray(arr) => {
            write_len::<B>(out, arr.len())?;
            out.extend(arr.iter().map(|&v| v as u8));
        }
        Tag::String(s) => write_string::<B>(out, s)?,
        Tag::List(list) => {
            let elem = list.first().map_or(TAG_END, Tag::id);
            if list.iter().any(|t| t.id() != elem) {
                return Err(ConvertError::format("列表元素类型不一致"));
            }
            out.push(elem);
            write_len::<B>(out, list.len())?;
            for item in list {
                write_payload::<B>(out, item)?;
            }
        }
        Tag::Compound(map) => {
            for (name, value) in map {
                write_named::<B>(out, name, value)?;
            }
            out.push(TAG_END);
        }
        Tag::IntArray(arr) => {
            write_len::<B>(out, arr.len())?;
            let mut b = [0u8; 4];
            for &v in arr {
                B::write_i32(&mut b, v);
                out.extend_from_slice(&b);
            }
        }
        Tag::LongArray(arr) => {
            write_len::<B>(out, arr.len())?;
            let mut b = [0u8; 8];
            for &v in arr {
                B::write_i64(&mut b, v);
                out.extend_from_slice(&b);
            }
        }
    }
    Ok(())
}
