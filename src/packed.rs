//! 变长位宽的调色板索引打包数组

use crate::error::{ConvertError, Result};

/// 打包布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 紧密排列，值可以跨越 long 边界（Litematica、1.16 之前的区块）
    Continuous,
    /// 每个 long 只放整数个值，高位补零（1.16 之后的区块）
    Padded,
}

/// 调色板大小对应的位宽: max(2, ceil(log2(n)))
pub fn bits_for_palette(palette_len: usize) -> u32 {
    ceil_log2(palette_len).max(2)
}

pub(crate) fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

fn check_bits(bits: u32) -> Result<u64> {
    if !(1..=32).contains(&bits) {
        return Err(ConvertError::format(format!("位宽无效: {}", bits)));
    }
    Ok((1u64 << bits) - 1)
}

/// 存放 count 个值需要的 long 数量
pub fn words_needed(count: usize, bits: u32, layout: Layout) -> usize {
    if bits == 0 {
        return 0;
    }
    match layout {
        Layout::Continuous => (count * bits as usize).div_ceil(64),
        Layout::Padded => count.div_ceil(64 / bits as usize),
    }
}

/// 解包 count 个值
pub fn decode(words: &[i64], count: usize, bits: u32, layout: Layout) -> Result<Vec<u32>> {
    let mask = check_bits(bits)?;
    let needed = words_needed(count, bits, layout);
    if words.len() < needed {
        return Err(ConvertError::format(format!(
            "打包数组过短: {} 个值 ({} 位) 需要 {} 个 long，实际 {}",
            count,
            bits,
            needed,
            words.len()
        )));
    }

    let bits = bits as usize;
    let mut values = Vec::with_capacity(count);
    match layout {
        Layout::Continuous => {
            for i in 0..count {
                let bit = i * bits;
                let word = bit / 64;
                let offset = bit % 64;
                let mut value = (words[word] as u64) >> offset;
                if offset + bits > 64 {
                    value |= (words[word + 1] as u64) << (64 - offset);
                }
                values.push((value & mask) as u32);
            }
        }
        Layout::Padded => {
            let per_word = 64 / bits;
            for i in 0..count {
                let word = words[i / per_word] as u64;
                let offset = (i % per_word) * bits;
                values.push(((word >> offset) & mask) as u32);
            }
        }
    }
    Ok(values)
}

/// 按位宽打包
pub fn encode(values: &[u32], bits: u32, layout: Layout) -> Result<Vec<i64>> {
    let mask = check_bits(bits)?;
    if let Some(&v) = values.iter().find(|&&v| u64::from(v) > mask) {
        return Err(ConvertError::format(format!("值 {} 超出 {} 位", v, bits)));
    }

    let mut words = vec![0u64; words_needed(values.len(), bits, layout)];
    let bits = bits as usize;
    match layout {
        Layout::Continuous => {
            for (i, &v) in values.iter().enumerate() {
                let bit = i * bits;
                let word = bit / 64;
                let offset = bit % 64;
                words[word] |= u64::from(v) << offset;
                if offset + bits > 64 {
                    words[word + 1] |= u64::from(v) >> (64 - offset);
                }
            }
        }
        Layout::Padded => {
            let per_word = 64 / bits;
            for (i, &v) in values.iter().enumerate() {
                words[i / per_word] |= u64::from(v) << ((i % per_word) * bits);
            }
        }
    }
    Ok(words.into_iter().map(|w| w as i64).collect())
}
