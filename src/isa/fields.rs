//! 位操作辅助函数
//!
//! 编码、解码与操作数编解码器共用的位运算：低位掩码、符号扩展、
//! 补码范围检查以及按字节序拼接指令字。

use super::syntax::Endianness;

/// 宿主整数宽度（所有字段值都以 u64 承载）
pub const HOST_BITS: u32 = 64;

/// 低 `bits` 位全 1 的掩码
#[inline]
pub fn low_mask(bits: u32) -> u64 {
    if bits >= HOST_BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// 从指令字中取出 `[start, start + bits)` 位
#[inline]
pub fn extract(word: u64, start: u32, bits: u32) -> u64 {
    if start >= HOST_BITS {
        return 0;
    }
    (word >> start) & low_mask(bits)
}

/// 将 `bits` 位宽的值符号扩展到宿主宽度
///
/// 若第 `bits - 1` 位为 1，则高位全部置 1。
#[inline]
pub fn sign_ext(value: u64, bits: u32) -> u64 {
    if bits == 0 || bits >= HOST_BITS {
        return value;
    }
    if value & (1u64 << (bits - 1)) != 0 {
        value | (!0u64 << bits)
    } else {
        value & low_mask(bits)
    }
}

/// 补码范围检查
///
/// 值按宿主宽度的有符号数解释后须落在 `[-2^(N-1), 2^(N-1)-1]` 内。
/// N 等于宿主宽度时任何值都合法。
pub fn range_check(value: u64, bits: u32) -> bool {
    if bits >= HOST_BITS {
        return true;
    }
    if bits == 0 {
        return value == 0;
    }
    let signed = value as i64;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    (min..=max).contains(&signed)
}

/// 字段是否能容纳该值
///
/// 有符号字段只接受补码范围；无符号字段（移位量、高位立即数、数据伪指令）
/// 另外接受 `[0, 2^N-1]`。
pub fn fits(value: u64, bits: u32, signed: bool) -> bool {
    if range_check(value, bits) {
        return true;
    }
    !signed && value & !low_mask(bits) == 0
}

/// 按字节序把字节拼成指令字
pub fn concat_bytes(bytes: &[u8], endianness: Endianness) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    match endianness {
        Endianness::Little => bytes.iter().rev().fold(0, fold),
        Endianness::Big => bytes.iter().fold(0, fold),
    }
}

/// 把值的低 `len` 个字节按字节序展开
pub fn split_bytes(value: u64, len: usize, endianness: Endianness) -> Vec<u8> {
    let mut out: Vec<u8> = (0..len)
        .map(|i| value.checked_shr(8 * i as u32).unwrap_or(0) as u8)
        .collect();
    if endianness == Endianness::Big {
        out.reverse();
    }
    out
}
