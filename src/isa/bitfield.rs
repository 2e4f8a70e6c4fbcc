//! 位段模型
//!
//! `BitRange` 描述指令字中的一个切片。被拆到多个不连续位置的逻辑字段
//! （例如 S/B 型立即数）由若干同名切片组成，每个切片记录自己在指令字中的
//! 位置以及它贡献的逻辑位区间 `limit`，打包与解包时按位移 + 掩码 + 或
//! 显式重组，不依赖定义顺序。

use super::fields::{extract, low_mask};

/// 操作数种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// 寄存器编号
    Register,
    /// 立即数（标签解析为绝对地址）
    Immediate,
    /// PC 相对偏移（标签解析为 label - address）
    Offset,
    /// 由 Format 提供的专用编解码函数处理
    Special,
    /// 条件码等无符号小字段
    Condition,
}

/// 切片生效条件，参数为整条指令字
pub type Condition = fn(u64) -> bool;

#[derive(Debug, Clone)]
pub struct BitRange {
    /// 逻辑字段名（已去掉 `[hi:lo]` 标注）
    pub field: String,
    /// 切片在指令字中的起始位
    pub start: u32,
    /// 切片宽度
    pub bits: u32,
    /// 拆分字段的逻辑总宽度
    pub total_bits: Option<u32>,
    /// 本切片对应的逻辑位区间 (lo, hi)
    pub limit: Option<(u32, u32)>,
    /// 对应的操作数下标；常量字段为 None
    pub parameter: Option<usize>,
    pub kind: ParamKind,
    pub sign_extended: bool,
    pub condition: Option<Condition>,
}

impl BitRange {
    /// 创建切片
    ///
    /// 字段名可带 `name[hi:lo]` 标注，此时自动记录逻辑位区间。
    pub fn new(field: &str, start: u32, bits: u32) -> Self {
        let (name, limit) = parse_annotation(field);
        Self {
            field: name.to_string(),
            start,
            bits,
            total_bits: None,
            limit,
            parameter: None,
            kind: ParamKind::Immediate,
            sign_extended: true,
            condition: None,
        }
    }

    /// 绑定到第 `index` 个操作数
    pub fn param(mut self, index: usize, kind: ParamKind) -> Self {
        self.parameter = Some(index);
        self.kind = kind;
        self
    }

    pub fn register(self, index: usize) -> Self {
        self.param(index, ParamKind::Register)
    }

    pub fn immediate(self, index: usize) -> Self {
        self.param(index, ParamKind::Immediate)
    }

    pub fn special(self, index: usize) -> Self {
        self.param(index, ParamKind::Special)
    }

    /// 无符号字段：解码时不做符号扩展，编码时接受 `[0, 2^N-1]`
    pub fn unsigned(mut self) -> Self {
        self.sign_extended = false;
        self
    }

    pub fn total_bits(mut self, bits: u32) -> Self {
        self.total_bits = Some(bits);
        self
    }

    /// 显式指定逻辑位区间
    pub fn limit(mut self, lo: u32, hi: u32) -> Self {
        self.limit = Some((lo, hi));
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// 切片最高位
    pub fn end(&self) -> u32 {
        self.start + self.bits.saturating_sub(1)
    }

    /// 逻辑字段宽度（用于范围检查与符号扩展）
    pub fn logical_bits(&self) -> u32 {
        self.total_bits.unwrap_or(self.bits)
    }

    /// 切片在指令字中的位掩码
    pub fn word_mask(&self) -> u64 {
        low_mask(self.bits).checked_shl(self.start).unwrap_or(0)
    }

    /// 条件不满足时该切片不参与编解码
    pub fn applies_to(&self, word: u64) -> bool {
        self.condition.is_none_or(|cond| cond(word))
    }

    /// 把逻辑值中属于本切片的位放到指令字中的位置
    pub fn pack(&self, value: u64) -> u64 {
        let slice = match self.limit {
            Some((lo, _)) => value.checked_shr(lo).unwrap_or(0),
            None => value,
        };
        (slice & low_mask(self.bits))
            .checked_shl(self.start)
            .unwrap_or(0)
    }

    /// 从指令字取出本切片并放回它在逻辑值中的位置
    pub fn unpack(&self, word: u64) -> u64 {
        let slice = extract(word, self.start, self.bits);
        match self.limit {
            Some((lo, _)) => slice.checked_shl(lo).unwrap_or(0),
            None => slice,
        }
    }
}

/// `imm[11:5]` -> ("imm", Some((5, 11)))
fn parse_annotation(field: &str) -> (&str, Option<(u32, u32)>) {
    let Some(open) = field.find('[') else {
        return (field, None);
    };
    let Some(inner) = field[open + 1..].strip_suffix(']') else {
        return (field, None);
    };
    let Some((hi, lo)) = inner.split_once(':') else {
        return (field, None);
    };
    match (hi.trim().parse::<u32>(), lo.trim().parse::<u32>()) {
        (Ok(hi), Ok(lo)) if hi >= lo => (&field[..open], Some((lo, hi))),
        _ => (field, None),
    }
}
