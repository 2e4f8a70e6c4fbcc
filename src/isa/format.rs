//! 指令格式
//!
//! 一个 `Format` 由若干 `BitRange`、一条识别操作数的正则、一条反汇编模板
//! （`@mnem`、`@arg0` ...）以及专用字段的编解码函数组成。

use std::collections::{BTreeMap, HashMap};

use regex::Regex;

use super::bitfield::{BitRange, ParamKind};
use super::error::{IsaError, IsaResult};
use super::fields::low_mask;
use crate::codec::LabelTable;

/// 专用字段编码：(文本, 当前指令地址, 逻辑位宽, 标签表) -> 打包后的值
pub type SpecialProcessor = fn(&str, u64, u32, &LabelTable) -> Result<u64, String>;

/// 专用字段解码：打包值 -> 逻辑值
pub type SpecialDisassembler = fn(u64) -> u64;

#[derive(Debug, Clone)]
pub struct Format {
    pub name: String,
    pub ranges: Vec<BitRange>,
    pub pattern: Regex,
    pub disassembly: String,
    pub processors: HashMap<String, SpecialProcessor>,
    pub disassemblers: HashMap<String, SpecialDisassembler>,
}

impl Format {
    pub fn new(
        name: &str,
        pattern: &str,
        disassembly: &str,
        ranges: Vec<BitRange>,
    ) -> IsaResult<Self> {
        if pattern.is_empty() {
            return Err(IsaError::EmptyPattern {
                format: name.to_string(),
            });
        }
        let pattern = Regex::new(pattern).map_err(|e| IsaError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name: name.to_string(),
            ranges,
            pattern,
            disassembly: disassembly.to_string(),
            processors: HashMap::new(),
            disassemblers: HashMap::new(),
        })
    }

    /// 为专用字段注册编解码函数对
    pub fn with_special(
        mut self,
        field: &str,
        processor: SpecialProcessor,
        disassembler: SpecialDisassembler,
    ) -> Self {
        self.processors.insert(field.to_string(), processor);
        self.disassemblers.insert(field.to_string(), disassembler);
        self
    }

    /// 操作数个数（最大参数下标 + 1）
    pub fn parameter_count(&self) -> usize {
        self.ranges
            .iter()
            .filter_map(|r| r.parameter)
            .max()
            .map_or(0, |p| p + 1)
    }

    /// 在给定指令字下承载第 `index` 个操作数的首个切片
    pub fn parameter_range(&self, index: usize, word: u64) -> Option<&BitRange> {
        self.ranges
            .iter()
            .find(|r| r.parameter == Some(index) && r.applies_to(word))
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.ranges.iter().any(|r| r.field == field)
    }

    /// 格式覆盖的位（各切片位置的并集）
    pub fn covered_mask(&self) -> u64 {
        self.ranges.iter().fold(0, |acc, r| acc | r.word_mask())
    }

    /// 校验格式定义
    ///
    /// `word_bits` 为 None 时不检查总宽度（变长指令集）。
    pub fn validate(&self, word_bits: Option<u32>) -> IsaResult<()> {
        let groups = self.pattern.captures_len() - 1;
        let limit = word_bits.unwrap_or(64).min(64);

        for range in &self.ranges {
            if let Some(parameter) = range.parameter
                && parameter >= groups
            {
                return Err(IsaError::MissingCaptureGroup {
                    format: self.name.clone(),
                    parameter,
                    groups,
                });
            }
            if range.bits == 0 || range.end() >= limit {
                return Err(IsaError::FieldOutOfWord {
                    format: self.name.clone(),
                    field: range.field.clone(),
                    end: range.end(),
                    word_bits: limit,
                });
            }
            if range.kind == ParamKind::Special && range.parameter.is_some() {
                if !self.processors.contains_key(&range.field) {
                    return Err(IsaError::MissingSpecialProcessor {
                        format: self.name.clone(),
                        field: range.field.clone(),
                    });
                }
                if !self.disassemblers.contains_key(&range.field) {
                    return Err(IsaError::MissingSpecialDisassembler {
                        format: self.name.clone(),
                        field: range.field.clone(),
                    });
                }
            }
        }

        // 无条件切片不得重叠
        for (i, a) in self.ranges.iter().enumerate() {
            for b in &self.ranges[i + 1..] {
                if a.condition.is_none() && b.condition.is_none() && a.word_mask() & b.word_mask() != 0 {
                    return Err(IsaError::OverlappingFields {
                        format: self.name.clone(),
                        first: a.field.clone(),
                        second: b.field.clone(),
                    });
                }
            }
        }

        if let Some(word_bits) = word_bits {
            let covered = self.covered_mask().count_ones();
            if covered != word_bits {
                return Err(IsaError::WordWidthMismatch {
                    format: self.name.clone(),
                    covered,
                    word_bits,
                });
            }
        }

        self.validate_split_fields()
    }

    /// 拆分字段的各切片必须恰好覆盖逻辑位一次
    ///
    /// 普通字段须覆盖 `total_bits`；专用字段的切片覆盖的是编码后的宽度，
    /// `total_bits` 只描述解码后的逻辑宽度，因此只要求从 0 起连续无重叠。
    fn validate_split_fields(&self) -> IsaResult<()> {
        let mut groups: BTreeMap<&str, Vec<&BitRange>> = BTreeMap::new();
        for range in self.ranges.iter().filter(|r| r.limit.is_some()) {
            groups.entry(range.field.as_str()).or_default().push(range);
        }

        for (field, slices) in groups {
            let declared = slices.iter().filter_map(|r| r.total_bits).max();
            let mut seen = 0u64;
            let mut bad = false;
            for slice in &slices {
                let Some((lo, hi)) = slice.limit else { continue };
                let width = hi - lo + 1;
                let bits = low_mask(width).checked_shl(lo).unwrap_or(0);
                if width != slice.bits || seen & bits != 0 {
                    bad = true;
                }
                seen |= bits;
            }
            let special = slices.iter().any(|r| r.kind == ParamKind::Special);
            let expected = if special {
                low_mask(64 - seen.leading_zeros())
            } else {
                low_mask(declared.unwrap_or(64 - seen.leading_zeros()))
            };
            if bad || seen != expected {
                return Err(IsaError::SplitCoverage {
                    format: self.name.clone(),
                    field: field.to_string(),
                    total_bits: declared.unwrap_or(64 - seen.leading_zeros()),
                });
            }
        }
        Ok(())
    }
}
