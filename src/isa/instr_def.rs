//! 指令定义结构
//!
//! 一处定义，两处使用：
//! - 汇编：`template` 作为编码种子，操作数按位或进去
//! - 解码：`mask`/`template` 匹配后由 Format 反向解包操作数

use std::collections::BTreeMap;
use std::sync::Arc;

use super::format::Format;
use crate::cpu::{CoreError, CpuCore};

/// 指令行为：读写核心状态，并自行推进 PC
pub type Executor = fn(&mut CpuCore) -> Result<(), CoreError>;

#[derive(Clone)]
pub struct Instruction {
    pub mnemonic: String,
    pub format: Arc<Format>,
    /// 字段名 -> 固定值（opcode/funct 等）
    pub constants: BTreeMap<String, u64>,
    /// 为 false 时解码会报告不可用
    pub available: bool,
    pub executor: Executor,
    mask: u64,
    template: u64,
    bits: u32,
}

impl Instruction {
    /// 创建指令并预先计算 mask/template/bits
    pub fn new(
        mnemonic: &str,
        format: &Arc<Format>,
        constants: &[(&str, u64)],
        executor: Executor,
    ) -> Self {
        let constants: BTreeMap<String, u64> = constants
            .iter()
            .map(|(field, value)| (field.to_string(), *value))
            .collect();

        let mut mask = 0u64;
        let mut template = 0u64;
        for range in &format.ranges {
            if let Some(value) = constants.get(&range.field) {
                mask |= range.word_mask();
                template |= range.pack(*value);
            }
        }

        Self {
            mnemonic: mnemonic.to_string(),
            format: Arc::clone(format),
            constants,
            available: true,
            executor,
            mask,
            template,
            bits: format.covered_mask().count_ones(),
        }
    }

    /// 保留定义但禁止执行
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// 固定位为 1、无关位为 0
    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// 固定位的取值，已移到各自的位置
    #[inline]
    pub fn template(&self) -> u64 {
        self.template
    }

    /// 指令位宽
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// 指令字节数
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bits.div_ceil(8) as usize
    }

    /// 检查指令字是否匹配
    ///
    /// 从最低位向最高位逐位比较，无关位总是匹配。
    pub fn matches(&self, word: u64) -> bool {
        (0..self.bits.max(64 - self.mask.leading_zeros())).all(|bit| {
            let care = (self.mask >> bit) & 1 == 1;
            !care || (word >> bit) & 1 == (self.template >> bit) & 1
        })
    }

    /// 两条指令冲突当且仅当存在某个指令字同时匹配两者
    pub fn conflicts_with(&self, other: &Instruction) -> bool {
        let common_mask = self.mask & other.mask;
        (self.template & common_mask) == (other.template & common_mask)
    }

    pub fn constant(&self, field: &str) -> Option<u64> {
        self.constants.get(field).copied()
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruction")
            .field("mnemonic", &self.mnemonic)
            .field("format", &self.format.name)
            .field("mask", &format_args!("0x{:08X}", self.mask))
            .field("template", &format_args!("0x{:08X}", self.template))
            .field("available", &self.available)
            .finish()
    }
}
