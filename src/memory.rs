//! 内存抽象层
//!
//! 本模块定义了内存访问的统一接口 `Memory` trait，
//! 以及用于功能验证的简单线性内存实现 `FlatMemory`。
//! 核心只依赖三件事：有界读、有界写、固定大小。

use thiserror::Error;

/// 内存访问错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemError {
    /// 地址越界（未映射到当前内存区域）
    #[error("Illegal memory access of {len} byte(s) at 0x{addr:08x} (region base=0x{base:08x}, size=0x{size:x})")]
    OutOfRange {
        addr: u64,
        len: usize,
        base: u64,
        size: usize,
    },
}

pub type MemResult<T> = Result<T, MemError>;

/// 内存访问的统一接口
///
/// 多字节的便捷读写均为小端序；大端 ISA 通过 `CpuCore::load`/`store`
/// 按指令集字节序访问。
pub trait Memory {
    /// 内存大小（字节数）
    fn size(&self) -> usize;

    /// 内存映射起始地址
    fn base(&self) -> u64 {
        0
    }

    /// 从 `addr` 读取 `buf.len()` 个字节
    fn read(&self, addr: u64, buf: &mut [u8]) -> MemResult<()>;

    /// 向 `addr` 写入 `data`
    fn write(&mut self, addr: u64, data: &[u8]) -> MemResult<()>;

    /// 批量读取数据
    fn read_bytes(&self, addr: u64, len: usize) -> MemResult<Vec<u8>> {
        let mut buf = vec![0; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    /// 将指定范围填充为固定字节
    fn fill(&mut self, addr: u64, len: usize, value: u8) -> MemResult<()> {
        self.write(addr, &vec![value; len])
    }

    fn load8(&self, addr: u64) -> MemResult<u8> {
        let mut b = [0u8; 1];
        self.read(addr, &mut b)?;
        Ok(b[0])
    }

    fn load16(&self, addr: u64) -> MemResult<u16> {
        let mut b = [0u8; 2];
        self.read(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn load32(&self, addr: u64) -> MemResult<u32> {
        let mut b = [0u8; 4];
        self.read(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn load64(&self, addr: u64) -> MemResult<u64> {
        let mut b = [0u8; 8];
        self.read(addr, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn store8(&mut self, addr: u64, value: u8) -> MemResult<()> {
        self.write(addr, &[value])
    }

    fn store16(&mut self, addr: u64, value: u16) -> MemResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn store32(&mut self, addr: u64, value: u32) -> MemResult<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn store64(&mut self, addr: u64, value: u64) -> MemResult<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

/// 简单线性内存实现
///
/// 使用 `Vec<u8>` 存储整个地址空间或一段工作集。
/// 支持可选的基地址偏移，用于模拟内存映射。
#[derive(Debug, Clone)]
pub struct FlatMemory {
    /// 内存数据存储
    data: Vec<u8>,
    /// 内存映射起始地址
    base_addr: u64,
}

impl FlatMemory {
    /// 创建一个指定大小的内存区域
    ///
    /// # 示例
    ///
    /// ```
    /// use oak_sim::memory::{FlatMemory, Memory};
    ///
    /// // 创建 64KB 的内存，起始地址为 0
    /// let mem = FlatMemory::new(64 * 1024, 0);
    /// assert_eq!(mem.size(), 64 * 1024);
    /// ```
    pub fn new(size: usize, base_addr: u64) -> Self {
        FlatMemory {
            data: vec![0; size],
            base_addr,
        }
    }

    fn bounds_check(&self, addr: u64, len: usize) -> MemResult<usize> {
        let out_of_range = MemError::OutOfRange {
            addr,
            len,
            base: self.base_addr,
            size: self.data.len(),
        };
        let relative = addr.checked_sub(self.base_addr).ok_or(out_of_range)?;
        let relative = usize::try_from(relative).map_err(|_| out_of_range)?;
        let end = relative.checked_add(len).ok_or(out_of_range)?;
        if end > self.data.len() {
            return Err(out_of_range);
        }
        Ok(relative)
    }

    /// 整块内存的只读视图
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Memory for FlatMemory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn base(&self) -> u64 {
        self.base_addr
    }

    fn read(&self, addr: u64, buf: &mut [u8]) -> MemResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let start = self.bounds_check(addr, buf.len())?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> MemResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let start = self.bounds_check(addr, data.len())?;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn fill(&mut self, addr: u64, len: usize, value: u8) -> MemResult<()> {
        if len == 0 {
            return Ok(());
        }
        let start = self.bounds_check(addr, len)?;
        self.data[start..start + len].fill(value);
        Ok(())
    }
}
