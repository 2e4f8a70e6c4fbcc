//! 第二遍：编码与字节输出

use super::error::{LineError, LineFailure};
use super::{Assembled, Assembler, Lexed};
use crate::codec::OperandCodec;
use crate::isa::{Directive, Instruction, IsaError, IsaResult, collapse_escapes, split_bytes};

impl Assembler<'_> {
    /// 第二遍
    ///
    /// 出错的行仍然占位（指令填零），保证后续行的地址与第一遍一致。
    pub fn assemble(&self, lexed: &Lexed) -> IsaResult<Assembled> {
        let codec = OperandCodec::new(self.isa, &lexed.labels);
        let endianness = self.isa.endianness();
        let mut out = Assembled::default();
        let mut address = self.origin;

        for line in &lexed.lines {
            let bytes = match self.isa.syntax().split_directive(&line.text) {
                Some((name, args)) => {
                    if self.section_switch(name).is_some() {
                        continue;
                    }
                    let Some(directive) = self.isa.directive(name) else {
                        continue;
                    };
                    self.emit_data(&codec, name, directive, args, line.number, &mut out.errors)?
                }
                None => {
                    let Some(instruction) = self.isa.instruction_prefixing(&line.text) else {
                        continue;
                    };
                    match self.encode(&codec, instruction, &line.text, address) {
                        Ok(word) => split_bytes(word, instruction.bytes(), endianness),
                        Err(LineFailure::User(message)) => {
                            out.errors.push(LineError::new(line.number, message));
                            vec![0; instruction.bytes()]
                        }
                        Err(LineFailure::Isa(err)) => return Err(err),
                    }
                }
            };
            address = address.wrapping_add(bytes.len() as u64);
            out.machine_code.extend(bytes);
        }

        tracing::debug!(
            bytes = out.machine_code.len(),
            errors = out.errors.len(),
            "pass 2 complete"
        );
        Ok(out)
    }

    /// 编码一条指令：以 template 为种子，逐个参数切片或入
    fn encode(
        &self,
        codec: &OperandCodec<'_>,
        instruction: &Instruction,
        text: &str,
        address: u64,
    ) -> Result<u64, LineFailure> {
        let format = &instruction.format;
        let caps = format.pattern.captures(text).ok_or_else(|| {
            LineFailure::User(format!("Argument format for {} violated", instruction.mnemonic))
        })?;

        let mut word = instruction.template();
        for range in &format.ranges {
            let Some(index) = range.parameter else { continue };
            // 条件切片按 template 判断是否参与
            if !range.applies_to(instruction.template()) {
                continue;
            }
            let operand = caps.get(index + 1).ok_or_else(|| IsaError::MissingCaptureGroup {
                format: format.name.clone(),
                parameter: index,
                groups: format.pattern.captures_len() - 1,
            })?;
            let value = codec.encode_field(format, range, operand.as_str(), address)?;
            word |= range.pack(value);
        }
        Ok(word)
    }

    fn emit_data(
        &self,
        codec: &OperandCodec<'_>,
        name: &str,
        directive: Directive,
        args: &str,
        line: usize,
        errors: &mut Vec<LineError>,
    ) -> IsaResult<Vec<u8>> {
        match directive {
            Directive::String | Directive::CString => {
                let mut bytes = self.string_body(args).map(collapse_escapes).unwrap_or_default();
                if directive == Directive::CString {
                    bytes.push(0);
                }
                Ok(bytes)
            }
            Directive::Scalar(bits) => {
                let width = bits.div_ceil(8) as usize;
                let mut bytes = Vec::new();
                for token in self.isa.syntax().data.find_iter(args) {
                    // 失败的值输出零，保持后续地址不变
                    let value = codec.immediate(token.as_str(), bits, false).unwrap_or_else(|err| {
                        errors.push(LineError::new(line, err.to_string()));
                        0
                    });
                    bytes.extend(split_bytes(value, width, self.isa.endianness()));
                }
                Ok(bytes)
            }
            Directive::FloatingPoint | Directive::FixedPoint => Err(IsaError::UnsupportedDirective {
                directive: name.to_string(),
            }),
            Directive::Text | Directive::Data => Ok(Vec::new()),
        }
    }
}
