//! 汇编语法词汇
//!
//! ISA 作者只需给出注释、标签、字符串等标记符，
//! `Syntax` 会据此预编译词法分析所需的全部正则。

use regex::Regex;

/// 指令字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// 段伪指令的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// 切换到代码段
    Text,
    /// 切换到数据段
    Data,
    /// 字符串，不带结尾 NUL
    String,
    /// 字符串，带结尾 NUL
    CString,
    /// 定宽标量数组，参数为位宽（8/16/32/64）
    Scalar(u32),
    /// 定点小数（尚不支持）
    FixedPoint,
    /// 浮点数组，宽度由 `float_widths` 决定
    FloatingPoint,
}

/// 词法标记符
#[derive(Debug, Clone)]
pub struct Keywords {
    pub directive: Vec<String>,
    pub comment: Vec<String>,
    pub label: Vec<String>,
    pub register: Vec<String>,
    pub string_marker: char,
    pub char_marker: char,
}

impl Default for Keywords {
    fn default() -> Self {
        Self {
            directive: vec![".".into()],
            comment: vec!["#".into()],
            label: vec![":".into()],
            register: vec!["x".into()],
            string_marker: '"',
            char_marker: '\'',
        }
    }
}

impl Keywords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_register(mut self, marker: impl Into<String>) -> Self {
        self.register = vec![marker.into()];
        self
    }

    pub fn with_comment(mut self, marker: impl Into<String>) -> Self {
        self.comment = vec![marker.into()];
        self
    }
}

/// `(?:a|b|c)`
fn options(markers: &[String]) -> String {
    let alts: Vec<String> = markers.iter().map(|m| regex::escape(m)).collect();
    format!("(?:{})", alts.join("|"))
}

/// 预编译的词法正则
#[derive(Debug, Clone)]
pub struct Syntax {
    /// 捕获注释之前的部分，跳过字符串和字符字面量里的注释符
    pub comment: Regex,
    /// 1: 标签名（可选），2: 其余部分
    pub label: Regex,
    /// 1: 伪指令名，2: 参数
    pub directive: Regex,
    /// 1: 引号之间的原文
    pub string: Regex,
    /// 整个 token 是字符字面量，1: 字符（可能带转义）
    pub character: Regex,
    /// 整个 token 是数字寄存器，1: 编号
    pub register: Regex,
    /// 数据伪指令中的单个值（字符、标签或数字）
    pub data: Regex,
    /// 浮点伪指令中的单个十进制小数
    pub float: Regex,
    /// 数字寄存器在反汇编与寄存器转储中的前缀
    pub register_prefix: String,
}

impl Syntax {
    pub fn from_keywords(kw: &Keywords) -> Result<Self, regex::Error> {
        let s = regex::escape(&kw.string_marker.to_string());
        let c = regex::escape(&kw.char_marker.to_string());
        let comment_heads: String = kw
            .comment
            .iter()
            .filter_map(|m| m.chars().next())
            .map(|ch| regex::escape(&ch.to_string()))
            .collect();
        let comment = options(&kw.comment);
        let label = options(&kw.label);
        let directive = options(&kw.directive);
        let register = options(&kw.register);

        let literal = format!(r"{c}(?:\\.|[^{c}\\]){c}");
        Ok(Self {
            comment: Regex::new(&format!(
                r#"^((?:{s}(?:\\.|[^{s}\\])*{s}|{literal}|[^{s}{c}{comment_heads}])*?){comment}.*$"#
            ))?,
            label: Regex::new(&format!(
                r"^\s*(?:([A-Za-z_][A-Za-z0-9_]*){label})?\s*(.*?)\s*$"
            ))?,
            directive: Regex::new(&format!(r"^{directive}(\S+)\s*(.*)$"))?,
            string: Regex::new(&format!(r"{s}((?:\\.|[^{s}\\])*){s}"))?,
            character: Regex::new(&format!(r"^{c}(\\.|[^{c}\\]){c}$"))?,
            register: Regex::new(&format!(r"^{register}([0-9]+)$"))?,
            data: Regex::new(&format!(
                r"{literal}|[A-Za-z_][A-Za-z0-9_]*|[-+]?(?:0[bodxBODX])?[0-9A-Fa-f]+"
            ))?,
            float: Regex::new(r"[-+]?[0-9]*\.?[0-9]+")?,
            register_prefix: kw.register.first().cloned().unwrap_or_default(),
        })
    }

    /// 去掉行尾注释
    pub fn strip_comment<'a>(&self, line: &'a str) -> &'a str {
        match self.comment.captures(line).and_then(|c| c.get(1)) {
            Some(m) => m.as_str(),
            None => line,
        }
    }

    /// 拆出行首标签，返回 (标签, 剩余文本)
    pub fn split_label<'a>(&self, line: &'a str) -> (Option<&'a str>, &'a str) {
        match self.label.captures(line) {
            Some(caps) => (
                caps.get(1).map(|m| m.as_str()),
                caps.get(2).map_or("", |m| m.as_str()),
            ),
            None => (None, line.trim()),
        }
    }

    /// 识别行首伪指令，返回 (名称, 参数)
    pub fn split_directive<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str)> {
        let caps = self.directive.captures(line)?;
        Some((caps.get(1)?.as_str(), caps.get(2).map_or("", |m| m.as_str())))
    }
}

/// 单个操作数：字符字面量或不含分隔符的 token
pub const OPERAND: &str = r"('(?:\\.|[^'\\])'|[^\s,()]+)";

/// `MNEMONIC a, b, ...` 形式的操作数正则，每个操作数一个捕获组
pub fn operand_list(count: usize) -> String {
    if count == 0 {
        return r"^\s*[A-Za-z]+\s*$".to_string();
    }
    let operands = vec![OPERAND; count].join(r"\s*,\s*");
    format!(r"^\s*[A-Za-z]+\s+{operands}\s*$")
}

/// `MNEMONIC a, offset(base)` 形式，依次捕获 a、offset、base
pub fn memory_operands() -> String {
    format!(r"^\s*[A-Za-z]+\s+{OPERAND}\s*,\s*{OPERAND}\s*\(\s*{OPERAND}\s*\)\s*$")
}

/// 折叠转义序列并返回 UTF-8 字节
///
/// 未识别的转义原样保留（反斜杠与后随字符都保留）。
pub fn collapse_escapes(text: &str) -> Vec<u8> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out.into_bytes()
}
