//! HTML文本处理
//! 为脚本宿主提供实体解码与正文排版，基于 html5ever 分词器

use std::cell::{Cell, RefCell};
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use tendril::StrTendril;

/// 段落缩进（两个全角空格）
pub const PARAGRAPH_INDENT: &str = "\u{3000}\u{3000}";

/// 视为换行的标签
const LINE_BREAK_TAGS: &[&str] = &[
    "br", "p", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "blockquote", "pre", "dd", "dt", "hr",
];

/// HTML 3.2 / ISO-8859-1 命名实体，依次对应 U+00A0..=U+00FF
const LATIN1_ENTITIES: [&str; 96] = [
    "nbsp", "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect", "uml", "copy", "ordf",
    "laquo", "not", "shy", "reg", "macr", "deg", "plusmn", "sup2", "sup3", "acute", "micro",
    "para", "middot", "cedil", "sup1", "ordm", "raquo", "frac14", "frac12", "frac34", "iquest",
    "Agrave", "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig", "Ccedil", "Egrave",
    "Eacute", "Ecirc", "Euml", "Igrave", "Iacute", "Icirc", "Iuml", "ETH", "Ntilde", "Ograve",
    "Oacute", "Ocirc", "Otilde", "Ouml", "times", "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml",
    "Yacute", "THORN", "szlig", "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig",
    "ccedil", "egrave", "eacute", "ecirc", "euml", "igrave", "iacute", "icirc", "iuml", "eth",
    "ntilde", "ograve", "oacute", "ocirc", "otilde", "ouml", "divide", "oslash", "ugrave",
    "uacute", "ucirc", "uuml", "yacute", "thorn", "yuml",
];

/// 实体名最大长度（含 `#x` 前缀的数字实体）
const MAX_ENTITY_LEN: usize = 10;

fn lookup_html3_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        _ => LATIN1_ENTITIES
            .iter()
            .position(|entity| *entity == name)
            .and_then(|pos| char::from_u32(0xA0 + pos as u32)),
    }
}

fn decode_numeric(reference: &str) -> Option<char> {
    let code = match reference.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => reference.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

/// 解码 HTML 3 实体（基础实体、ISO-8859-1 命名实体、数字引用），无法识别的原样保留
pub fn unescape_html3(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let decoded = tail
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|(_, c)| *c == ';')
            .and_then(|(semi, _)| {
                let name = &tail[..semi];
                let c = match name.strip_prefix('#') {
                    Some(number) => decode_numeric(number),
                    None => lookup_html3_entity(name),
                }?;
                Some((c, semi))
            });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// 分词器输出收集方式
#[derive(Debug, Clone, Copy, PartialEq)]
enum SinkMode {
    /// 仅收集字符
    Unescape,
    /// 块级标签转换行，忽略脚本与样式
    Format,
}

/// 文本收集器
#[derive(Debug)]
struct TextSink {
    mode: SinkMode,
    buf: RefCell<String>,
    skipping: Cell<bool>,
}

impl TokenSink for TextSink {
    type Handle = ();

    fn process_token(&self, token: Token, _line: u64) -> TokenSinkResult<()> {
        match token {
            Token::CharacterTokens(text) => {
                if !self.skipping.get() {
                    self.buf.borrow_mut().push_str(&text);
                }
            }
            Token::TagToken(Tag { kind, name, .. }) if self.mode == SinkMode::Format => {
                let tag: &str = name.as_ref();
                match (kind, tag) {
                    (TagKind::StartTag, "script") => {
                        self.skipping.set(true);
                        return TokenSinkResult::RawData(RawKind::ScriptData);
                    }
                    (TagKind::StartTag, "style") => {
                        self.skipping.set(true);
                        return TokenSinkResult::RawData(RawKind::Rawtext);
                    }
                    (TagKind::EndTag, "script" | "style") => self.skipping.set(false),
                    (_, tag) if LINE_BREAK_TAGS.contains(&tag) => self.buf.borrow_mut().push('\n'),
                    _ => {}
                }
            }
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

impl TextSink {
    fn new(mode: SinkMode) -> Self {
        Self {
            mode,
            buf: RefCell::new(String::new()),
            skipping: Cell::new(false),
        }
    }

    /// 运行分词器并返回收集到的文本
    fn run(self, html: &str) -> String {
        let tokenizer = Tokenizer::new(self, TokenizerOpts::default());
        let queue = BufferQueue::default();
        queue.push_back(StrTendril::from(html));

        let _ = tokenizer.feed(&queue);
        tokenizer.end();

        tokenizer.sink.buf.take()
    }
}

/// 解码全部 HTML 命名实体与数字引用
pub fn unescape_html4(input: &str) -> String {
    // 转义 `<` 使整段输入都作为字符数据处理
    TextSink::new(SinkMode::Unescape).run(&input.replace('<', "&lt;"))
}

/// HTML 转为分段纯文本：块级标签换行，逐行去空白并丢弃空行，每行加段落缩进
pub fn format_html(html: &str) -> String {
    TextSink::new(SinkMode::Format)
        .run(html)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("{}{}", PARAGRAPH_INDENT, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_html3() {
        assert_eq!(unescape_html3("a &amp; b &lt;c&gt; &quot;d&quot;"), "a & b <c> \"d\"");
        assert_eq!(unescape_html3("&nbsp;&copy;&yuml;&Agrave;"), "\u{a0}©ÿÀ");
        assert_eq!(unescape_html3("&#20013;&#x6587;"), "中文");
        // 无法识别的实体保持原样
        assert_eq!(unescape_html3("&hellip; & &;"), "&hellip; & &;");
        assert_eq!(unescape_html3("AT&T"), "AT&T");
    }

    #[test]
    fn test_latin1_table_alignment() {
        assert_eq!(lookup_html3_entity("times"), Some('×'));
        assert_eq!(lookup_html3_entity("divide"), Some('÷'));
        assert_eq!(lookup_html3_entity("szlig"), Some('ß'));
    }

    #[test]
    fn test_unescape_html4() {
        assert_eq!(unescape_html4("&hellip;&mdash;&euro;"), "…—€");
        assert_eq!(unescape_html4("<b>&amp;</b>"), "<b>&</b>");
        assert_eq!(unescape_html4("&#x4E2D;"), "中");
    }

    #[test]
    fn test_format_html() {
        let html = "<div>  第一段 </div><p>第二段<br>第三段</p><script>var a = '<p>';</script><p>  </p>";
        assert_eq!(format_html(html), "　　第一段\n　　第二段\n　　第三段");
        assert_eq!(format_html("&nbsp;&nbsp;正文"), "　　正文");
    }
}
