//! HTML文本处理模块
pub mod html_text;

pub use self::html_text::{format_html, unescape_html3, unescape_html4};
