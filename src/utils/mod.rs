//! 工具函数
pub mod url_resolver;
pub mod value;

pub use self::url_resolver::resolve_url;
pub use self::value::{stringify, stringify_list};
