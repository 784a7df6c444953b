pub mod models;
pub mod parser;
pub mod source;

pub use models::FeedEntry;
pub use parser::{ParseError, parse_feed};
pub use source::{FeedSource, TransportError, build_source};
