mod fetcher;
mod opml;
mod parser;
mod text;
mod xml;

pub use fetcher::{Downloader, FetchOutcome};
pub use self::opml::{export_opml, parse_opml};
pub use parser::{parse_datetime, parse_feed};
pub use text::{clean_description, decode_body, decode_entities};
