mod curator;
mod keywords;
mod learning;

pub use curator::{paginate, remove_from_pages, sort_by_date, ArticleCurator};
pub use keywords::{extract_keywords, KEYWORDS_PER_ARTICLE};
pub use learning::PreferenceModel;
