//! Scraping and parsing services used by the pipeline stages.

pub mod detail_fetcher;
pub mod detail_parser;
pub mod list_scraper;

pub use detail_fetcher::DetailFetcher;
pub use list_scraper::{ListPageParser, ListScraper};
