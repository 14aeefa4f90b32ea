// src/services/list_scraper.rs

//! Registry listing scraper.
//!
//! The listing is a paged HTML table behind a search form. The scraper reads
//! the match count, then replays the form once per page with a large page
//! size. Parsing is kept in plain functions over `&str` so no `Html` value
//! lives across an `.await`.

use std::time::Duration;

use reqwest::Client;
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{CrawlerConfig, ListSelectors, RegistryRecord, Snapshot};
use crate::utils::http;
use crate::utils::log;
use crate::utils::resolve;
use crate::utils::retry::RetryPolicy;

/// Rows parsed from one listing page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PageRows {
    pub records: Vec<RegistryRecord>,
    /// Rows without a link or with too few cells
    pub skipped: usize,
}

/// A form submission rebuilt from the page markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRequest {
    /// Absolute action URL
    pub action: String,
    pub is_post: bool,
    pub fields: Vec<(String, String)>,
}

/// Compiled selectors for the listing page.
pub struct ListPageParser {
    total: Selector,
    rows: Selector,
    form: Selector,
    link: Selector,
    cell: Selector,
    controls: Selector,
    selected_option: Selector,
    page_size_field: String,
    current_page_field: String,
}

impl ListPageParser {
    pub fn new(selectors: &ListSelectors) -> Result<Self> {
        Ok(Self {
            total: parse_selector(&selectors.total_count)?,
            rows: parse_selector(&selectors.rows)?,
            form: parse_selector(&selectors.form)?,
            link: parse_selector("a[href]")?,
            cell: parse_selector("td")?,
            controls: parse_selector("input[name], select[name], textarea[name]")?,
            selected_option: parse_selector("option")?,
            page_size_field: selectors.page_size_field.clone(),
            current_page_field: selectors.current_page_field.clone(),
        })
    }

    /// Total number of matches announced by the pager.
    pub fn total_count(&self, html: &str) -> Result<usize> {
        let document = Html::parse_document(html);
        let text: String = document
            .select(&self.total)
            .next()
            .ok_or_else(|| AppError::validation("match count not found on listing page"))?
            .text()
            .collect();
        let digits: String = text.chars().filter(char::is_ascii_digit).collect();
        digits
            .parse()
            .map_err(|_| AppError::validation(format!("unreadable match count {text:?}")))
    }

    /// Registry rows of one page.
    ///
    /// The first link gives the TypeID (its text) and the detail URL; cells
    /// 1 to 4 give EIN, type name, status and last update.
    pub fn rows(&self, html: &str, page_url: &str) -> PageRows {
        let document = Html::parse_document(html);
        let mut page = PageRows::default();

        for row in document.select(&self.rows) {
            match self.parse_row(&row, page_url) {
                Some(record) => page.records.push(record),
                None => {
                    page.skipped += 1;
                    ::log::warn!(
                        "Skipping unreadable listing row: {}",
                        collapse(&row.text().collect::<String>())
                    );
                }
            }
        }
        page
    }

    fn parse_row(&self, row: &ElementRef, page_url: &str) -> Option<RegistryRecord> {
        let link = row.select(&self.link).next()?;
        let type_id = collapse(&link.text().collect::<String>());
        if type_id.is_empty() {
            return None;
        }
        let href = link.value().attr("href")?;

        let cells: Vec<String> = row
            .select(&self.cell)
            .map(|c| collapse(&c.text().collect::<String>()))
            .collect();
        if cells.len() < 5 {
            return None;
        }

        Some(RegistryRecord {
            type_id,
            ein: cells[1].clone(),
            type_name: cells[2].clone(),
            status: cells[3].clone(),
            last_update: cells[4].clone(),
            url: resolve(page_url, href.trim()),
        })
    }

    /// Rebuild the search form with the paging fields overridden.
    pub fn form_request(
        &self,
        html: &str,
        page_url: &str,
        page: usize,
        page_size: usize,
    ) -> Result<FormRequest> {
        let document = Html::parse_document(html);
        let form = document
            .select(&self.form)
            .next()
            .ok_or_else(|| AppError::validation("search form not found on listing page"))?;

        let action = form
            .value()
            .attr("action")
            .map(|a| resolve(page_url, a))
            .unwrap_or_else(|| page_url.to_string());
        let is_post = form
            .value()
            .attr("method")
            .is_some_and(|m| m.eq_ignore_ascii_case("post"));

        let mut fields = Vec::new();
        let mut page_size_name = None;
        let mut current_page_name = None;

        for control in form.select(&self.controls) {
            let el = control.value();
            let Some(name) = el.attr("name") else { continue };
            let id = el.attr("id").unwrap_or_default();

            if id == self.page_size_field {
                page_size_name = Some(name.to_string());
                continue;
            }
            if id == self.current_page_field {
                current_page_name = Some(name.to_string());
                continue;
            }

            let value = match el.name() {
                "input" => {
                    let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
                    match kind.as_str() {
                        "submit" | "button" | "image" | "reset" | "file" => continue,
                        "checkbox" | "radio" if el.attr("checked").is_none() => continue,
                        "checkbox" | "radio" => el.attr("value").unwrap_or("on").to_string(),
                        _ => el.attr("value").unwrap_or_default().to_string(),
                    }
                }
                "select" => {
                    let options: Vec<ElementRef> = control.select(&self.selected_option).collect();
                    options
                        .iter()
                        .find(|o| o.value().attr("selected").is_some())
                        .or_else(|| options.first())
                        .map(|o| {
                            o.value()
                                .attr("value")
                                .map(str::to_string)
                                .unwrap_or_else(|| collapse(&o.text().collect::<String>()))
                        })
                        .unwrap_or_default()
                }
                _ => control.text().collect(),
            };
            fields.push((name.to_string(), value));
        }

        fields.push((
            page_size_name.unwrap_or_else(|| self.page_size_field.clone()),
            page_size.to_string(),
        ));
        fields.push((
            current_page_name.unwrap_or_else(|| self.current_page_field.clone()),
            page.to_string(),
        ));

        Ok(FormRequest {
            action,
            is_post,
            fields,
        })
    }
}

/// Number of pages needed for `total` rows.
pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Collapse runs of whitespace and trim.
fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Crawls the whole registry listing into a snapshot.
pub struct ListScraper {
    client: Client,
    parser: ListPageParser,
    list_url: String,
    page_size: usize,
    max_pages: usize,
    delay: Duration,
    retry: RetryPolicy,
}

impl ListScraper {
    pub fn new(client: Client, config: &CrawlerConfig, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client,
            parser: ListPageParser::new(&config.selectors)?,
            list_url: config.list_url.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            delay: Duration::from_millis(config.request_delay_ms),
            retry,
        })
    }

    /// Fetch every listing page.
    pub async fn fetch_all(&self) -> Result<Snapshot> {
        let mut html = http::fetch_text_with_retry(&self.client, &self.list_url, &self.retry).await?;
        let total = self.parser.total_count(&html)?;
        let pages = page_count(total, self.page_size);
        if pages > self.max_pages {
            return Err(AppError::validation(format!(
                "listing announces {total} entries ({pages} pages), above the {} page limit",
                self.max_pages
            )));
        }
        log::sub_item(&format!(
            "{total} registry entries, {pages} pages of {}",
            self.page_size
        ));

        let mut records = Vec::new();
        let mut skipped = 0;
        for page in 1..=pages {
            let request = self
                .parser
                .form_request(&html, &self.list_url, page, self.page_size)?;
            html = self.submit(&request).await?;

            let rows = self.parser.rows(&html, &request.action);
            ::log::info!(
                "Page {page}/{pages}: {} rows ({} skipped)",
                rows.records.len(),
                rows.skipped
            );
            skipped += rows.skipped;
            records.extend(rows.records);

            if page < pages && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        if records.len() + skipped < total {
            ::log::warn!(
                "Listing announced {total} entries but {} rows were read",
                records.len() + skipped
            );
        }

        let mut snapshot = Snapshot::from_records(records);
        snapshot.skipped_rows += skipped;
        snapshot.total_rows += skipped;
        Ok(snapshot)
    }

    async fn submit(&self, request: &FormRequest) -> Result<String> {
        let operation = format!("listing page via {}", request.action);
        self.retry
            .run_if(&operation, AppError::is_transient, || async move {
                if request.is_post {
                    http::post_form(&self.client, &request.action, &request.fields).await
                } else {
                    let url = reqwest::Url::parse_with_params(&request.action, &request.fields)?;
                    http::fetch_text(&self.client, url.as_str()).await
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="Pagination"><p class="Matches"><strong>1 234</strong> matches</p></div>
          <form id="SearchForm" action="/Eratv/Home/List" method="post">
            <input type="hidden" name="__RequestVerificationToken" value="tok" />
            <input type="text" name="Search.TypeName" value="" />
            <input type="checkbox" name="Search.Valid" value="true" checked />
            <input type="checkbox" name="Search.Old" value="true" />
            <select name="Search.Country"><option value="">All</option><option value="FR" selected>France</option></select>
            <input type="hidden" id="PagedGrid_PageSize" name="PagedGrid.PageSize" value="10" />
            <input type="hidden" id="PagedGrid_CurrentPage" name="PagedGrid.CurrentPage" value="1" />
            <input type="submit" name="go" value="Search" />
          </form>
          <table class="Tabular"><tbody>
            <tr><td><a href="/Eratv/Home/View/12-345">12-345</a></td><td>EIN-1</td><td>Regio
              Shuttle</td><td>Valid</td><td>2025-01-01</td></tr>
            <tr><td>no link</td><td>x</td><td>x</td><td>x</td><td>x</td></tr>
            <tr><td><a href="View?id=9">9</a></td><td>EIN-9</td></tr>
          </tbody></table>
        </body></html>"#;

    const BASE: &str = "https://eratv.era.europa.eu/Eratv/Home/List";

    fn parser() -> ListPageParser {
        ListPageParser::new(&ListSelectors::default()).unwrap()
    }

    #[test]
    fn test_total_count_ignores_separators() {
        assert_eq!(parser().total_count(PAGE).unwrap(), 1234);
    }

    #[test]
    fn test_total_count_missing() {
        assert!(parser().total_count("<html></html>").is_err());
    }

    #[test]
    fn test_rows() {
        let rows = parser().rows(PAGE, BASE);
        assert_eq!(rows.skipped, 2);
        assert_eq!(
            rows.records,
            vec![RegistryRecord {
                type_id: "12-345".into(),
                ein: "EIN-1".into(),
                type_name: "Regio Shuttle".into(),
                status: "Valid".into(),
                last_update: "2025-01-01".into(),
                url: "https://eratv.era.europa.eu/Eratv/Home/View/12-345".into(),
            }]
        );
    }

    #[test]
    fn test_form_replay_overrides_paging() {
        let form = parser().form_request(PAGE, BASE, 3, 100).unwrap();
        assert!(form.is_post);
        assert_eq!(form.action, BASE);

        let get = |k: &str| {
            form.fields
                .iter()
                .find(|(n, _)| n == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("__RequestVerificationToken"), Some("tok"));
        assert_eq!(get("Search.Valid"), Some("true"));
        assert_eq!(get("Search.Old"), None);
        assert_eq!(get("Search.Country"), Some("FR"));
        assert_eq!(get("go"), None);
        assert_eq!(get("PagedGrid.PageSize"), Some("100"));
        assert_eq!(get("PagedGrid.CurrentPage"), Some("3"));
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 100), 0);
        assert_eq!(page_count(100, 100), 1);
        assert_eq!(page_count(101, 100), 2);
        assert_eq!(page_count(5, 0), 0);
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("[[invalid").is_err());
    }
}
