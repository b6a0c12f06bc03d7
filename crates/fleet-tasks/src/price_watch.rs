use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use fleet_core::{TaskHandler, WorkerError};

const MAIN_INFO_SELECTOR: &str = "div[data-qaid='main_product_info']";
const PRICE_SELECTOR: &str = "div[data-qaid='product_price']";
const STATUS_SELECTOR: &str = "span[data-qaid='product_presence']";
const ORDER_COUNTER_SELECTOR: &str = "span[data-qaid='order_counter']";
const RATING_SELECTOR: &str = "div[data-qaid='product_rating']";
const NOT_FOUND_SELECTOR: &str = "span[data-qaid='page_not_found_title']";
const DELETED_WARNING_SELECTOR: &str = "div[data-qaid='warning_panel']";

/// Availability labels as they appear on product pages, mapped to the
/// numeric codes the reporting side expects. Matched against the lowercased
/// status text.
const STATUS_LABELS: &[(&str, u8)] = &[
    ("недоступний", 0),
    ("недоступен", 0),
    ("в наявності", 1),
    ("в наличии", 1),
    ("готово до відправки", 2),
    ("готово к отправке", 2),
    ("під замовлення", 3),
    ("под заказ", 3),
];

const STATUS_DELETED: u8 = 4;
const STATUS_UNRESOLVED: u8 = 5;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause between page loads so the storefront is not hammered.
const PAGE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PriceWatchParams {
    products: Vec<ProductRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductRef {
    #[serde(default)]
    product_id: Option<Value>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProductSnapshot {
    product_id: Value,
    status_id: u8,
    price: Option<f64>,
    order_quantity: Option<i64>,
    rating: Option<f64>,
}

/// Watches storefront product pages: price, availability status, order
/// counter and rating per product.
pub struct PriceWatchTask {
    http: reqwest::Client,
}

impl PriceWatchTask {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36")
            .build()
            .unwrap_or_default();
        Self { http }
    }

    async fn fetch(&self, url: &str) -> Result<String, WorkerError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WorkerError::Execution(format!("page fetch failed for {url}: {e}")))?;

        response
            .text()
            .await
            .map_err(|e| WorkerError::Execution(format!("page body unreadable for {url}: {e}")))
    }
}

impl Default for PriceWatchTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for PriceWatchTask {
    fn task_type(&self) -> &'static str {
        "prom_pars"
    }

    async fn run(&self, params: &Value) -> Result<Value, WorkerError> {
        let params: PriceWatchParams = serde_json::from_value(params.clone())?;

        info!("PRICE_WATCH: Scraping {} products", params.products.len());

        let mut scraped = Vec::new();
        for product in &params.products {
            let (Some(product_id), Some(url)) = (&product.product_id, product.url.as_deref())
            else {
                // Entries without id or url are silently skipped.
                continue;
            };

            let body = self.fetch(url).await?;
            let snapshot = extract_snapshot(product_id.clone(), &body);
            debug!(
                "PRICE_WATCH: Product {} -> status {}",
                snapshot.product_id, snapshot.status_id
            );
            scraped.push(snapshot);

            tokio::time::sleep(PAGE_PAUSE).await;
        }

        let data =
            serde_json::to_value(&scraped).map_err(|e| WorkerError::Execution(e.to_string()))?;
        Ok(json!({ "status": "success", "data": data }))
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("selector constants are valid CSS")
}

fn extract_snapshot(product_id: Value, body: &str) -> ProductSnapshot {
    let doc = Html::parse_document(body);

    let mut snapshot = ProductSnapshot {
        product_id,
        status_id: STATUS_UNRESOLVED,
        price: None,
        order_quantity: None,
        rating: None,
    };

    // A deleted listing shows only the warning panel; nothing else to read.
    if doc.select(&selector(DELETED_WARNING_SELECTOR)).next().is_some() {
        snapshot.status_id = STATUS_DELETED;
        return snapshot;
    }

    if let Some(status_el) = doc.select(&selector(STATUS_SELECTOR)).next() {
        let status_text = status_el.text().collect::<String>().to_lowercase();
        if let Some((_, code)) = STATUS_LABELS
            .iter()
            .find(|(label, _)| status_text.contains(label))
        {
            snapshot.status_id = *code;
        }
    } else if doc.select(&selector(NOT_FOUND_SELECTOR)).next().is_some() {
        snapshot.status_id = 0;
    }

    if let Some(main_info) = doc.select(&selector(MAIN_INFO_SELECTOR)).next() {
        snapshot.price = main_info
            .select(&selector(PRICE_SELECTOR))
            .next()
            .and_then(|el| el.value().attr("data-qaprice"))
            .and_then(|raw| raw.parse().ok());

        snapshot.order_quantity = main_info
            .select(&selector(ORDER_COUNTER_SELECTOR))
            .next()
            .and_then(|el| extract_number(&el.text().collect::<String>()));
    }

    snapshot.rating = doc
        .select(&selector(RATING_SELECTOR))
        .next()
        .and_then(|el| el.value().attr("data-qarating"))
        .and_then(|raw| raw.parse().ok());

    snapshot
}

/// First run of digits in the text, if any.
fn extract_number(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
