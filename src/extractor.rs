//! Product extraction from retailer category pages.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::browser::PageDriver;
use crate::config::{CategoryConfig, CrawlConfig, SiteConfig};
use crate::error::ScrapeError;
use crate::normalizer::{normalize_listing, parse_price};
use crate::types::{RawListing, ScrapedItem};

/// URL of page `page_number` (1-based) of a category listing.
pub fn page_url(
    site: &SiteConfig,
    category: &CategoryConfig,
    page_number: u32,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&site.base_url)?.join(&category.path)?;
    if page_number > 1 {
        let offset = (page_number - 1) * site.page_size;
        url.query_pairs_mut()
            .append_pair(&site.offset_param, &offset.to_string());
    }
    Ok(url)
}

/// Load one listing page in the browser and return its normalized items.
///
/// Navigation and the product-grid wait each carry their own timeout; either
/// one failing fails the page.
pub async fn extract_category_page<P>(
    page: &mut P,
    site: &SiteConfig,
    category: &CategoryConfig,
    page_number: u32,
    crawl: &CrawlConfig,
) -> Result<Vec<ScrapedItem>, ScrapeError>
where
    P: PageDriver + ?Sized,
{
    let url = page_url(site, category, page_number)?;
    let nav_timeout = crawl.navigation_timeout();

    tokio::time::timeout(nav_timeout, page.navigate(url.as_str()))
        .await
        .map_err(|_| ScrapeError::NavigationTimeout {
            url: url.to_string(),
            timeout: nav_timeout,
        })??;
    page.wait_for_selector(&site.grid_selector, crawl.selector_timeout())
        .await?;

    let html = page.content().await?;
    let listings = extract_listings(&html, site);

    let mut items = Vec::with_capacity(listings.len());
    for raw in &listings {
        match normalize_listing(raw, site.retailer, category) {
            Ok(item) => items.push(item),
            Err(rejection) => debug!(item = %raw.name, %rejection, "skipping listing"),
        }
    }

    debug!(
        category = %category.name,
        page = page_number,
        cards = listings.len(),
        items = items.len(),
        "extracted page"
    );
    Ok(items)
}

/// Pull product cards out of a rendered listing page.
///
/// Cards come from the site's primary selector, or from the first fallback
/// selector that matches when the layout has drifted. Cards without a name
/// or a parseable price are left out.
pub fn extract_listings(html: &str, site: &SiteConfig) -> Vec<RawListing> {
    let document = Html::parse_document(html);
    let Ok(base) = Url::parse(&site.base_url) else {
        warn!(base_url = %site.base_url, "site base_url is not a valid URL");
        return Vec::new();
    };

    let card_selectors =
        std::iter::once(&site.card_selector).chain(site.fallback_card_selectors.iter());

    for (attempt, selector_str) in card_selectors.enumerate() {
        let Ok(card_selector) = Selector::parse(selector_str) else {
            warn!(selector = %selector_str, "invalid card selector");
            continue;
        };
        let cards: Vec<ElementRef> = document.select(&card_selector).collect();
        if cards.is_empty() {
            continue;
        }
        if attempt > 0 {
            warn!(
                selector = %selector_str,
                "primary card selector matched nothing, using fallback"
            );
        }
        return cards
            .into_iter()
            .filter_map(|card| extract_card(card, site, &base))
            .collect();
    }

    Vec::new()
}

fn extract_card(card: ElementRef, site: &SiteConfig, base: &Url) -> Option<RawListing> {
    let label = get_text_from_selectors(card, &site.label_selectors);
    if label.is_empty() {
        return None;
    }
    let brand = get_text_from_selectors(card, &site.brand_selectors);
    let name = if brand.is_empty() || label.starts_with(&brand) {
        label
    } else {
        format!("{} {}", brand, label)
    };

    let dollars = get_text_from_selectors(card, &site.dollars_selectors);
    let cents = get_text_from_selectors(card, &site.cents_selectors);
    let price_text = compose_price(&dollars, &cents);
    parse_price(&price_text)?;

    let url = get_href_from_selectors(card, &site.link_selectors)
        .and_then(|href| base.join(&href).ok())
        .map(String::from)
        .unwrap_or_default();

    Some(RawListing {
        name,
        price_text,
        sku: get_sku(card, &site.sku_attributes),
        unit_hint: get_text_from_selectors(card, &site.unit_selectors),
        url,
    })
}

/// Join a dollars node and a separate cents node, e.g. `"$12"` + `"97"`.
pub fn compose_price(dollars: &str, cents: &str) -> String {
    let dollars = dollars.trim();
    let cents: String = cents.chars().filter(|c| c.is_ascii_digit()).collect();
    if cents.is_empty() || dollars.contains('.') {
        dollars.to_string()
    } else {
        format!("{}.{}", dollars, cents)
    }
}

fn get_text_from_selectors(card: ElementRef, selectors: &[String]) -> String {
    for sel_str in selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(element) = card.select(&selector).next() {
                let text: String = element.text().collect::<Vec<_>>().join(" ");
                let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !cleaned.is_empty() {
                    return cleaned;
                }
            }
        }
    }
    String::new()
}

fn get_href_from_selectors(card: ElementRef, selectors: &[String]) -> Option<String> {
    if let Some(href) = card.value().attr("href") {
        return Some(href.to_string());
    }
    for sel_str in selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(href) = card
                .select(&selector)
                .find_map(|element| element.value().attr("href"))
            {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn get_sku(card: ElementRef, attributes: &[String]) -> String {
    for attr in attributes {
        if let Some(value) = card.value().attr(attr) {
            return value.trim().to_string();
        }
        let Ok(selector) = Selector::parse(&format!("[{}]", attr)) else {
            continue;
        };
        if let Some(value) = card
            .select(&selector)
            .find_map(|element| element.value().attr(attr))
        {
            return value.trim().to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_sites;

    fn home_depot() -> SiteConfig {
        default_sites().remove(0)
    }

    fn pod(id: &str, brand: &str, label: &str, dollars: &str, cents: &str) -> String {
        format!(
            r#"<div data-testid="product-pod" data-product-id="{id}">
                 <p data-testid="attribute-brandname-above">{brand}</p>
                 <div data-testid="product-header"><a href="/p/{id}"><span class="product-header__title-product">{label}</span></a></div>
                 <div class="price-format__main-price"><span>$</span><span>{dollars}</span><span>{cents}</span></div>
               </div>"#
        )
    }

    #[test]
    fn extracts_cards_with_split_prices() {
        let html = format!(
            "<html><body>{}{}</body></html>",
            pod("100", "Behr", "Ultra Interior Paint", "38", "98"),
            pod("200", "Southwire", "12/2 Romex", "1,234", "56"),
        );
        let listings = extract_listings(&html, &home_depot());

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "Behr Ultra Interior Paint");
        assert_eq!(listings[0].price_text, "38.98");
        assert_eq!(listings[0].sku, "100");
        assert_eq!(listings[0].url, "https://www.homedepot.com/p/100");
        assert_eq!(parse_price(&listings[1].price_text), Some(1234.56));
    }

    #[test]
    fn skips_cards_missing_name_or_price() {
        let html = format!(
            "<html><body>{}{}{}</body></html>",
            pod("1", "Behr", "", "10", "00"),
            pod("2", "Behr", "Primer", "", ""),
            pod("3", "Behr", "Ceiling Paint", "24", "97"),
        );
        let listings = extract_listings(&html, &home_depot());
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].sku, "3");
    }

    #[test]
    fn falls_back_when_primary_selector_drifts() {
        let html = r#"<html><body>
            <div class="browse-search__pod" data-sku="777">
              <span class="product-header__title-product">OSB Sheathing</span>
              <div class="price-format__main-price"><span>$</span><span>15</span><span>48</span></div>
              <a href="https://www.homedepot.com/p/777">view</a>
            </div></body></html>"#;
        let listings = extract_listings(html, &home_depot());
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "OSB Sheathing");
        assert_eq!(listings[0].sku, "777");
        assert_eq!(listings[0].price_text, "15.48");
    }

    #[test]
    fn composes_prices() {
        assert_eq!(compose_price("$12", "97"), "$12.97");
        assert_eq!(compose_price("12.97", "97"), "12.97");
        assert_eq!(compose_price("12", ""), "12");
    }

    #[test]
    fn page_urls_carry_item_offsets() {
        let site = home_depot();
        let category = &site.categories[0];
        let first = page_url(&site, category, 1).unwrap();
        assert!(first.query().is_none());
        let third = page_url(&site, category, 3).unwrap();
        assert_eq!(third.query(), Some("Nao=48"));
        assert!(third.as_str().starts_with("https://www.homedepot.com/b/"));
    }
}
