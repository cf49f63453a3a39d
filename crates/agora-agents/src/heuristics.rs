//! Free-text reply interpretation
//!
//! Counterparties are not guaranteed to send structured negotiation
//! metadata. When a seller's reply carries none, the buyer reads the text:
//! a quoted counter price first, then rejection phrases, then acceptance
//! phrases.

use once_cell::sync::Lazy;
use regex::Regex;

/// Units recognised next to a number regardless of the product currency
const COMMON_UNITS: &[&str] = &["USD", "IUSD", "HBAR", "USDC"];

/// Quoted prices closer than this to the offer restate it
const PRICE_TOLERANCE: f64 = 1e-6;

const NUMBER: &str = r"(?:\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)";

static REJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(reject(?:ed|s)?|declin(?:e|ed|ing)|too low|cannot accept|can'?t accept|can not accept|won'?t accept|unacceptable|no deal|not interested|not for sale|sold out)\b",
    )
    .expect("Failed to compile rejection regex")
});

static ACCEPTANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(accept(?:ed|s)?|deal|agreed?|sounds good|it'?s yours|you got it|sold)\b")
        .expect("Failed to compile acceptance regex")
});

static COMMON_PRICE: Lazy<Regex> =
    Lazy::new(|| price_pattern(COMMON_UNITS).expect("Failed to compile price regex"));

static BUDGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:budget|under|max(?:imum)?|up to|at most|spend)\b(?:\s+(?:is|of))?\s*:?\s*\$?\s?(?P<amount>{NUMBER})"
    ))
    .expect("Failed to compile budget regex")
});

/// Words that never identify a product
const STOP_WORDS: &[&str] = &[
    "and", "any", "budget", "buy", "for", "get", "have", "looking", "max", "maximum", "most", "need",
    "please", "some", "spend", "the", "under", "want", "with", "you", "hbar", "usd", "usdc", "iusd",
];

/// What a free-text reply amounts to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplySignal {
    Accepted,
    PriceQuoted(f64),
    Rejected,
    Unclear,
}

/// Read a seller's free-text reply to an offer of `offered`.
///
/// `currency` is the product's currency; it is recognised as a unit in
/// addition to the common ones. A quoted price other than the offer is a
/// counter even next to a rejection phrase ("too low, but I can do 9.5
/// HBAR"); when several are quoted the last one wins. A price equal to the
/// offer is the seller restating it, so a rejection phrase decides.
pub fn interpret_reply(text: &str, currency: &str, offered: f64) -> ReplySignal {
    let prices = quoted_prices(text, currency);
    let counter = prices
        .iter()
        .rev()
        .find(|p| (*p - offered).abs() > PRICE_TOLERANCE)
        .copied();

    if let Some(price) = counter {
        return ReplySignal::PriceQuoted(price);
    }
    if REJECTION.is_match(text) {
        return ReplySignal::Rejected;
    }
    if let Some(price) = prices.last() {
        return ReplySignal::PriceQuoted(*price);
    }
    if ACCEPTANCE.is_match(text) {
        return ReplySignal::Accepted;
    }
    ReplySignal::Unclear
}

/// Last `number + unit`, `unit + number` or `$number` in `text`
pub fn quoted_price(text: &str, currency: &str) -> Option<f64> {
    quoted_prices(text, currency).pop()
}

/// Every quoted price in `text`, in order of appearance
pub fn quoted_prices(text: &str, currency: &str) -> Vec<f64> {
    let known = COMMON_UNITS
        .iter()
        .any(|u| u.eq_ignore_ascii_case(currency.trim()));

    let custom = if known || currency.trim().is_empty() {
        None
    } else {
        let mut units: Vec<&str> = COMMON_UNITS.to_vec();
        units.push(currency.trim());
        price_pattern(&units)
    };
    let pattern: &Regex = custom.as_ref().unwrap_or(&*COMMON_PRICE);

    pattern
        .captures_iter(text)
        .filter_map(|caps| {
            caps.name("dollar")
                .or_else(|| caps.name("before"))
                .or_else(|| caps.name("after"))
        })
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|p| p.is_finite() && *p > 0.0)
        .collect()
}

/// Budget stated in a purchase request: `budget 10`, `under $25`,
/// `max 3 HBAR`, or failing those any quoted price
pub fn extract_budget(text: &str, currency: &str) -> Option<f64> {
    BUDGET
        .captures(text)
        .and_then(|caps| caps.name("amount"))
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|b| b.is_finite() && *b > 0.0)
        .or_else(|| quoted_price(text, currency))
}

/// Lowercase words of three or more letters that can identify a product
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn price_pattern(units: &[&str]) -> Option<Regex> {
    let units = units
        .iter()
        .map(|u| regex::escape(u))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r"(?i)\$\s?(?P<dollar>{n})|(?P<before>{n})\s?(?:{u})\b|\b(?:{u})\s?(?P<after>{n})",
        n = NUMBER,
        u = units
    );
    Regex::new(&pattern).ok()
}
