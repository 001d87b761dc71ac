//! Price hints in listing text.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::Prices;

/// "80 zł/h", "80PLN/h"
static HOURLY_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+) ?(zł|PLN)/h").unwrap());

/// "od 150 zł", "od150PLN"
static BASE_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)od ?(\d+) ?(zł|PLN)").unwrap());

/// "min. 3h", "minimum 2 godz"
static MINIMUM_HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)min(?:imum|\.)? ?(\d+) ?(h\b|godz)").unwrap());

fn first_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse hourly and base prices. `None` when neither pattern matches.
pub fn parse_prices(text: &str) -> Option<Prices> {
    let price_per_hour = first_number(&HOURLY_RATE, text);
    let base_price = first_number(&BASE_PRICE, text);

    if price_per_hour.is_none() && base_price.is_none() {
        return None;
    }

    Some(Prices {
        base_price: base_price.unwrap_or(0),
        price_per_hour: price_per_hour.unwrap_or(0),
        minimum_hours: first_number(&MINIMUM_HOURS, text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_prices() {
        let prices = parse_prices("Sprzątanie od 150 zł, stawka 40 zł/h").unwrap();
        assert_eq!(prices.base_price, 150);
        assert_eq!(prices.price_per_hour, 40);
        assert_eq!(prices.minimum_hours, None);
    }

    #[test]
    fn test_hourly_only_defaults_base() {
        let prices = parse_prices("35PLN/h, min. 3h").unwrap();
        assert_eq!(prices.base_price, 0);
        assert_eq!(prices.price_per_hour, 35);
        assert_eq!(prices.minimum_hours, Some(3));
    }

    #[test]
    fn test_base_only_case_insensitive() {
        let prices = parse_prices("OD 200 ZŁ").unwrap();
        assert_eq!(prices.base_price, 200);
        assert_eq!(prices.price_per_hour, 0);
    }

    #[test]
    fn test_no_prices() {
        assert_eq!(parse_prices("Zadzwoń po wycenę"), None);
        assert_eq!(parse_prices("min. 2h"), None);
    }
}
