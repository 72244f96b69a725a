//! Per-line and aggregate pricing for ticket line items.
//!
//! Every function here is pure. Values keep full precision while a quote is
//! being recomputed and are only rounded to the currency's minor unit by
//! [`Quote::rounded`], which callers apply before persisting.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer};

/// Number of fractional digits of the display currency.
pub const MINOR_UNIT_DIGITS: u32 = 2;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Raw line item as entered by the operator.
#[derive(Clone, Debug, PartialEq)]
pub struct LineInput {
    pub service_name: String,
    pub rate: Decimal,
    pub discount_percent: Decimal,
}

/// Line item after coercion, clamping and price computation.
#[derive(Clone, Debug, PartialEq)]
pub struct PricedLine {
    pub service_name: String,

    /// Never negative.
    pub rate: Decimal,

    /// Always within `0..=100`.
    pub discount_percent: Decimal,

    pub discount_value: Decimal,
    pub final_price: Decimal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub grand_total: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub totals: Totals,
}

/// Negative rates are treated as zero.
pub fn coerce_rate(rate: Decimal) -> Decimal {
    rate.max(Decimal::ZERO)
}

pub fn clamp_discount(percent: Decimal) -> Decimal {
    percent.clamp(Decimal::ZERO, HUNDRED)
}

pub fn price_line(line: &LineInput) -> PricedLine {
    let rate = coerce_rate(line.rate);
    let discount_percent = clamp_discount(line.discount_percent);
    let discount_value = rate * (discount_percent / HUNDRED);

    PricedLine {
        service_name: line.service_name.clone(),
        rate,
        discount_percent,
        discount_value,
        final_price: rate - discount_value,
    }
}

/// Prices every line and sums the results.
///
/// An empty slice yields zero totals; requiring at least one line is up to
/// the caller.
pub fn quote(lines: &[LineInput]) -> Quote {
    let lines = lines.iter().map(price_line).collect::<Vec<_>>();
    let totals = sum(&lines);
    Quote { lines, totals }
}

fn sum(lines: &[PricedLine]) -> Totals {
    let (subtotal, total_discount) = lines.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(subtotal, discount), line| {
            (
                subtotal.saturating_add(line.rate),
                discount.saturating_add(line.discount_value),
            )
        },
    );

    Totals {
        subtotal,
        total_discount,
        grand_total: subtotal - total_discount,
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(
        MINOR_UNIT_DIGITS,
        RoundingStrategy::MidpointAwayFromZero,
    )
}

impl Quote {
    /// Rounds every line to the minor unit and re-sums the totals from the
    /// rounded lines, so `grand_total` equals the sum of final prices.
    pub fn rounded(self) -> Self {
        let lines = self
            .lines
            .into_iter()
            .map(|line| {
                let rate = round_money(line.rate);
                let discount_value = round_money(line.discount_value);
                PricedLine {
                    rate,
                    discount_value,
                    final_price: rate - discount_value,
                    ..line
                }
            })
            .collect::<Vec<_>>();
        let totals = sum(&lines);
        Self { lines, totals }
    }
}

/// Reads a JSON value as an amount, mapping anything non-numeric to zero.
///
/// Numbers and numeric strings are accepted; `null`, booleans, garbage
/// strings, arrays and objects all become `0`.
pub fn lenient_amount(value: &serde_json::Value) -> Decimal {
    use serde_json::Value;

    let parse = |s: &str| {
        let s = s.trim();
        s.parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(s))
            .unwrap_or(Decimal::ZERO)
    };

    match value {
        Value::Number(n) => parse(&n.to_string()),
        Value::String(s) => parse(s),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Decimal::ZERO
        }
    }
}

/// `deserialize_with` adapter for [`lenient_amount`].
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(|v| lenient_amount(&v))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn line(rate: i64, discount: i64) -> LineInput {
        LineInput {
            service_name: "Service".into(),
            rate: Decimal::from(rate),
            discount_percent: Decimal::from(discount),
        }
    }

    #[rstest]
    #[case(-10, 0)]
    #[case(0, 0)]
    #[case(55, 55)]
    #[case(100, 100)]
    #[case(150, 100)]
    fn clamps_discount(#[case] given: i64, #[case] expected: i64) {
        let priced = price_line(&line(1000, given));
        assert_eq!(priced.discount_percent, Decimal::from(expected));
    }

    #[test]
    fn negative_rate_is_zero() {
        let priced = price_line(&line(-250, 10));
        assert_eq!(priced.rate, Decimal::ZERO);
        assert_eq!(priced.final_price, Decimal::ZERO);
    }

    #[test]
    fn sums_totals() {
        let quote = quote(&[line(500, 0), line(1000, 10)]);

        assert_eq!(quote.totals.subtotal, Decimal::from(1500));
        assert_eq!(quote.totals.total_discount, Decimal::from(100));
        assert_eq!(quote.totals.grand_total, Decimal::from(1400));
        assert_eq!(quote.lines[0].final_price, Decimal::from(500));
        assert_eq!(quote.lines[1].discount_value, Decimal::from(100));
        assert_eq!(quote.lines[1].final_price, Decimal::from(900));
    }

    #[test]
    fn empty_quote_is_zero() {
        let quote = quote(&[]);
        assert!(quote.lines.is_empty());
        assert_eq!(quote.totals, Totals::default());
    }

    #[rstest]
    #[case("999.99", "33.333")]
    #[case("0", "-40")]
    #[case("12.5", "250")]
    #[case("0.07", "12.5")]
    fn repricing_is_idempotent(#[case] rate: &str, #[case] discount: &str) {
        let input = LineInput {
            service_name: "Repair".into(),
            rate: rate.parse().unwrap(),
            discount_percent: discount.parse().unwrap(),
        };

        let once = price_line(&input);
        let twice = price_line(&LineInput {
            service_name: once.service_name.clone(),
            rate: once.rate,
            discount_percent: once.discount_percent,
        });

        assert_eq!(once, twice);
        assert_eq!(price_line(&input), once);
    }

    #[test]
    fn rounds_only_on_request() {
        let quote = quote(&[LineInput {
            service_name: "Thermal paste".into(),
            rate: "10".parse().unwrap(),
            discount_percent: "33.333".parse().unwrap(),
        }]);

        assert_eq!(quote.lines[0].final_price, "6.6667".parse().unwrap());
        assert_eq!(
            round_money(quote.lines[0].final_price),
            "6.67".parse().unwrap()
        );
        assert_eq!(
            quote.rounded().totals.total_discount,
            "3.33".parse().unwrap()
        );
    }

    #[test]
    fn rounded_totals_match_rounded_lines() {
        let input = LineInput {
            service_name: "Keyboard".into(),
            rate: Decimal::from(999),
            discount_percent: "12.5".parse().unwrap(),
        };

        let single = quote(&[input.clone()]).rounded();
        assert_eq!(single.lines[0].discount_value, "124.88".parse().unwrap());
        assert_eq!(single.lines[0].final_price, "874.12".parse().unwrap());
        assert_eq!(single.totals.grand_total, "874.12".parse().unwrap());

        let double = quote(&[input.clone(), input]).rounded();
        let items = double
            .lines
            .iter()
            .map(|l| l.final_price)
            .sum::<Decimal>();
        assert_eq!(double.totals.subtotal, Decimal::from(1998));
        assert_eq!(double.totals.total_discount, "249.76".parse().unwrap());
        assert_eq!(double.totals.grand_total, "1748.24".parse().unwrap());
        assert_eq!(double.totals.grand_total, items);
        assert_eq!(
            double.totals.grand_total,
            double.totals.subtotal - double.totals.total_discount
        );
    }

    #[rstest]
    #[case(json!(500), "500")]
    #[case(json!(12.75), "12.75")]
    #[case(json!("80.5"), "80.5")]
    #[case(json!(" 42 "), "42")]
    #[case(json!("1e2"), "100")]
    #[case(json!("abc"), "0")]
    #[case(json!(null), "0")]
    #[case(json!(true), "0")]
    #[case(json!([1]), "0")]
    fn reads_amounts_leniently(
        #[case] value: serde_json::Value,
        #[case] expected: &str,
    ) {
        assert_eq!(lenient_amount(&value), expected.parse().unwrap());
    }
}
