use std::collections::HashMap;

use serde_json::Value;

pub const REPORT_HEADER: [&str; 4] = ["Symbol", "Price", "Last Close", "Updated At"];

/// Cell marker for a price that could not be fetched this cycle. A missing
/// value is never rendered as zero.
pub const UNAVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub symbol: String,
    pub price: Option<f64>,
    pub last_close: Option<f64>,
    pub updated_at: String,
}

impl ReportRow {
    pub fn to_cells(&self) -> Vec<Value> {
        vec![
            Value::String(self.symbol.clone()),
            number_or_unavailable(self.price),
            number_or_unavailable(self.last_close),
            Value::String(self.updated_at.clone()),
        ]
    }
}

/// Merges the cycle's fetch results into one row per instrument, in the
/// discovery order of `symbols`.
pub fn build_report(
    symbols: &[String],
    prices: &HashMap<String, f64>,
    closes: &HashMap<String, f64>,
    updated_at: &str,
) -> Vec<ReportRow> {
    symbols
        .iter()
        .map(|symbol| ReportRow {
            symbol: symbol.clone(),
            price: prices.get(symbol).copied(),
            last_close: closes.get(symbol).copied(),
            updated_at: updated_at.to_string(),
        })
        .collect()
}

/// Header row followed by one cell row per report row, ready for the sink.
pub fn report_values(rows: &[ReportRow]) -> Vec<Vec<Value>> {
    let mut values = Vec::with_capacity(rows.len() + 1);
    values.push(
        REPORT_HEADER
            .iter()
            .map(|h| Value::String(h.to_string()))
            .collect(),
    );
    values.extend(rows.iter().map(ReportRow::to_cells));
    values
}

fn number_or_unavailable(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(UNAVAILABLE.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn symbols(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn one_row_per_instrument_in_discovery_order() {
        let list = symbols(&["CCCUSDT", "AAAUSDT", "BBBUSDT"]);
        let prices = HashMap::from([("AAAUSDT".to_string(), 1.0)]);
        let closes = HashMap::new();

        let rows = build_report(&list, &prices, &closes, "ts");

        assert_eq!(rows.len(), 3);
        let order: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(order, vec!["CCCUSDT", "AAAUSDT", "BBBUSDT"]);
    }

    #[test]
    fn merged_rows_carry_unavailable_markers() {
        let list = symbols(&["AAAUSDT", "BBBUSDT"]);
        let prices = HashMap::from([("AAAUSDT".to_string(), 1.23)]);
        let closes = HashMap::from([("AAAUSDT".to_string(), 1.20)]);

        let rows = build_report(&list, &prices, &closes, "2026-01-26 01:15:01");

        assert_eq!(
            rows[0].to_cells(),
            vec![
                json!("AAAUSDT"),
                json!(1.23),
                json!(1.20),
                json!("2026-01-26 01:15:01")
            ]
        );
        assert_eq!(
            rows[1].to_cells(),
            vec![
                json!("BBBUSDT"),
                json!("N/A"),
                json!("N/A"),
                json!("2026-01-26 01:15:01")
            ]
        );
    }

    #[test]
    fn report_values_prepend_the_header_row() {
        let rows = build_report(&symbols(&["AAAUSDT"]), &HashMap::new(), &HashMap::new(), "ts");
        let values = report_values(&rows);

        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0],
            vec![
                json!("Symbol"),
                json!("Price"),
                json!("Last Close"),
                json!("Updated At")
            ]
        );
        assert_eq!(values[1][0], json!("AAAUSDT"));
    }

    #[test]
    fn non_finite_price_degrades_to_unavailable() {
        assert_eq!(number_or_unavailable(Some(f64::NAN)), json!("N/A"));
        assert_eq!(number_or_unavailable(None), json!("N/A"));
        assert_eq!(number_or_unavailable(Some(2.5)), json!(2.5));
    }
}
