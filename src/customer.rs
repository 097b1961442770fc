use crate::format::{
    FormatError, LastVisit, format_amount, format_visit_date, parse_amount, parse_visit_date,
};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Customer as exported by the data provider.
///
/// Numbers arrive as display strings (`"255,000"`) or plain JSON numbers; both
/// are kept as text here and only parsed when the row becomes a [`Customer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRow {
    #[serde(deserialize_with = "display_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(deserialize_with = "display_string")]
    pub total_spend: String,
    #[serde(deserialize_with = "display_string")]
    pub visits: String,
    pub last_visit: String,
    #[serde(deserialize_with = "display_string")]
    pub points: String,
    #[serde(default)]
    pub tag: String,
    #[serde(deserialize_with = "display_string")]
    pub rpi: String,
    #[serde(deserialize_with = "display_string")]
    pub lei: String,
    #[serde(deserialize_with = "display_string")]
    pub spending_score: String,
}

/// Customer with its metrics parsed into numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub total_spend: f64,
    pub visits: u32,
    pub last_visit: LastVisit,
    pub points: i64,
    pub tag: String,
    pub rpi: f64,
    pub lei: f64,
    pub spending_score: f64,
}

/// Error for a row whose field could not be parsed
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("customer {id}: field '{field}': {source}")]
pub struct RowError {
    pub id: String,
    pub field: &'static str,
    #[source]
    pub source: FormatError,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = RowError;

    fn try_from(row: CustomerRow) -> Result<Self, Self::Error> {
        let id = row.id.clone();
        let field_error = |field: &'static str| {
            let id = id.clone();
            move |source: FormatError| RowError { id, field, source }
        };

        let total_spend = parse_amount(&row.total_spend).map_err(field_error("totalSpend"))?;
        let visits = parse_count(&row.visits).map_err(field_error("visits"))?;
        let last_visit = parse_visit_date(&row.last_visit).map_err(field_error("lastVisit"))?;
        let points = parse_amount(&row.points).map_err(field_error("points"))?;
        let rpi = parse_amount(&row.rpi).map_err(field_error("rpi"))?;
        let lei = parse_amount(&row.lei).map_err(field_error("lei"))?;
        let spending_score =
            parse_amount(&row.spending_score).map_err(field_error("spendingScore"))?;

        Ok(Customer {
            id: row.id,
            name: row.name,
            phone: row.phone,
            total_spend,
            visits,
            last_visit,
            points: points.round() as i64,
            tag: row.tag,
            rpi,
            lei,
            spending_score,
        })
    }
}

impl From<&Customer> for CustomerRow {
    fn from(customer: &Customer) -> Self {
        CustomerRow {
            id: customer.id.clone(),
            name: customer.name.clone(),
            phone: customer.phone.clone(),
            total_spend: format_amount(customer.total_spend),
            visits: customer.visits.to_string(),
            last_visit: format_visit_date(customer.last_visit),
            points: format_amount(customer.points as f64),
            tag: customer.tag.clone(),
            rpi: format_score(customer.rpi),
            lei: format_score(customer.lei),
            spending_score: format_score(customer.spending_score),
        }
    }
}

/// Parse every row, stopping at the first one that does not parse
pub fn parse_rows(rows: Vec<CustomerRow>) -> Result<Vec<Customer>, RowError> {
    rows.into_iter().map(Customer::try_from).collect()
}

fn parse_count(raw: &str) -> Result<u32, FormatError> {
    let value = parse_amount(raw)?;
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(FormatError::InvalidNumber(raw.to_string()));
    }
    Ok(value as u32)
}

// Scores are shown with at most two decimals and no grouping.
fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        let rendered = format!("{:.2}", value);
        rendered.trim_end_matches('0').to_string()
    }
}

/// Text of a field that may arrive as a string or a plain number
///
/// Strings are kept verbatim (`"007"` stays `"007"`). Numbers are rendered
/// with their own `to_string`, so integer ids keep every digit.
fn display_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct DisplayString;

    impl Visitor<'_> for DisplayString {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string or a number")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<String, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<String, E> {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(DisplayString)
}


#[cfg(test)]
mod tests {
    use super::fixtures::row;
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn rows_parse_display_strings() {
        let customer = Customer::try_from(row("1", "Ada", "255,000", "22/01/2024")).unwrap();
        assert_eq!(customer.total_spend, 255000.0);
        assert_eq!(customer.points, 1200);
        assert_eq!(customer.visits, 3);
        assert_eq!(
            customer.last_visit,
            LastVisit::On(NaiveDate::from_ymd_opt(2024, 1, 22).unwrap())
        );
    }

    #[test]
    fn bad_field_names_the_culprit() {
        let err = Customer::try_from(row("9", "Bo", "lots", "Never")).unwrap_err();
        assert_eq!(err.id, "9");
        assert_eq!(err.field, "totalSpend");
    }

    #[test]
    fn fractional_visits_are_rejected() {
        let mut bad = row("2", "Cy", "100", "Never");
        bad.visits = "2.5".to_string();
        let err = Customer::try_from(bad).unwrap_err();
        assert_eq!(err.field, "visits");
    }

    #[test]
    fn rows_accept_json_numbers() {
        let json = r#"{
            "id": 7, "name": "Dee", "phone": "0800", "totalSpend": 1500,
            "visits": 4, "lastVisit": "Never", "points": "300", "tag": "New",
            "rpi": 0.75, "lei": 1, "spendingScore": "55"
        }"#;
        let row: CustomerRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.id, "7");
        assert_eq!(row.total_spend, "1500");
        let customer = Customer::try_from(row).unwrap();
        assert_eq!(customer.rpi, 0.75);
        assert_eq!(customer.last_visit, LastVisit::Never);
    }

    #[test]
    fn json_ids_keep_their_text_and_digits() {
        let template = r#"{
            "id": ID, "name": "Dee", "totalSpend": "1", "visits": "1",
            "lastVisit": "Never", "points": "0", "rpi": "0", "lei": "0", "spendingScore": "0"
        }"#;
        let parse = |id: &str| -> CustomerRow {
            serde_json::from_str(&template.replace("ID", id)).unwrap()
        };
        assert_eq!(parse(r#""007""#).id, "007");
        assert_eq!(parse("18446744073709551615").id, "18446744073709551615");
        assert_eq!(parse("-42").id, "-42");
    }

    #[test]
    fn display_row_formats_numbers() {
        let customer = Customer::try_from(row("1", "Ada", "255000", "4/02/2025")).unwrap();
        let display = CustomerRow::from(&customer);
        assert_eq!(display.total_spend, "255,000");
        assert_eq!(display.last_visit, "04/02/2025");
        assert_eq!(display.points, "1,200");
        assert_eq!(display.rpi, "0.5");
        assert_eq!(display.lei, "0.25");
    }
}
