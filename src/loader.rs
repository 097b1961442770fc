use crate::customer::{Customer, CustomerRow, parse_rows};
use crate::error::{DashboardError, Result};
use serde::Deserialize;
use serde::de::value::{self, MapDeserializer};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Load customer rows from a CSV export
///
/// The first line must be a header naming the row fields (`id`, `name`,
/// `totalSpend`, `lastVisit`, ...). Values keep their display formatting, so
/// a quoted `"255,000"` is read as-is and parsed later.
///
/// # Arguments
/// * `reader` - Source of the CSV text
///
/// # Returns
/// * `Result<Vec<CustomerRow>>` - Rows in file order or the first parse error
pub fn rows_from_csv<R: Read>(reader: R) -> Result<Vec<CustomerRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    // Each record is read as text first; deserializing the row straight from
    // csv would let it guess numbers and turn an id like `007` into `7`.
    let mut rows = Vec::new();
    for record in csv_reader.deserialize::<HashMap<String, String>>() {
        let fields = MapDeserializer::<_, value::Error>::new(record?.into_iter());
        let row = CustomerRow::deserialize(fields).map_err(|e| {
            DashboardError::validation(format!("customer row {}: {}", rows.len() + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Load customer rows from a JSON array
pub fn rows_from_json<R: Read>(reader: R) -> Result<Vec<CustomerRow>> {
    Ok(serde_json::from_reader(reader)?)
}

/// Detect file type and load the customers it holds
///
/// This function examines the file extension and calls the appropriate loader
/// for CSV or JSON files, then parses every row into a [`Customer`].
///
/// # Arguments
/// * `filepath` - Path to the file to load
///
/// # Returns
/// * `Result<Vec<Customer>>` - The parsed customers or an error
///
/// # Examples
/// ```no_run
/// use loyalty_dashboard::loader::load_customers;
///
/// match load_customers("customers.csv") {
///     Ok(customers) => println!("Loaded {} customers", customers.len()),
///     Err(e) => eprintln!("Error loading file: {}", e),
/// }
/// ```
pub fn load_customers(filepath: impl AsRef<Path>) -> Result<Vec<Customer>> {
    let path = filepath.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    let rows = match extension.as_deref() {
        Some("csv") => rows_from_csv(BufReader::new(File::open(path)?))?,
        Some("json") => rows_from_json(BufReader::new(File::open(path)?))?,
        Some(ext) => {
            return Err(DashboardError::validation(format!(
                "Unsupported file extension: {}",
                ext
            )));
        }
        None => return Err(DashboardError::validation("File has no extension")),
    };

    let customers = parse_rows(rows)?;
    log::debug!("loaded {} customers from {}", customers.len(), path.display());
    Ok(customers)
}
