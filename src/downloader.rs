use crate::customer::{Customer, CustomerRow};
use crate::error::{DashboardError, Result};
use serde::{Deserialize, Serialize};

/// Column headings used by both export formats, in order
pub const EXPORT_HEADERS: [&str; 11] = [
    "ID",
    "Name",
    "Phone",
    "Amount Spent",
    "Visits",
    "Last Visit",
    "Points",
    "Tag",
    "RPI",
    "LEI",
    "Spending Score",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// Convert a customer view to CSV
///
/// Values are written the way the customer table shows them: amounts with
/// thousands separators and dates as `DD/MM/YYYY` or `Never`. Fields holding
/// commas are quoted by the writer.
///
/// # Arguments
/// * `customers` - The ordered view to export
///
/// # Returns
/// * `Result<String>` - CSV content as a string or an error
pub fn to_csv(customers: &[&Customer]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADERS)?;

    for customer in customers {
        let row = CustomerRow::from(*customer);
        writer.write_record([
            row.id.as_str(),
            row.name.as_str(),
            row.phone.as_str(),
            row.total_spend.as_str(),
            row.visits.as_str(),
            row.last_visit.as_str(),
            row.points.as_str(),
            row.tag.as_str(),
            row.rpi.as_str(),
            row.lei.as_str(),
            row.spending_score.as_str(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| DashboardError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| DashboardError::Export(e.to_string()))
}

/// Convert a customer view to XLSX
///
/// Metrics are written as numeric cells so the merchant can keep sorting and
/// summing in a spreadsheet; the last visit stays text because `Never` is
/// not a date.
///
/// # Arguments
/// * `customers` - The ordered view to export
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content as bytes or an error
#[cfg(feature = "web")]
pub fn to_xlsx(customers: &[&Customer]) -> Result<Vec<u8>> {
    use crate::format::format_visit_date;
    use rust_xlsxwriter::{Workbook, Worksheet};

    let export_error = |e: rust_xlsxwriter::XlsxError| DashboardError::Export(e.to_string());

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name("Customers").map_err(export_error)?;

    for (col, header) in EXPORT_HEADERS.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *header)
            .map_err(export_error)?;
    }

    for (i, customer) in customers.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_string(row, 0, &customer.id).map_err(export_error)?;
        worksheet.write_string(row, 1, &customer.name).map_err(export_error)?;
        worksheet.write_string(row, 2, &customer.phone).map_err(export_error)?;
        worksheet
            .write_number(row, 3, customer.total_spend)
            .map_err(export_error)?;
        worksheet
            .write_number(row, 4, customer.visits as f64)
            .map_err(export_error)?;
        worksheet
            .write_string(row, 5, &format_visit_date(customer.last_visit))
            .map_err(export_error)?;
        worksheet
            .write_number(row, 6, customer.points as f64)
            .map_err(export_error)?;
        worksheet.write_string(row, 7, &customer.tag).map_err(export_error)?;
        worksheet.write_number(row, 8, customer.rpi).map_err(export_error)?;
        worksheet.write_number(row, 9, customer.lei).map_err(export_error)?;
        worksheet
            .write_number(row, 10, customer.spending_score)
            .map_err(export_error)?;
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(export_error)
}
