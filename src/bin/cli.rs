#![cfg(not(tarpaulin_include))]

use clap::{Parser, ValueEnum};
use loyalty_dashboard::customer::{Customer, CustomerRow};
use loyalty_dashboard::downloader::{EXPORT_HEADERS, to_csv};
use loyalty_dashboard::error::Result;
use loyalty_dashboard::loader::load_customers;
use loyalty_dashboard::query::{FilterCriterion, SortDirection, SortSpec, apply_query};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

/// Filter and sort a customer list the way the dashboard table does
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Customer list (.csv or .json)
    file: PathBuf,

    /// Filter such as 'Amount Spent>200000' or 'Last Visit<01/01/2025'; repeatable
    #[arg(short, long = "filter")]
    filters: Vec<String>,

    /// Field to sort by, e.g. 'Points'
    #[arg(short, long)]
    sort: Option<String>,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,
}

fn print_table(view: &[&Customer]) {
    let rows: Vec<CustomerRow> = view.iter().map(|c| CustomerRow::from(*c)).collect();
    let cells = |row: &CustomerRow| -> [String; 11] {
        [
            row.id.clone(),
            row.name.clone(),
            row.phone.clone(),
            row.total_spend.clone(),
            row.visits.clone(),
            row.last_visit.clone(),
            row.points.clone(),
            row.tag.clone(),
            row.rpi.clone(),
            row.lei.clone(),
            row.spending_score.clone(),
        ]
    };

    let mut widths: Vec<usize> = EXPORT_HEADERS.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(cells(row)) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: Vec<String>| {
        values
            .iter()
            .zip(&widths)
            .map(|(value, width)| format!("{:<width$}", value, width = width))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(EXPORT_HEADERS.iter().map(|h| h.to_string()).collect()));
    for row in &rows {
        println!("{}", line(cells(row).to_vec()));
    }
    println!("({} customers)", rows.len());
}

fn run(args: Args) -> Result<()> {
    let customers = load_customers(&args.file)?;
    let criteria = args
        .filters
        .iter()
        .map(|expr| expr.parse::<FilterCriterion>())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let direction = if args.desc {
        SortDirection::Desc
    } else {
        SortDirection::Asc
    };
    let sort = args.sort.map(|field| SortSpec::new(field, direction));

    let view = apply_query(&customers, &criteria, sort.as_ref())?;
    log::info!("{} of {} customers match", view.len(), customers.len());

    match args.format {
        OutputFormat::Table => print_table(&view),
        OutputFormat::Csv => print!("{}", to_csv(&view)?),
        OutputFormat::Json => {
            let rows: Vec<CustomerRow> = view.iter().map(|c| CustomerRow::from(*c)).collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
