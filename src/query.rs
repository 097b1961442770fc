//! Customer list filter/sort pipeline.
//!
//! The customer table and the bulk-message modal both hand the pipeline a
//! list of [`FilterCriterion`] values built from user-facing labels
//! ("Amount Spent", "Last Visit", ...) and optionally a [`SortSpec`]. The
//! pipeline resolves labels to record fields, parses the criterion values
//! once, keeps the records that satisfy every criterion and orders the
//! survivors.
//!
//! # Examples
//! ```
//! use loyalty_dashboard::query::{FilterCriterion, Operator, apply_query};
//!
//! let criteria = vec![FilterCriterion::new("Amount Spent", Operator::Greater, "200000")];
//! let survivors = apply_query(&[], &criteria, None).unwrap();
//! assert!(survivors.is_empty());
//! ```

use crate::customer::Customer;
use crate::format::{FormatError, LastVisit, locale_compare, parse_amount, parse_visit_date};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    /// User-facing labels and the record field each one reads
    static ref FIELD_ALIASES: HashMap<&'static str, &'static str> = HashMap::from([
        ("Amount Spent", "totalSpend"),
        ("Total Spend", "totalSpend"),
        ("Points", "points"),
        ("Points Balance", "points"),
        ("Visits", "visits"),
        ("Visit Count", "visits"),
        ("Last Visit", "lastVisit"),
        ("RPI", "rpi"),
        ("LEI", "lei"),
        ("Spending Score", "spendingScore"),
        ("Tag", "tag"),
        ("Name", "name"),
        ("Phone", "phone"),
    ]);
    static ref CRITERION_EXPR_REGEX: Regex = Regex::new(r"^\s*([^<>]+?)\s*([<>])\s*(.+?)\s*$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("invalid value for '{field}': {source}")]
    InvalidValue {
        field: String,
        #[source]
        source: FormatError,
    },

    #[error("cannot parse filter '{0}', expected FIELD>VALUE or FIELD<VALUE")]
    InvalidExpression(String),

    #[error("unknown sort direction '{0}'")]
    InvalidDirection(String),

    #[error("unknown filter surface '{0}'")]
    UnknownSurface(String),
}

/// How a field's values are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Date,
    Text,
}

/// Fields of a customer record the pipeline can read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomerField {
    Id,
    Name,
    Phone,
    TotalSpend,
    Visits,
    LastVisit,
    Points,
    Tag,
    Rpi,
    Lei,
    SpendingScore,
}

impl CustomerField {
    pub const ALL: [CustomerField; 11] = [
        CustomerField::Id,
        CustomerField::Name,
        CustomerField::Phone,
        CustomerField::TotalSpend,
        CustomerField::Visits,
        CustomerField::LastVisit,
        CustomerField::Points,
        CustomerField::Tag,
        CustomerField::Rpi,
        CustomerField::Lei,
        CustomerField::SpendingScore,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            CustomerField::Id => "id",
            CustomerField::Name => "name",
            CustomerField::Phone => "phone",
            CustomerField::TotalSpend => "totalSpend",
            CustomerField::Visits => "visits",
            CustomerField::LastVisit => "lastVisit",
            CustomerField::Points => "points",
            CustomerField::Tag => "tag",
            CustomerField::Rpi => "rpi",
            CustomerField::Lei => "lei",
            CustomerField::SpendingScore => "spendingScore",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            CustomerField::TotalSpend
            | CustomerField::Visits
            | CustomerField::Points
            | CustomerField::Rpi
            | CustomerField::Lei
            | CustomerField::SpendingScore => FieldKind::Numeric,
            CustomerField::LastVisit => FieldKind::Date,
            CustomerField::Id | CustomerField::Name | CustomerField::Phone | CustomerField::Tag => {
                FieldKind::Text
            }
        }
    }
}

/// Map a user-facing label to a record field key; unmapped labels pass through
pub fn resolve_label(label: &str) -> &str {
    let trimmed = label.trim();
    FIELD_ALIASES.get(trimmed).copied().unwrap_or(trimmed)
}

pub fn resolve_field(label: &str) -> Result<CustomerField, QueryError> {
    CustomerField::from_key(resolve_label(label))
        .ok_or_else(|| QueryError::UnknownField(label.to_string()))
}

/// A value read from a record, ready for comparison
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Number(f64),
    Date(LastVisit),
    Text(&'a str),
}

impl FieldValue<'_> {
    fn compare(&self, other: &FieldValue<'_>) -> Ordering {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.total_cmp(b),
            (FieldValue::Date(a), FieldValue::Date(b)) => a.cmp(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.cmp(b),
            // Values of one field always share a kind.
            _ => Ordering::Equal,
        }
    }
}

impl Customer {
    pub fn field_value(&self, field: CustomerField) -> FieldValue<'_> {
        match field {
            CustomerField::Id => FieldValue::Text(&self.id),
            CustomerField::Name => FieldValue::Text(&self.name),
            CustomerField::Phone => FieldValue::Text(&self.phone),
            CustomerField::TotalSpend => FieldValue::Number(self.total_spend),
            CustomerField::Visits => FieldValue::Number(self.visits as f64),
            CustomerField::LastVisit => FieldValue::Date(self.last_visit),
            CustomerField::Points => FieldValue::Number(self.points as f64),
            CustomerField::Tag => FieldValue::Text(&self.tag),
            CustomerField::Rpi => FieldValue::Number(self.rpi),
            CustomerField::Lei => FieldValue::Number(self.lei),
            CustomerField::SpendingScore => FieldValue::Number(self.spending_score),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Greater,
    Less,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Greater => f.write_str(">"),
            Operator::Less => f.write_str("<"),
        }
    }
}

/// One row of the filter popup: `field operator value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCriterion {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

impl FilterCriterion {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        FilterCriterion {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

impl FromStr for FilterCriterion {
    type Err = QueryError;

    /// Parse `Amount Spent>200000` or `Last Visit < 01/01/2024`
    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let captures = CRITERION_EXPR_REGEX
            .captures(expr)
            .ok_or_else(|| QueryError::InvalidExpression(expr.to_string()))?;

        let operator = match &captures[2] {
            ">" => Operator::Greater,
            _ => Operator::Less,
        };
        Ok(FilterCriterion::new(&captures[1], operator, &captures[3]))
    }
}

impl fmt::Display for FilterCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Threshold {
    Number(f64),
    Date(LastVisit),
    Text(String),
}

impl Threshold {
    fn as_value(&self) -> FieldValue<'_> {
        match self {
            Threshold::Number(n) => FieldValue::Number(*n),
            Threshold::Date(d) => FieldValue::Date(*d),
            Threshold::Text(s) => FieldValue::Text(s),
        }
    }
}

/// A criterion whose field is resolved and whose value is parsed
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCriterion {
    field: CustomerField,
    operator: Operator,
    threshold: Threshold,
}

impl CompiledCriterion {
    pub fn compile(criterion: &FilterCriterion) -> Result<Self, QueryError> {
        let field = resolve_field(&criterion.field)?;
        let invalid = |source: FormatError| QueryError::InvalidValue {
            field: criterion.field.clone(),
            source,
        };

        let threshold = match field.kind() {
            FieldKind::Numeric => Threshold::Number(parse_amount(&criterion.value).map_err(invalid)?),
            FieldKind::Date => Threshold::Date(parse_visit_date(&criterion.value).map_err(invalid)?),
            FieldKind::Text => Threshold::Text(criterion.value.clone()),
        };

        Ok(CompiledCriterion {
            field,
            operator: criterion.operator,
            threshold,
        })
    }

    pub fn field(&self) -> CustomerField {
        self.field
    }

    pub fn matches(&self, customer: &Customer) -> bool {
        let ordering = customer
            .field_value(self.field)
            .compare(&self.threshold.as_value());
        match self.operator {
            Operator::Greater => ordering == Ordering::Greater,
            Operator::Less => ordering == Ordering::Less,
        }
    }
}

pub fn compile_criteria(criteria: &[FilterCriterion]) -> Result<Vec<CompiledCriterion>, QueryError> {
    criteria.iter().map(CompiledCriterion::compile).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            _ => Err(QueryError::InvalidDirection(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        SortSpec {
            field: field.into(),
            direction,
        }
    }
}

/// Order two customers by `field`; text goes through [`locale_compare`]
pub fn compare_by(field: CustomerField, a: &Customer, b: &Customer) -> Ordering {
    match (a.field_value(field), b.field_value(field)) {
        (FieldValue::Text(x), FieldValue::Text(y)) => locale_compare(x, y),
        (x, y) => x.compare(&y),
    }
}

/// Keep the customers that satisfy every criterion, in their original order
pub fn filter_customers<'a>(
    customers: &'a [Customer],
    criteria: &[CompiledCriterion],
) -> Vec<&'a Customer> {
    customers
        .iter()
        .filter(|customer| criteria.iter().all(|criterion| criterion.matches(customer)))
        .collect()
}

pub fn sort_customers(view: &mut [&Customer], field: CustomerField, direction: SortDirection) {
    view.sort_by(|a, b| {
        let ordering = compare_by(field, a, b);
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Run the whole pipeline and return the ordered view
///
/// Criteria and the sort field are validated before any record is looked
/// at, so a bad request fails without a partial result.
pub fn apply_query<'a>(
    customers: &'a [Customer],
    criteria: &[FilterCriterion],
    sort: Option<&SortSpec>,
) -> Result<Vec<&'a Customer>, QueryError> {
    let compiled = compile_criteria(criteria)?;
    let sort_field = sort
        .map(|spec| resolve_field(&spec.field).map(|field| (field, spec.direction)))
        .transpose()?;

    let mut view = filter_customers(customers, &compiled);
    if let Some((field, direction)) = sort_field {
        sort_customers(&mut view, field, direction);
    }
    Ok(view)
}

/// Where a filter list is offered; each surface has its own option list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterSurface {
    CustomerTable,
    BulkMessage,
}

impl FilterSurface {
    pub fn options(&self) -> &'static [&'static str] {
        match self {
            FilterSurface::CustomerTable => &[
                "Amount Spent",
                "Points",
                "Visits",
                "Last Visit",
                "RPI",
                "LEI",
                "Spending Score",
                "Tag",
            ],
            FilterSurface::BulkMessage => &["Amount Spent", "Points", "Visits", "Last Visit", "Tag"],
        }
    }
}

impl FromStr for FilterSurface {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer-table" | "customers" => Ok(FilterSurface::CustomerTable),
            "bulk-message" | "messages" => Ok(FilterSurface::BulkMessage),
            _ => Err(QueryError::UnknownSurface(s.to_string())),
        }
    }
}
