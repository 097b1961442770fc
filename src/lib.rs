/*!
# Loyalty Dashboard

Merchant-facing dashboard for a customer loyalty program, built in Rust.

## Overview

Merchants sign in, register their business and then work with their customer
list: filter it by spend, points, visits or last visit, sort it, export it
and send personalised bulk messages to the customers that match. Every page
is protected by a routing guard that checks the session and whether the
signed-in merchant owns an active business.

## Architecture

### Customer pipeline
- **format**: parsing and display of amounts (`"255,000"`) and visit dates (`DD/MM/YYYY` or `Never`)
- **customer**: display rows as delivered by the data provider and their parsed form
- **query**: field aliases, filter criteria, stable sorting and the per-surface filter option lists
- **loader** / **downloader**: CSV and JSON import, CSV and XLSX export
- **messaging**: bulk message templates and recipient targeting

### Session and business gate (web feature)
- **session**: resolves the current session racing a timeout
- **business**: cached "owns an active business" check with its own timeout
- **guard**: axum middleware redirecting to login or business setup
- **routes**: route names and path classification

### Providers and stores
- **provider**: `AuthProvider` and `BusinessDirectory` traits and the friendly auth messages
- **login**: file-backed auth provider (Argon2, one-time codes) and the auth form handlers
- **mailer**: delivery of one-time codes over SMTP or to the log
- **store**: file-backed business directory, customer lists and message outbox

### Ambient
- **config**: TOML configuration with `LOYALTY_*` environment overrides
- **error**: error types and their HTTP mapping
- **app**: application state, router and the dashboard handlers

## REST API Endpoints

- `GET /api/session?route=` - Session gate resolution for a view
- `GET /api/customers?sort=&direction=` - Sorted customer list
- `POST /api/customers/query` - Filtered and sorted customer list
- `POST /api/customers/export` - CSV or XLSX download of a query result
- `GET /api/filters/{surface}` - Filter options for `customer-table` or `bulk-message`
- `POST /api/messages/bulk` - Queue a personalised message to matching customers
*/

pub mod config;
pub mod customer;
pub mod downloader;
pub mod error;
pub mod format;
pub mod loader;
pub mod messaging;
pub mod provider;
pub mod query;
pub mod routes;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod business;
#[cfg(feature = "web")]
pub mod guard;
#[cfg(feature = "web")]
pub mod login;
#[cfg(feature = "web")]
pub mod mailer;
#[cfg(feature = "web")]
pub mod session;
#[cfg(feature = "web")]
pub mod store;

pub use customer::{Customer, CustomerRow};
pub use error::{DashboardError, Result};
pub use query::{FilterCriterion, Operator, SortDirection, SortSpec, apply_query};
