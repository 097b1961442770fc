//! Bulk messages to a filtered slice of the customer list.

use crate::customer::{Customer, CustomerRow};
use crate::error::{DashboardError, Result};
use crate::query::{FilterCriterion, apply_query};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_MESSAGE_LEN: usize = 640;

/// Placeholders a template may use, and the row field each one reads
const PLACEHOLDERS: [&str; 5] = ["{name}", "{points}", "{totalSpend}", "{lastVisit}", "{tag}"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkMessageRequest {
    #[serde(default)]
    pub criteria: Vec<FilterCriterion>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub customer_id: String,
    pub name: String,
    pub phone: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMessage {
    pub business_id: String,
    pub template: String,
    pub recipients: Vec<Recipient>,
    /// Matching customers left out because they have no phone number
    pub skipped: usize,
    pub created_at: DateTime<Utc>,
}

/// Fill the template placeholders with one customer's display values
pub fn render_message(template: &str, customer: &Customer) -> String {
    let row = CustomerRow::from(customer);
    let values = [
        row.name.as_str(),
        row.points.as_str(),
        row.total_spend.as_str(),
        row.last_visit.as_str(),
        row.tag.as_str(),
    ];

    PLACEHOLDERS
        .iter()
        .zip(values)
        .fold(template.to_string(), |text, (placeholder, value)| {
            text.replace(placeholder, value)
        })
}

/// Target the customers matching `request.criteria` and personalise the message
pub fn compose(
    business_id: &str,
    customers: &[Customer],
    request: &BulkMessageRequest,
) -> Result<BulkMessage> {
    let template = request.message.trim();
    if template.is_empty() {
        return Err(DashboardError::validation("Message cannot be empty"));
    }
    if template.chars().count() > MAX_MESSAGE_LEN {
        return Err(DashboardError::validation(format!(
            "Message cannot be longer than {} characters",
            MAX_MESSAGE_LEN
        )));
    }

    let targets = apply_query(customers, &request.criteria, None)?;
    let (reachable, unreachable): (Vec<&Customer>, Vec<&Customer>) = targets
        .into_iter()
        .partition(|customer| !customer.phone.trim().is_empty());

    if reachable.is_empty() {
        return Err(DashboardError::validation(
            "No customers with a phone number match these filters",
        ));
    }

    let recipients = reachable
        .into_iter()
        .map(|customer| Recipient {
            customer_id: customer.id.clone(),
            name: customer.name.clone(),
            phone: customer.phone.trim().to_string(),
            text: render_message(template, customer),
        })
        .collect();

    Ok(BulkMessage {
        business_id: business_id.to_string(),
        template: template.to_string(),
        recipients,
        skipped: unreachable.len(),
        created_at: Utc::now(),
    })
}

/// Where composed messages go to be delivered
#[async_trait]
pub trait MessageOutbox: Send + Sync {
    async fn enqueue(&self, message: &BulkMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customer::fixtures::customer;
    use crate::query::Operator;

    fn customers() -> Vec<Customer> {
        let mut no_phone = customer("3", "Chidi", "400,000", "Never");
        no_phone.phone = String::new();
        vec![
            customer("1", "Ada", "255,000", "22/01/2024"),
            customer("2", "Bola", "150,000", "4/02/2025"),
            no_phone,
        ]
    }

    #[test]
    fn placeholders_use_display_values() {
        let ada = customer("1", "Ada", "255000", "22/01/2024");
        let text = render_message("Hi {name}, you have {points} points ({totalSpend} spent)", &ada);
        assert_eq!(text, "Hi Ada, you have 1,200 points (255,000 spent)");
    }

    #[test]
    fn compose_targets_filtered_customers() {
        let request = BulkMessageRequest {
            criteria: vec![FilterCriterion::new("Amount Spent", Operator::Greater, "200000")],
            message: "Thanks {name}!".to_string(),
        };
        let message = compose("biz-1", &customers(), &request).unwrap();
        assert_eq!(message.recipients.len(), 1);
        assert_eq!(message.recipients[0].text, "Thanks Ada!");
        assert_eq!(message.skipped, 1);
        assert_eq!(message.business_id, "biz-1");
    }

    #[test]
    fn empty_message_is_rejected() {
        let request = BulkMessageRequest {
            criteria: vec![],
            message: "   ".to_string(),
        };
        assert!(matches!(
            compose("biz-1", &customers(), &request),
            Err(DashboardError::Validation(_))
        ));
    }

    #[test]
    fn long_message_is_rejected() {
        let request = BulkMessageRequest {
            criteria: vec![],
            message: "x".repeat(MAX_MESSAGE_LEN + 1),
        };
        assert!(compose("biz-1", &customers(), &request).is_err());
    }

    #[test]
    fn no_reachable_recipient_is_an_error() {
        let request = BulkMessageRequest {
            criteria: vec![FilterCriterion::new("Amount Spent", Operator::Greater, "300000")],
            message: "Hello".to_string(),
        };
        assert!(compose("biz-1", &customers(), &request).is_err());
    }

    #[test]
    fn bad_criteria_surface_as_query_errors() {
        let request = BulkMessageRequest {
            criteria: vec![FilterCriterion::new("Points", Operator::Less, "few")],
            message: "Hello".to_string(),
        };
        assert!(matches!(
            compose("biz-1", &customers(), &request),
            Err(DashboardError::Query(_))
        ));
    }
}
