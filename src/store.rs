//! File-backed stores under the database directory.

use crate::customer::Customer;
use crate::error::{DashboardError, Result};
use crate::loader::load_customers;
use crate::messaging::{BulkMessage, MessageOutbox};
use crate::provider::{Business, BusinessDirectory, BusinessStatus, ProviderError};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

pub const MAX_BUSINESS_NAME_LEN: usize = 120;

/// Business ids become file names, so only a safe alphabet is accepted
fn checked_id(business_id: &str) -> Result<&str> {
    let valid = !business_id.is_empty()
        && business_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(business_id)
    } else {
        Err(DashboardError::validation(format!(
            "invalid business id '{}'",
            business_id
        )))
    }
}

/// `businesses` table kept as a JSON array
pub struct FileBusinessDirectory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBusinessDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBusinessDirectory {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> std::result::Result<Vec<Business>, ProviderError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| ProviderError::Backend(format!("Failed to read businesses: {}", e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| ProviderError::Backend(format!("Failed to parse businesses: {}", e)))
    }

    fn write_all(&self, businesses: &[Business]) -> std::result::Result<(), ProviderError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| ProviderError::Backend(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(businesses)
            .map_err(|e| ProviderError::Backend(e.to_string()))?;
        fs::write(&self.path, json)
            .map_err(|e| ProviderError::Backend(format!("Failed to write businesses: {}", e)))
    }
}

#[async_trait]
impl BusinessDirectory for FileBusinessDirectory {
    async fn find_by_owner(&self, owner_id: &str) -> std::result::Result<Option<Business>, ProviderError> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|business| business.owner_id == owner_id))
    }

    async fn create(&self, owner_id: &str, name: &str) -> std::result::Result<Business, ProviderError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_BUSINESS_NAME_LEN {
            return Err(ProviderError::Backend(format!(
                "Business name must be between 1 and {} characters",
                MAX_BUSINESS_NAME_LEN
            )));
        }

        let _guard = self
            .lock
            .lock()
            .map_err(|_| ProviderError::Backend("business table lock poisoned".into()))?;
        let mut businesses = self.read_all()?;
        if businesses.iter().any(|b| b.owner_id == owner_id) {
            return Err(ProviderError::BusinessExists);
        }

        let business = Business {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            status: BusinessStatus::Active,
            created_at: Utc::now(),
        };
        businesses.push(business.clone());
        self.write_all(&businesses)?;
        info!("registered business {} for user {}", business.id, owner_id);
        Ok(business)
    }
}

/// Where a business's customer list comes from
#[async_trait]
pub trait CustomerSource: Send + Sync {
    async fn customers(&self, business_id: &str) -> Result<Vec<Customer>>;
}

/// Customer lists stored as `<dir>/<business_id>.json` or `.csv`
pub struct FileCustomerSource {
    dir: PathBuf,
}

impl FileCustomerSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileCustomerSource { dir: dir.into() }
    }

    /// The file holding this business's customers, if any
    pub fn file_for(&self, business_id: &str) -> Result<Option<PathBuf>> {
        let id = checked_id(business_id)?;
        Ok(["json", "csv"]
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", id, ext)))
            .find(|path| path.is_file()))
    }
}

#[async_trait]
impl CustomerSource for FileCustomerSource {
    async fn customers(&self, business_id: &str) -> Result<Vec<Customer>> {
        match self.file_for(business_id)? {
            Some(path) => load_customers(&path),
            None => {
                debug!("no customer file for business {}", business_id);
                Ok(Vec::new())
            }
        }
    }
}

/// Outbox appending one JSON line per queued message
pub struct FileOutbox {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileOutbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileOutbox {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn file_for(&self, business_id: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.jsonl", checked_id(business_id)?)))
    }

    fn append(&self, path: &Path, line: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| DashboardError::validation("outbox lock poisoned"))?;
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[async_trait]
impl MessageOutbox for FileOutbox {
    async fn enqueue(&self, message: &BulkMessage) -> Result<()> {
        let path = self.file_for(&message.business_id)?;
        let line = serde_json::to_string(message)?;
        self.append(&path, &line)?;
        info!(
            "queued message for {} recipients of business {}",
            message.recipients.len(),
            message.business_id
        );
        Ok(())
    }
}
