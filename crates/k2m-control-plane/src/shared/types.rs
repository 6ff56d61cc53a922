use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use k2m_core::{Instance, RestartPolicy};

/// Default page size of instance listings and reconciliation batches.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Identity of the principal behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    /// Raw `Authorization` header value, forwarded to upstream services.
    pub token: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    Id,
    #[default]
    Name,
    CreatedAt,
    UpdatedAt,
}

impl FromStr for SortField {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> ControlPlaneResult<Self> {
        match s {
            "id" => Ok(SortField::Id),
            "name" => Ok(SortField::Name),
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            other => Err(ControlPlaneError::ValidationError(format!(
                "unknown sort field: {other}"
            ))),
        }
    }
}

/// Request to list instances visible to a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListInstancesRequest {
    pub limit: usize,
    pub offset: usize,
    pub sort: SortField,
    pub ascending: bool,
    /// Regular expression matched against instance names.
    pub search: Option<String>,
    pub include_generated: bool,
}

impl Default for ListInstancesRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            sort: SortField::Name,
            ascending: true,
            search: None,
            include_generated: true,
        }
    }
}

impl ListInstancesRequest {
    /// Applies an `order` parameter of the form `field` or `field:desc`.
    pub fn with_order(mut self, order: &str) -> ControlPlaneResult<Self> {
        let (field, direction) = match order.split_once(':') {
            Some((field, direction)) => (field, Some(direction)),
            None => (order, None),
        };
        self.sort = field.parse()?;
        self.ascending = match direction {
            None | Some("asc") => true,
            Some("desc") => false,
            Some(other) => {
                return Err(ControlPlaneError::ValidationError(format!(
                    "unknown sort direction: {other}"
                )))
            }
        };
        Ok(self)
    }
}

/// One page of instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceList {
    pub instances: Vec<Instance>,
    pub count: usize,
    pub total: usize,
}

/// Outcome of a workload reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub recreated: usize,
}

/// Outcome of a permission reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PermissionSyncReport {
    pub granted: usize,
    pub removed: usize,
}
