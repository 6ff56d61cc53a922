pub mod file;

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{Instance, ListInstancesRequest, SortField};
use async_trait::async_trait;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

pub use file::FileInstanceStore;

/// Which records a listing may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Owner(String),
    Ids(HashSet<String>),
}

impl Scope {
    fn contains(&self, instance: &Instance) -> bool {
        match self {
            Scope::All => true,
            Scope::Owner(owner) => &instance.user_id == owner,
            Scope::Ids(ids) => ids.contains(&instance.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstanceQuery {
    pub limit: usize,
    pub offset: usize,
    pub sort: SortField,
    pub ascending: bool,
    pub search: Option<Regex>,
    pub include_generated: bool,
    pub scope: Scope,
}

impl InstanceQuery {
    /// Unscoped page of all instances ordered by name.
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            sort: SortField::Name,
            ascending: true,
            search: None,
            include_generated: true,
            scope: Scope::All,
        }
    }

    /// Rejects an invalid search expression.
    pub fn from_request(request: &ListInstancesRequest, scope: Scope) -> ControlPlaneResult<Self> {
        let search = request
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(|e| ControlPlaneError::ValidationError(format!("invalid search: {e}")))?;
        Ok(Self {
            limit: request.limit,
            offset: request.offset,
            sort: request.sort,
            ascending: request.ascending,
            search,
            include_generated: request.include_generated,
            scope,
        })
    }
}

/// Persistence of instance records.
///
/// `owner` restricts a lookup to records of that user; `None` is unscoped.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Returns the requested page and the number of records in the query's scope.
    async fn list(&self, query: &InstanceQuery) -> ControlPlaneResult<(Vec<Instance>, usize)>;

    async fn get(&self, id: &str, owner: Option<&str>) -> ControlPlaneResult<Option<Instance>>;

    /// Returns the found records and whether every id was found.
    async fn get_many(
        &self,
        ids: &[String],
        owner: Option<&str>,
    ) -> ControlPlaneResult<(Vec<Instance>, bool)>;

    /// Inserts or replaces the record with the same id.
    async fn put(&self, instance: Instance) -> ControlPlaneResult<()>;

    async fn delete_many(&self, ids: &[String], owner: Option<&str>) -> ControlPlaneResult<()>;
}

fn compare(a: &Instance, b: &Instance, sort: SortField) -> Ordering {
    let primary = match sort {
        SortField::Id => a.id.cmp(&b.id),
        SortField::Name => a.name.cmp(&b.name),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

fn owned_by(instance: &Instance, owner: Option<&str>) -> bool {
    owner.map_or(true, |owner| instance.user_id == owner)
}

/// Applies scope, filters, ordering and pagination to a record set.
pub(crate) fn select<'a>(
    records: impl Iterator<Item = &'a Instance>,
    query: &InstanceQuery,
) -> (Vec<Instance>, usize) {
    let scoped: Vec<&Instance> = records.filter(|i| query.scope.contains(i)).collect();
    let total = scoped.len();

    let mut matching: Vec<&Instance> = scoped
        .into_iter()
        .filter(|i| query.include_generated || !i.generated)
        .filter(|i| query.search.as_ref().map_or(true, |re| re.is_match(&i.name)))
        .collect();
    matching.sort_by(|a, b| {
        let ordering = compare(a, b, query.sort);
        if query.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });

    let page = matching
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .cloned()
        .collect();
    (page, total)
}

pub(crate) fn find_many(
    storage: &HashMap<String, Instance>,
    ids: &[String],
    owner: Option<&str>,
) -> (Vec<Instance>, bool) {
    let mut seen: HashSet<&str> = HashSet::new();
    let unique: Vec<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();
    let found: Vec<Instance> = unique
        .iter()
        .filter_map(|id| storage.get(*id))
        .filter(|i| owned_by(i, owner))
        .cloned()
        .collect();
    let all_exist = found.len() == unique.len();
    (found, all_exist)
}

pub(crate) fn remove_many(
    storage: &mut HashMap<String, Instance>,
    ids: &[String],
    owner: Option<&str>,
) {
    for id in ids {
        if storage.get(id).is_some_and(|i| owned_by(i, owner)) {
            storage.remove(id);
        }
    }
}

fn poisoned() -> ControlPlaneError {
    ControlPlaneError::StorageError("Lock poisoned".to_string())
}

/// In-memory implementation of the instance store
#[derive(Clone, Default)]
pub struct InMemoryInstanceStore {
    storage: Arc<RwLock<HashMap<String, Instance>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_records(records: impl IntoIterator<Item = Instance>) -> Self {
        let storage = records.into_iter().map(|i| (i.id.clone(), i)).collect();
        Self {
            storage: Arc::new(RwLock::new(storage)),
        }
    }

    pub(crate) fn snapshot(&self) -> ControlPlaneResult<Vec<Instance>> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        let mut records: Vec<Instance> = storage.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    pub fn len(&self) -> ControlPlaneResult<usize> {
        Ok(self.storage.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> ControlPlaneResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn list(&self, query: &InstanceQuery) -> ControlPlaneResult<(Vec<Instance>, usize)> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(select(storage.values(), query))
    }

    async fn get(&self, id: &str, owner: Option<&str>) -> ControlPlaneResult<Option<Instance>> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(storage.get(id).filter(|i| owned_by(i, owner)).cloned())
    }

    async fn get_many(
        &self,
        ids: &[String],
        owner: Option<&str>,
    ) -> ControlPlaneResult<(Vec<Instance>, bool)> {
        let storage = self.storage.read().map_err(|_| poisoned())?;
        Ok(find_many(&storage, ids, owner))
    }

    async fn put(&self, instance: Instance) -> ControlPlaneResult<()> {
        let mut storage = self.storage.write().map_err(|_| poisoned())?;
        storage.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn delete_many(&self, ids: &[String], owner: Option<&str>) -> ControlPlaneResult<()> {
        let mut storage = self.storage.write().map_err(|_| poisoned())?;
        remove_many(&mut storage, ids, owner);
        Ok(())
    }
}
