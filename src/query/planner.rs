use crate::error::QueryError;
use crate::index::schema::{AttributeRole, IndexSchema};
use crate::query::filter::FilterExpr;
use crate::query::sort::SortExpr;
use crate::types::{Pagination, SearchRequest};
use std::sync::Arc;

/// Largest page a single request may ask for.
pub const DEFAULT_MAX_LIMIT: u32 = 1000;

/// A search request that passed schema validation. Only the planner
/// constructs these, so holding one means the request is safe to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    query: String,
    limit: u32,
    offset: u32,
    filters: Vec<String>,
    filter_exprs: Vec<FilterExpr>,
    sort_keys: Vec<String>,
    sort_exprs: Vec<SortExpr>,
}

impl PlannedQuery {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Filter expressions exactly as the caller wrote them.
    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn filter_exprs(&self) -> &[FilterExpr] {
        &self.filter_exprs
    }

    pub fn sort_keys(&self) -> &[String] {
        &self.sort_keys
    }

    pub fn sort_exprs(&self) -> &[SortExpr] {
        &self.sort_exprs
    }

    /// A request with no query, filters or sort lists the whole index.
    pub fn is_full_listing(&self) -> bool {
        self.query.is_empty() && self.filters.is_empty() && self.sort_keys.is_empty()
    }

    pub fn paginate(&self, total: u64, returned: usize) -> Pagination {
        Pagination::compute(total, self.limit, self.offset, returned)
    }
}

/// Validates search requests against the schema before dispatch.
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    schema: Arc<IndexSchema>,
    max_limit: u32,
}

impl QueryPlanner {
    pub fn new(schema: Arc<IndexSchema>, max_limit: u32) -> Self {
        QueryPlanner { schema, max_limit }
    }

    pub fn max_limit(&self) -> u32 {
        self.max_limit
    }

    pub fn plan(&self, request: &SearchRequest) -> Result<PlannedQuery, QueryError> {
        plan(request, &self.schema, self.max_limit)
    }
}

/// Checks run in order and stop at the first failure: limit range, filter
/// fields, then sort fields.
pub fn plan(
    request: &SearchRequest,
    schema: &IndexSchema,
    max_limit: u32,
) -> Result<PlannedQuery, QueryError> {
    if request.limit == 0 || request.limit > max_limit {
        return Err(QueryError::LimitOutOfRange {
            limit: request.limit,
            max: max_limit,
        });
    }

    let mut filter_exprs = Vec::with_capacity(request.filters.len());
    for expression in &request.filters {
        let expr = FilterExpr::parse(expression)?;
        if let Some(field) = expr
            .fields()
            .into_iter()
            .find(|f| !schema.has_role(f, AttributeRole::Filterable))
        {
            return Err(QueryError::FieldNotFilterable {
                field: field.to_string(),
            });
        }
        filter_exprs.push(expr);
    }

    let mut sort_exprs = Vec::with_capacity(request.sort_keys.len());
    for expression in &request.sort_keys {
        let expr = SortExpr::parse(expression)?;
        if !schema.has_role(&expr.field, AttributeRole::Sortable) {
            return Err(QueryError::FieldNotSortable { field: expr.field });
        }
        sort_exprs.push(expr);
    }

    tracing::debug!(
        "[PLAN {}] q={:?} limit={} offset={} filters={} sort={}",
        schema.index_name,
        request.query,
        request.limit,
        request.offset,
        filter_exprs.len(),
        sort_exprs.len()
    );

    Ok(PlannedQuery {
        query: request.query.clone(),
        limit: request.limit,
        offset: request.offset,
        filters: request.filters.clone(),
        filter_exprs,
        sort_keys: request.sort_keys.clone(),
        sort_exprs,
    })
}
