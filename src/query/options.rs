//! Query options (pagination, filter, sort, relation inclusion) and result metadata.

use super::filter::Filter;
use crate::error::CollectionError;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upper bound for `perPage` and `limit`.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Pagination {
    #[serde(rename_all = "camelCase")]
    Page { page: u32, per_page: u32 },
    Cursor {
        limit: u32,
        #[serde(default)]
        cursor: Option<i64>,
    },
}

impl Pagination {
    /// Reject zero sizes and pages; clamp sizes to [`MAX_PAGE_SIZE`].
    pub fn normalized(&self) -> Result<Pagination, CollectionError> {
        match *self {
            Pagination::Page { page, per_page } => {
                if page < 1 {
                    return Err(CollectionError::field_validation("page", "page must be at least 1"));
                }
                if per_page < 1 {
                    return Err(CollectionError::field_validation("perPage", "perPage must be at least 1"));
                }
                Ok(Pagination::Page {
                    page,
                    per_page: per_page.min(MAX_PAGE_SIZE),
                })
            }
            Pagination::Cursor { limit, cursor } => {
                if limit < 1 {
                    return Err(CollectionError::field_validation("limit", "limit must be at least 1"));
                }
                Ok(Pagination::Cursor {
                    limit: limit.min(MAX_PAGE_SIZE),
                    cursor,
                })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PaginationMeta {
    #[serde(rename_all = "camelCase")]
    Page {
        current_page: u32,
        per_page: u64,
        total: u64,
        page_count: u64,
        has_next_page: bool,
        has_prev_page: bool,
    },
    #[serde(rename_all = "camelCase")]
    Cursor {
        has_more: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_cursor: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prev_cursor: Option<i64>,
        total: u64,
    },
}

impl PaginationMeta {
    pub fn page(page: u32, per_page: u32, total: u64) -> Self {
        let page_count = total.div_ceil(per_page as u64);
        PaginationMeta::Page {
            current_page: page,
            per_page: per_page as u64,
            total,
            page_count,
            has_next_page: (page as u64) < page_count,
            has_prev_page: page > 1,
        }
    }

    /// Everything in one page.
    pub fn unpaginated(total: u64) -> Self {
        PaginationMeta::Page {
            current_page: 1,
            per_page: total,
            total,
            page_count: 1,
            has_next_page: false,
            has_prev_page: false,
        }
    }

    pub fn cursor(limit: u32, cursor: Option<i64>, total: u64, returned: usize, last_id: Option<i64>) -> Self {
        let has_more = returned as u64 == limit as u64;
        PaginationMeta::Cursor {
            has_more,
            next_cursor: if has_more { last_id } else { None },
            prev_cursor: cursor,
            total,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default)]
    pub include_relations: bool,
}

fn parse_number<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str) -> Result<Option<T>, CollectionError> {
    params
        .get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| {
                CollectionError::field_validation(key, format!("{} must be a non-negative integer, got \"{}\"", key, raw))
            })
        })
        .transpose()
}

/// `true`/`1` or `false`/`0`; absent is false.
pub fn parse_flag(params: &HashMap<String, String>, key: &str) -> Result<bool, CollectionError> {
    match params.get(key).map(|s| s.trim()) {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(CollectionError::field_validation(
            key,
            format!("{} must be true or false, got \"{}\"", key, other),
        )),
    }
}

/// `title:asc,createdAt:desc`; a missing direction means ascending.
pub fn parse_sort(raw: &str) -> Result<Vec<SortField>, CollectionError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (field, dir) = item.split_once(':').unwrap_or((item, "asc"));
            let direction = match dir.trim().to_ascii_lowercase().as_str() {
                "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                other => {
                    return Err(CollectionError::field_validation(
                        "sort",
                        format!("sort direction must be asc or desc, got \"{}\"", other),
                    ))
                }
            };
            Ok(SortField {
                field: field.trim().to_string(),
                direction,
            })
        })
        .collect()
}

impl QueryOptions {
    /// Parse the query-string form: `type=page&page=2&perPage=20`, `type=cursor&limit=50&cursor=120`,
    /// `filter=<json>`, `sort=field:dir,...`, `includeRelations=true`. Without `type`, the presence of
    /// `limit`/`cursor` selects cursor mode and `page`/`perPage` selects page mode.
    pub fn from_params(params: &HashMap<String, String>) -> Result<QueryOptions, CollectionError> {
        let page = parse_number::<u32>(params, "page")?;
        let per_page = parse_number::<u32>(params, "perPage")?;
        let limit = parse_number::<u32>(params, "limit")?;
        let cursor = parse_number::<i64>(params, "cursor")?;
        let mode = match params.get("type").map(|s| s.trim()) {
            Some("page") => Some("page"),
            Some("cursor") => Some("cursor"),
            Some(other) => {
                return Err(CollectionError::field_validation(
                    "type",
                    format!("pagination type must be page or cursor, got \"{}\"", other),
                ))
            }
            None if limit.is_some() || cursor.is_some() => Some("cursor"),
            None if page.is_some() || per_page.is_some() => Some("page"),
            None => None,
        };
        let pagination = match mode {
            Some("page") => Some(Pagination::Page {
                page: page.unwrap_or(1),
                per_page: per_page.unwrap_or(25),
            }),
            Some(_) => Some(Pagination::Cursor {
                limit: limit.unwrap_or(25),
                cursor,
            }),
            None => None,
        };
        let pagination = pagination.as_ref().map(Pagination::normalized).transpose()?;
        let filter = params
            .get("filter")
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                let v: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
                    CollectionError::field_validation("filter", format!("filter is not valid JSON: {}", e))
                })?;
                Filter::from_json(&v)
            })
            .transpose()?;
        let sort = params.get("sort").map(|s| parse_sort(s)).transpose()?.unwrap_or_default();
        Ok(QueryOptions {
            pagination,
            filter,
            sort,
            include_relations: parse_flag(params, "includeRelations")?,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub data: Vec<Record>,
    pub meta: PaginationMeta,
}
