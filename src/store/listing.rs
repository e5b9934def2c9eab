use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const DEFAULT_ITEM_PER_PAGE: u32 = 12;
pub const MAX_PER_PAGE: u32 = 200;
const MAX_SEARCH_LEN: usize = 200;

pub const ROLE_SORTS: &[&str] = &["id", "name", "created_at", "updated_at"];
pub const PERMISSION_SORTS: &[&str] = &["id", "name", "created_at", "updated_at"];
pub const USER_SORTS: &[&str] = &["id", "name", "username", "email", "created_at", "updated_at"];

const DEFAULT_SORT: &str = "id";

/// Raw list parameters as they arrive from a query string.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub guard_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|d| d.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }

    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A normalized list query. Unknown sort keys and directions never error;
/// they clamp to `id DESC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub search: Option<String>,
    pub sort: &'static str,
    pub dir: SortDir,
    pub page: u32,
    pub per_page: u32,
    pub guard: Option<String>,
}

impl ListQuery {
    #[must_use]
    pub fn from_params(params: &ListParams, allowed_sorts: &[&'static str]) -> Self {
        let sort = params
            .sort
            .as_deref()
            .map(str::trim)
            .and_then(|s| allowed_sorts.iter().copied().find(|allowed| *allowed == s))
            .unwrap_or(DEFAULT_SORT);

        Self {
            search: normalize_search(params.search.as_deref()),
            sort,
            dir: SortDir::parse(params.dir.as_deref()),
            page: params.page.unwrap_or(1).max(1),
            per_page: clamp_per_page(params.per_page, DEFAULT_PER_PAGE),
            guard: params
                .guard_name
                .as_deref()
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string),
        }
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.per_page)
    }

    /// ORDER BY clause body. Ties on non-id keys fall back to id so pages are stable.
    #[must_use]
    pub fn order_by(&self) -> String {
        if self.sort == DEFAULT_SORT {
            format!("id {}", self.dir.as_sql())
        } else {
            format!("{} {}, id {}", self.sort, self.dir.as_sql(), self.dir.as_sql())
        }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::from_params(&ListParams::default(), &[DEFAULT_SORT])
    }
}

/// Where an item sits relative to folders when listing notes or files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderFilter {
    Any,
    Unfiled,
    In(i64),
}

impl FolderFilter {
    /// Parses `folder_id`: absent or empty means any, `null` means unfiled.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::Any),
            Some("null") => Ok(Self::Unfiled),
            Some(id) => id
                .parse::<i64>()
                .map(Self::In)
                .map_err(|_| Error::validation(format!("Invalid folder_id: {id}"))),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ItemListParams {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub page: Option<u32>,
}

/// Listing of one owner's notes or files, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    pub search: Option<String>,
    pub folder: FolderFilter,
    pub page: u32,
    pub per_page: u32,
}

impl ItemQuery {
    pub fn from_params(params: &ItemListParams) -> Result<Self> {
        Ok(Self {
            search: normalize_search(params.search.as_deref()),
            folder: FolderFilter::parse(params.folder_id.as_deref())?,
            page: params.page.unwrap_or(1).max(1),
            per_page: clamp_per_page(params.per_page, DEFAULT_ITEM_PER_PAGE),
        })
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            search: None,
            folder: FolderFilter::Any,
            page: 1,
            per_page: DEFAULT_ITEM_PER_PAGE,
        }
    }
}

fn clamp_per_page(raw: Option<u32>, default: u32) -> u32 {
    raw.unwrap_or(default).clamp(1, MAX_PER_PAGE)
}

fn normalize_search(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_SEARCH_LEN).collect())
}

/// Builds a `%term%` pattern for `LIKE ... ESCAPE '\'`.
#[must_use]
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub last_page: u32,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(data: Vec<T>, total: i64, page: u32, per_page: u32) -> Self {
        let pages = (total.max(0) as u64).div_ceil(u64::from(per_page.max(1)));
        Self {
            data,
            total,
            page,
            per_page,
            last_page: pages.max(1) as u32,
        }
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            last_page: self.last_page,
        }
    }

    pub fn try_map<U, F>(self, f: F) -> Result<Page<U>>
    where
        F: FnMut(T) -> Result<U>,
    {
        Ok(Page {
            data: self.data.into_iter().map(f).collect::<Result<Vec<_>>>()?,
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            last_page: self.last_page,
        })
    }
}
