use serde::{Deserialize, Serialize};

use crate::models::Devotee;

/// Devotees per page on the devotee list.
pub const DEVOTEES_PER_PAGE: usize = 20;
/// Devotees per page on the mark-attendance screen.
pub const ATTENDANCE_PER_PAGE: usize = 30;
/// Rows per page on the attendance report.
pub const REPORT_PER_PAGE: usize = 20;

/// Which devotee field a search string is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Id,
    Phone,
    Name,
    Type,
}

impl SearchType {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("phone") => SearchType::Phone,
            Some("name") => SearchType::Name,
            Some("type") => SearchType::Type,
            _ => SearchType::Id,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Id => "id",
            SearchType::Phone => "phone",
            SearchType::Name => "name",
            SearchType::Type => "type",
        }
    }
}

/// Does `devotee` match `query` under `search_type`? An empty query matches.
///
/// An all-digit id query must match exactly; anything else is a
/// case-insensitive substring match.
pub fn matches(devotee: &Devotee, query: &str, search_type: SearchType) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();

    match search_type {
        SearchType::Id => {
            if query.chars().all(|c| c.is_ascii_digit()) {
                devotee.devotee_id == query
            } else {
                devotee.devotee_id.to_lowercase().contains(&needle)
            }
        }
        SearchType::Phone => devotee.contact_number.contains(query),
        SearchType::Name => devotee.name.to_lowercase().contains(&needle),
        SearchType::Type => devotee.devotee_type.as_str().contains(&needle),
    }
}

/// Order devotees by the numeric value of their printed id. Ids that are
/// not plain numbers sort as 0; ties fall back to the id string.
pub fn sort_by_devotee_id(devotees: &mut [Devotee]) {
    devotees.sort_by(|a, b| {
        numeric_id(&a.devotee_id)
            .cmp(&numeric_id(&b.devotee_id))
            .then_with(|| a.devotee_id.cmp(&b.devotee_id))
    });
}

fn numeric_id(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

/// One page of a larger result set.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub per_page: usize,
    pub total_count: usize,
    pub total_pages: usize,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous: Option<usize>,
    pub next: Option<usize>,
}

impl<T> Page<T> {
    /// Cut page `number` (1-based; values below 1 mean 1) out of `all`.
    pub fn paginate(all: Vec<T>, number: usize, per_page: usize) -> Self {
        let number = number.max(1);
        let per_page = per_page.max(1);
        let total_count = all.len();
        let total_pages = total_count.div_ceil(per_page);

        let items: Vec<T> = all
            .into_iter()
            .skip((number - 1) * per_page)
            .take(per_page)
            .collect();

        let has_previous = number > 1;
        let has_next = number < total_pages;
        Page {
            items,
            number,
            per_page,
            total_count,
            total_pages,
            has_previous,
            has_next,
            previous: has_previous.then(|| number - 1),
            next: has_next.then(|| number + 1),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            per_page: self.per_page,
            total_count: self.total_count,
            total_pages: self.total_pages,
            has_previous: self.has_previous,
            has_next: self.has_next,
            previous: self.previous,
            next: self.next,
        }
    }
}
