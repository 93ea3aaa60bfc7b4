use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ClothError, Result};

pub const MAX_MEMO_CHARS: usize = 1000;

/// Structured metadata attached to one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagData {
    pub size: i32,
    pub color: String,
    pub category: String,
}

impl TagData {
    /// Trims the text fields and rejects negative sizes.
    pub fn normalized(self) -> Result<TagData> {
        if self.size < 0 {
            return Err(ClothError::InvalidInput(format!(
                "Size must not be negative (got {})",
                self.size
            )));
        }
        Ok(TagData {
            size: self.size,
            color: self.color.trim().to_string(),
            category: self.category.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClothItem {
    pub id: i64,
    pub image_path: String,
    pub tags: TagData,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewClothItem {
    pub image_path: String,
    pub tags: TagData,
    pub memo: Option<String>,
}

impl NewClothItem {
    pub fn new(image_path: impl Into<String>, tags: TagData) -> Self {
        Self {
            image_path: image_path.into(),
            tags,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

pub fn validate_memo(memo: &str) -> Result<()> {
    let len = memo.chars().count();
    if len > MAX_MEMO_CHARS {
        return Err(ClothError::MemoTooLong {
            len,
            max: MAX_MEMO_CHARS,
        });
    }
    Ok(())
}

/// Blank memos are stored as absent.
pub fn normalize_memo(memo: Option<String>) -> Result<Option<String>> {
    match memo {
        Some(m) if m.trim().is_empty() => Ok(None),
        Some(m) => {
            validate_memo(&m)?;
            Ok(Some(m))
        }
        None => Ok(None),
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct StorageStats {
    pub total_items: i64,
    pub items_with_memo: i64,
    pub smallest_size: Option<i32>,
    pub largest_size: Option<i32>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub categories: Vec<CategoryCount>,
}

/// Every set field narrows the result; `limit: None` returns everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    pub query: Option<String>,
    pub category: Option<String>,
    pub min_size: Option<i32>,
    pub max_size: Option<i32>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl ItemFilter {
    /// Rejects filters a caller can only have built by mistake: a limit of
    /// zero or less, a negative offset, or a size range with `min > max`.
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.limit
            && limit <= 0
        {
            return Err(ClothError::InvalidInput(format!(
                "limit must be at least 1, got {limit}"
            )));
        }
        if self.offset < 0 {
            return Err(ClothError::InvalidInput(format!(
                "offset must not be negative, got {}",
                self.offset
            )));
        }
        if let (Some(min), Some(max)) = (self.min_size, self.max_size)
            && min > max
        {
            return Err(ClothError::InvalidInput(format!(
                "min size {min} is larger than max size {max}"
            )));
        }
        Ok(())
    }

    /// SQLite reads a negative LIMIT as no limit.
    pub fn sql_limit(&self) -> i64 {
        match self.limit {
            Some(n) if n > 0 => n,
            _ => -1,
        }
    }
}
