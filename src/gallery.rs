use crate::errors::Result;
use crate::repository::ClothRepository;
use crate::storage::ClothStorage;
use crate::storage::models::{ClothItem, ItemFilter};

/// What the gallery currently shows: search text plus filter chips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalleryQuery {
    pub text: String,
    pub category: Option<String>,
    pub size_range: Option<(i32, i32)>,
    pub limit: Option<i64>,
}

impl GalleryQuery {
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Blank input removes the chip.
    pub fn set_category(&mut self, category: Option<String>) {
        self.category = category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
    }

    pub fn set_size_range(&mut self, min: i32, max: i32) {
        self.size_range = Some(if min <= max { (min, max) } else { (max, min) });
    }

    pub fn clear_size_range(&mut self) {
        self.size_range = None;
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.category = None;
        self.size_range = None;
    }

    pub fn is_filtered(&self) -> bool {
        !self.text.trim().is_empty() || self.category.is_some() || self.size_range.is_some()
    }

    pub fn to_filter(&self) -> ItemFilter {
        let text = self.text.trim();
        ItemFilter {
            query: (!text.is_empty()).then(|| text.to_string()),
            category: self.category.clone(),
            min_size: self.size_range.map(|(min, _)| min),
            max_size: self.size_range.map(|(_, max)| max),
            limit: self.limit,
            offset: 0,
        }
    }

    pub fn fetch<S: ClothStorage>(&self, repo: &ClothRepository<S>) -> Result<Vec<ClothItem>> {
        repo.filtered(&self.to_filter())
    }

    /// Short label for the active chips, e.g. `"tops · 90-110"`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.text.trim().is_empty() {
            parts.push(format!("\"{}\"", self.text.trim()));
        }
        if let Some(ref category) = self.category {
            parts.push(category.clone());
        }
        if let Some((min, max)) = self.size_range {
            parts.push(format!("{min}-{max}"));
        }
        parts.join(" · ")
    }
}

/// Parses `"90-110"` (or a single `"100"`) into an inclusive size range.
pub fn parse_size_range(input: &str) -> Option<(i32, i32)> {
    let input = input.trim();
    match input.split_once('-') {
        Some((min, max)) => Some((min.trim().parse().ok()?, max.trim().parse().ok()?)),
        None => {
            let size = input.parse().ok()?;
            Some((size, size))
        }
    }
}
