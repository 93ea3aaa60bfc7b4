use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::ClothStorage;
use super::models::{
    CategoryCount, ClothItem, ItemFilter, NewClothItem, StorageStats, TagData, validate_memo,
};
use super::schema;
use crate::errors::{ClothError, Result};

const BASE_SELECT: &str = "
    SELECT id, image_path, size, color, category, memo, created_at
    FROM cloth_items
";

const ORDER_NEWEST_FIRST: &str = "ORDER BY created_at DESC, id DESC";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteStorage {
    conn: Connection,
}

fn row_to_item(row: &Row) -> rusqlite::Result<ClothItem> {
    Ok(ClothItem {
        id: row.get(0)?,
        image_path: row.get(1)?,
        tags: TagData {
            size: row.get(2)?,
            color: row.get(3)?,
            category: row.get(4)?,
        },
        memo: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Escapes `LIKE` wildcards so user text matches literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl SqliteStorage {
    pub fn new(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    /// Changes whenever another connection commits to the database.
    pub fn data_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))?)
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn query_items(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<ClothItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let items = stmt
            .query_map(params, row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

impl ClothStorage for SqliteStorage {
    fn insert(&self, item: NewClothItem) -> Result<i64> {
        if item.image_path.trim().is_empty() {
            return Err(ClothError::InvalidInput("Image path must not be empty".to_string()));
        }
        if let Some(ref memo) = item.memo {
            validate_memo(memo)?;
        }
        self.conn.execute(
            "INSERT INTO cloth_items (image_path, size, color, category, memo, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                item.image_path,
                item.tags.size,
                item.tags.color,
                item.tags.category,
                item.memo,
                Utc::now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "inserted item");
        Ok(id)
    }

    fn update(&self, item: &ClothItem) -> Result<usize> {
        if let Some(ref memo) = item.memo {
            validate_memo(memo)?;
        }
        let changes = self.conn.execute(
            "UPDATE cloth_items
             SET image_path = ?, size = ?, color = ?, category = ?, memo = ?
             WHERE id = ?",
            params![
                item.image_path,
                item.tags.size,
                item.tags.color,
                item.tags.category,
                item.memo,
                item.id,
            ],
        )?;
        Ok(changes)
    }

    fn delete(&self, item: &ClothItem) -> Result<usize> {
        self.delete_by_id(item.id)
    }

    fn delete_by_id(&self, id: i64) -> Result<usize> {
        let changes = self
            .conn
            .execute("DELETE FROM cloth_items WHERE id = ?", params![id])?;
        Ok(changes)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<ClothItem>> {
        let sql = format!("{} WHERE id = ?", BASE_SELECT);
        Ok(self
            .conn
            .query_row(&sql, params![id], row_to_item)
            .optional()?)
    }

    fn get_all(&self) -> Result<Vec<ClothItem>> {
        self.list(&ItemFilter::default())
    }

    fn get_by_category(&self, category: &str) -> Result<Vec<ClothItem>> {
        self.list(&ItemFilter {
            category: Some(category.to_string()),
            ..Default::default()
        })
    }

    fn get_by_size_range(&self, min: i32, max: i32) -> Result<Vec<ClothItem>> {
        if min > max {
            return Err(ClothError::InvalidInput(format!(
                "Size range {}-{} is empty",
                min, max
            )));
        }
        self.list(&ItemFilter {
            min_size: Some(min),
            max_size: Some(max),
            ..Default::default()
        })
    }

    fn get_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM cloth_items", [], |row| row.get(0))?)
    }

    fn search(&self, query: &str) -> Result<Vec<ClothItem>> {
        self.list(&ItemFilter {
            query: Some(query.to_string()),
            ..Default::default()
        })
    }

    fn list(&self, filter: &ItemFilter) -> Result<Vec<ClothItem>> {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref query) = filter.query
            && !query.is_empty()
        {
            conditions.push(
                "(CAST(size AS TEXT) LIKE '%' || ?1 || '%' ESCAPE '\\'
                  OR color LIKE '%' || ?1 || '%' ESCAPE '\\'
                  OR category LIKE '%' || ?1 || '%' ESCAPE '\\'
                  OR COALESCE(memo, '') LIKE '%' || ?1 || '%' ESCAPE '\\')"
                    .to_string(),
            );
            param_values.push(Box::new(escape_like(query)));
        }
        if let Some(ref category) = filter.category {
            conditions.push(format!("category = ?{}", param_values.len() + 1));
            param_values.push(Box::new(category.clone()));
        }
        if let Some(min) = filter.min_size {
            conditions.push(format!("size >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(min));
        }
        if let Some(max) = filter.max_size {
            conditions.push(format!("size <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(max));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_idx = param_values.len() + 1;
        let sql = format!(
            "{} {} {} LIMIT ?{} OFFSET ?{}",
            BASE_SELECT,
            where_clause,
            ORDER_NEWEST_FIRST,
            limit_idx,
            limit_idx + 1
        );
        param_values.push(Box::new(filter.sql_limit()));
        param_values.push(Box::new(filter.offset.max(0)));

        debug!(?filter, "listing items");
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        self.query_items(&sql, param_refs.as_slice())
    }

    fn find_by_image_path(&self, path: &str) -> Result<Option<ClothItem>> {
        let sql = format!("{} WHERE image_path = ? {} LIMIT 1", BASE_SELECT, ORDER_NEWEST_FIRST);
        Ok(self
            .conn
            .query_row(&sql, params![path], row_to_item)
            .optional()?)
    }

    fn categories(&self) -> Result<Vec<CategoryCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, COUNT(*) FROM cloth_items GROUP BY category ORDER BY category",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(CategoryCount {
                    category: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    fn stats(&self) -> Result<StorageStats> {
        let mut stats = self.conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(CASE WHEN memo IS NOT NULL AND memo != '' THEN 1 END),
                MIN(size),
                MAX(size),
                MIN(created_at),
                MAX(created_at)
             FROM cloth_items",
            [],
            |row| {
                Ok(StorageStats {
                    total_items: row.get(0)?,
                    items_with_memo: row.get(1)?,
                    smallest_size: row.get(2)?,
                    largest_size: row.get(3)?,
                    oldest: row.get(4)?,
                    newest: row.get(5)?,
                    categories: Vec::new(),
                })
            },
        )?;
        stats.categories = self.categories()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::MAX_MEMO_CHARS;

    fn test_storage() -> SqliteStorage {
        SqliteStorage::in_memory().unwrap()
    }

    fn item(path: &str, size: i32, color: &str, category: &str) -> NewClothItem {
        NewClothItem::new(
            path,
            TagData {
                size,
                color: color.to_string(),
                category: category.to_string(),
            },
        )
    }

    fn seed(storage: &SqliteStorage) -> Vec<i64> {
        vec![
            storage.insert(item("/img/1.jpg", 90, "Navy", "tops")).unwrap(),
            storage
                .insert(item("/img/2.jpg", 100, "red", "pants").with_memo("Grandma's gift, hand wash"))
                .unwrap(),
            storage.insert(item("/img/3.jpg", 110, "white", "tops")).unwrap(),
            storage
                .insert(item("/img/4.jpg", 120, "green", "outerwear").with_memo("zipper sticks"))
                .unwrap(),
        ]
    }

    // --- Schema ---

    #[test]
    fn test_in_memory_creates_table() {
        let storage = test_storage();
        let count: i64 = storage
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'cloth_items'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    // --- Insert ---

    #[test]
    fn test_insert_returns_incrementing_ids() {
        let storage = test_storage();
        let ids = seed(&storage);
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_insert_round_trips_fields() {
        let storage = test_storage();
        let id = storage
            .insert(item("/img/a.jpg", 95, "yellow", "dresses").with_memo("too short now"))
            .unwrap();
        let fetched = storage.get_by_id(id).unwrap().unwrap();
        assert_eq!(fetched.image_path, "/img/a.jpg");
        assert_eq!(fetched.tags.size, 95);
        assert_eq!(fetched.tags.color, "yellow");
        assert_eq!(fetched.tags.category, "dresses");
        assert_eq!(fetched.memo.as_deref(), Some("too short now"));
    }

    #[test]
    fn test_insert_rejects_long_memo() {
        let storage = test_storage();
        let result = storage.insert(item("/img/a.jpg", 1, "", "").with_memo("x".repeat(MAX_MEMO_CHARS + 1)));
        assert!(matches!(result, Err(ClothError::MemoTooLong { .. })));
        assert_eq!(storage.get_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_rejects_empty_path() {
        let storage = test_storage();
        let result = storage.insert(item("  ", 1, "", ""));
        assert!(matches!(result, Err(ClothError::InvalidInput(_))));
    }

    // --- Get ---

    #[test]
    fn test_get_by_id_not_found() {
        let storage = test_storage();
        assert!(storage.get_by_id(999).unwrap().is_none());
    }

    #[test]
    fn test_get_all_newest_first() {
        let storage = test_storage();
        seed(&storage);
        let items = storage.get_all().unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_get_by_category_exact_match() {
        let storage = test_storage();
        seed(&storage);
        let tops = storage.get_by_category("tops").unwrap();
        assert_eq!(tops.len(), 2);
        assert!(tops.iter().all(|i| i.tags.category == "tops"));
        assert!(storage.get_by_category("top").unwrap().is_empty());
    }

    #[test]
    fn test_get_by_size_range_inclusive() {
        let storage = test_storage();
        seed(&storage);
        let items = storage.get_by_size_range(100, 110).unwrap();
        let sizes: Vec<i32> = items.iter().map(|i| i.tags.size).collect();
        assert_eq!(sizes, vec![110, 100]);
    }

    #[test]
    fn test_get_by_size_range_inverted_is_error() {
        let storage = test_storage();
        let result = storage.get_by_size_range(120, 90);
        assert!(matches!(result, Err(ClothError::InvalidInput(_))));
    }

    #[test]
    fn test_get_count() {
        let storage = test_storage();
        assert_eq!(storage.get_count().unwrap(), 0);
        seed(&storage);
        assert_eq!(storage.get_count().unwrap(), 4);
    }

    // --- Search ---

    #[test]
    fn test_search_is_case_insensitive() {
        let storage = test_storage();
        seed(&storage);
        let items = storage.search("NAVY").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].tags.color, "Navy");
    }

    #[test]
    fn test_search_matches_partial_memo() {
        let storage = test_storage();
        seed(&storage);
        let items = storage.search("hand w").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].image_path, "/img/2.jpg");
    }

    #[test]
    fn test_search_matches_category_and_memo_with_or() {
        let storage = test_storage();
        seed(&storage);
        // "er" hits category "outerwear" and memo "zipper" on item 4
        // and nothing else, so it must appear exactly once.
        let items = storage.search("er").unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn test_search_matches_size_text() {
        let storage = test_storage();
        seed(&storage);
        let items = storage.search("12").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].tags.size, 120);
    }

    #[test]
    fn test_search_wildcards_are_literal() {
        let storage = test_storage();
        seed(&storage);
        assert!(storage.search("%").unwrap().is_empty());
        assert!(storage.search("_").unwrap().is_empty());
        storage.insert(item("/img/5.jpg", 1, "", "").with_memo("100% cotton")).unwrap();
        assert_eq!(storage.search("0%").unwrap().len(), 1);
    }

    #[test]
    fn test_search_empty_query_matches_all() {
        let storage = test_storage();
        seed(&storage);
        assert_eq!(storage.search("").unwrap().len(), 4);
    }

    // --- List ---

    #[test]
    fn test_list_combines_filters() {
        let storage = test_storage();
        seed(&storage);
        let items = storage
            .list(&ItemFilter {
                query: Some("i".to_string()),
                category: Some("tops".to_string()),
                min_size: Some(100),
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_list_limit_and_offset() {
        let storage = test_storage();
        seed(&storage);
        let items = storage
            .list(&ItemFilter {
                limit: Some(2),
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    // --- Update ---

    #[test]
    fn test_update_returns_affected_rows() {
        let storage = test_storage();
        let id = storage.insert(item("/img/a.jpg", 90, "red", "tops")).unwrap();
        let mut fetched = storage.get_by_id(id).unwrap().unwrap();
        fetched.tags.color = "blue".to_string();
        assert_eq!(storage.update(&fetched).unwrap(), 1);
        assert_eq!(storage.get_by_id(id).unwrap().unwrap().tags.color, "blue");

        fetched.id = 999;
        assert_eq!(storage.update(&fetched).unwrap(), 0);
    }

    #[test]
    fn test_update_rejects_long_memo() {
        let storage = test_storage();
        let id = storage.insert(item("/img/a.jpg", 90, "red", "tops").with_memo("ok")).unwrap();
        let mut fetched = storage.get_by_id(id).unwrap().unwrap();
        fetched.memo = Some("y".repeat(MAX_MEMO_CHARS + 1));
        assert!(matches!(storage.update(&fetched), Err(ClothError::MemoTooLong { .. })));
        assert_eq!(storage.get_by_id(id).unwrap().unwrap().memo.as_deref(), Some("ok"));
    }

    // --- Delete ---

    #[test]
    fn test_delete_removes_from_all_queries() {
        let storage = test_storage();
        seed(&storage);
        let victim = storage.get_by_id(2).unwrap().unwrap();
        assert_eq!(storage.delete(&victim).unwrap(), 1);

        assert!(storage.get_by_id(2).unwrap().is_none());
        assert!(storage.get_all().unwrap().iter().all(|i| i.id != 2));
        assert!(storage.get_by_category("pants").unwrap().is_empty());
        assert!(storage.get_by_size_range(100, 100).unwrap().is_empty());
        assert!(storage.search("grandma").unwrap().is_empty());
        assert_eq!(storage.get_count().unwrap(), 3);
    }

    #[test]
    fn test_delete_by_id_missing() {
        let storage = test_storage();
        assert_eq!(storage.delete_by_id(42).unwrap(), 0);
    }

    // --- Lookup / aggregates ---

    #[test]
    fn test_find_by_image_path() {
        let storage = test_storage();
        seed(&storage);
        let found = storage.find_by_image_path("/img/3.jpg").unwrap().unwrap();
        assert_eq!(found.id, 3);
        assert!(storage.find_by_image_path("/img/none.jpg").unwrap().is_none());
    }

    #[test]
    fn test_categories_sorted_with_counts() {
        let storage = test_storage();
        seed(&storage);
        let cats = storage.categories().unwrap();
        let pairs: Vec<(&str, i64)> = cats.iter().map(|c| (c.category.as_str(), c.count)).collect();
        assert_eq!(pairs, vec![("outerwear", 1), ("pants", 1), ("tops", 2)]);
    }

    #[test]
    fn test_stats_empty() {
        let storage = test_storage();
        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.items_with_memo, 0);
        assert!(stats.smallest_size.is_none());
        assert!(stats.oldest.is_none());
        assert!(stats.categories.is_empty());
    }

    #[test]
    fn test_stats_counts() {
        let storage = test_storage();
        seed(&storage);
        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.items_with_memo, 2);
        assert_eq!(stats.smallest_size, Some(90));
        assert_eq!(stats.largest_size, Some(120));
        assert!(stats.oldest.is_some());
        assert!(stats.newest.is_some());
        assert_eq!(stats.categories.len(), 3);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_data_version_readable() {
        let storage = test_storage();
        assert!(storage.data_version().is_ok());
    }
}
