use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{info, warn};

use crate::errors::{ClothError, Result};
use crate::storage::ClothStorage;
use crate::storage::models::{
    CategoryCount, ClothItem, ItemFilter, NewClothItem, StorageStats, TagData, normalize_memo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Inserted(i64),
    Updated(i64),
    Deleted(i64),
}

/// Validating front for a [`ClothStorage`] that announces every successful
/// write to its subscribers.
pub struct ClothRepository<S: ClothStorage> {
    storage: S,
    subscribers: RefCell<Vec<Sender<ChangeEvent>>>,
}

impl<S: ClothStorage> ClothRepository<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Stream of change events for every write made after this call.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    fn notify(&self, event: ChangeEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.send(event).is_ok());
    }

    pub fn add(&self, item: NewClothItem) -> Result<ClothItem> {
        let item = NewClothItem {
            image_path: item.image_path,
            tags: item.tags.normalized()?,
            memo: normalize_memo(item.memo)?,
        };
        let id = self.storage.insert(item)?;
        info!(id, "added item");
        self.notify(ChangeEvent::Inserted(id));
        self.get(id)
    }

    pub fn get(&self, id: i64) -> Result<ClothItem> {
        self.storage
            .get_by_id(id)?
            .ok_or_else(|| ClothError::NotFound(format!("Item with id {} not found", id)))
    }

    pub fn all(&self) -> Result<Vec<ClothItem>> {
        self.storage.get_all()
    }

    pub fn search(&self, query: &str) -> Result<Vec<ClothItem>> {
        self.storage.search(query)
    }

    pub fn by_category(&self, category: &str) -> Result<Vec<ClothItem>> {
        self.storage.get_by_category(category)
    }

    pub fn by_size_range(&self, min: i32, max: i32) -> Result<Vec<ClothItem>> {
        self.storage.get_by_size_range(min, max)
    }

    pub fn filtered(&self, filter: &ItemFilter) -> Result<Vec<ClothItem>> {
        self.storage.list(filter)
    }

    pub fn count(&self) -> Result<i64> {
        self.storage.get_count()
    }

    pub fn categories(&self) -> Result<Vec<CategoryCount>> {
        self.storage.categories()
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    pub fn find_by_image_path(&self, path: &str) -> Result<Option<ClothItem>> {
        self.storage.find_by_image_path(path)
    }

    /// Writes the whole item; the last write wins.
    pub fn update(&self, item: &ClothItem) -> Result<usize> {
        let item = ClothItem {
            tags: item.tags.clone().normalized()?,
            memo: normalize_memo(item.memo.clone())?,
            ..item.clone()
        };
        let changes = self.storage.update(&item)?;
        if changes > 0 {
            self.notify(ChangeEvent::Updated(item.id));
        }
        Ok(changes)
    }

    /// Replaces the tag data only.
    pub fn update_tags(&self, id: i64, tags: TagData) -> Result<ClothItem> {
        let current = self.get(id)?;
        let updated = ClothItem {
            tags: tags.normalized()?,
            ..current
        };
        self.write_back(updated)
    }

    /// Replaces the memo only; `None` or blank text clears it.
    pub fn update_memo(&self, id: i64, memo: Option<String>) -> Result<ClothItem> {
        let memo = normalize_memo(memo)?;
        let current = self.get(id)?;
        let updated = ClothItem { memo, ..current };
        self.write_back(updated)
    }

    fn write_back(&self, item: ClothItem) -> Result<ClothItem> {
        if self.storage.update(&item)? == 0 {
            return Err(ClothError::NotFound(format!(
                "Item with id {} not found",
                item.id
            )));
        }
        self.notify(ChangeEvent::Updated(item.id));
        self.get(item.id)
    }

    /// Deletes the item. With `remove_file`, the image file is removed
    /// afterwards on a best-effort basis.
    pub fn delete(&self, id: i64, remove_file: bool) -> Result<bool> {
        let Some(item) = self.storage.get_by_id(id)? else {
            return Ok(false);
        };
        if self.storage.delete(&item)? == 0 {
            return Ok(false);
        }
        info!(id, "deleted item");
        self.notify(ChangeEvent::Deleted(id));

        if remove_file {
            remove_image_file(Path::new(&item.image_path));
        }
        Ok(true)
    }
}

fn remove_image_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed image file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove image file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::MAX_MEMO_CHARS;
    use crate::storage::sqlite::SqliteStorage;
    use tempfile::TempDir;

    fn test_repo() -> ClothRepository<SqliteStorage> {
        ClothRepository::new(SqliteStorage::in_memory().unwrap())
    }

    fn tags(size: i32, color: &str, category: &str) -> TagData {
        TagData {
            size,
            color: color.to_string(),
            category: category.to_string(),
        }
    }

    #[test]
    fn test_add_normalizes_tags_and_memo() {
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, " red ", "tops ")).with_memo("  "))
            .unwrap();
        assert_eq!(item.tags.color, "red");
        assert_eq!(item.tags.category, "tops");
        assert!(item.memo.is_none());
    }

    #[test]
    fn test_add_rejects_long_memo_before_persisting() {
        let repo = test_repo();
        let result = repo.add(
            NewClothItem::new("/img/a.jpg", tags(100, "red", "tops"))
                .with_memo("m".repeat(MAX_MEMO_CHARS + 1)),
        );
        assert!(matches!(result, Err(ClothError::MemoTooLong { .. })));
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let repo = test_repo();
        assert!(matches!(repo.get(7), Err(ClothError::NotFound(_))));
    }

    #[test]
    fn test_update_tags_keeps_path_and_memo() {
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")).with_memo("soft"))
            .unwrap();
        let updated = repo.update_tags(item.id, tags(110, "blue", "pants")).unwrap();
        assert_eq!(updated.tags, tags(110, "blue", "pants"));
        assert_eq!(updated.image_path, "/img/a.jpg");
        assert_eq!(updated.memo.as_deref(), Some("soft"));
        assert_eq!(updated.created_at, item.created_at);
    }

    #[test]
    fn test_update_memo_keeps_tags() {
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")))
            .unwrap();
        let updated = repo
            .update_memo(item.id, Some("button missing".to_string()))
            .unwrap();
        assert_eq!(updated.memo.as_deref(), Some("button missing"));
        assert_eq!(updated.tags, item.tags);

        let cleared = repo.update_memo(item.id, None).unwrap();
        assert!(cleared.memo.is_none());
    }

    #[test]
    fn test_failed_memo_update_keeps_prior_value() {
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")).with_memo("before"))
            .unwrap();
        let result = repo.update_memo(item.id, Some("z".repeat(MAX_MEMO_CHARS + 1)));
        assert!(matches!(result, Err(ClothError::MemoTooLong { .. })));
        assert_eq!(repo.get(item.id).unwrap().memo.as_deref(), Some("before"));
    }

    #[test]
    fn test_update_tags_missing_item() {
        let repo = test_repo();
        let result = repo.update_tags(3, tags(1, "", ""));
        assert!(matches!(result, Err(ClothError::NotFound(_))));
    }

    #[test]
    fn test_update_last_write_wins() {
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")))
            .unwrap();
        let mut first = item.clone();
        first.tags.color = "green".to_string();
        let mut second = item.clone();
        second.tags.color = "black".to_string();
        assert_eq!(repo.update(&first).unwrap(), 1);
        assert_eq!(repo.update(&second).unwrap(), 1);
        assert_eq!(repo.get(item.id).unwrap().tags.color, "black");
    }

    #[test]
    fn test_delete_removes_from_lists() {
        let repo = test_repo();
        let keep = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")))
            .unwrap();
        let gone = repo
            .add(NewClothItem::new("/img/b.jpg", tags(100, "red", "tops")))
            .unwrap();
        assert!(repo.delete(gone.id, false).unwrap());
        let ids: Vec<i64> = repo.all().unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![keep.id]);
        assert!(!repo.delete(gone.id, false).unwrap());
    }

    #[test]
    fn test_delete_with_file_removal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new(path.to_string_lossy(), tags(100, "", "")))
            .unwrap();
        assert!(repo.delete(item.id, true).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_delete_keeps_file_by_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, b"bytes").unwrap();
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new(path.to_string_lossy(), tags(100, "", "")))
            .unwrap();
        repo.delete(item.id, false).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_subscribers_see_changes_in_order() {
        let repo = test_repo();
        let rx = repo.subscribe();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")))
            .unwrap();
        repo.update_tags(item.id, tags(90, "red", "tops")).unwrap();
        repo.delete(item.id, false).unwrap();
        let events: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ChangeEvent::Inserted(item.id),
                ChangeEvent::Updated(item.id),
                ChangeEvent::Deleted(item.id),
            ]
        );
    }

    #[test]
    fn test_failed_write_is_not_announced() {
        let repo = test_repo();
        let item = repo
            .add(NewClothItem::new("/img/a.jpg", tags(100, "red", "tops")))
            .unwrap();
        let rx = repo.subscribe();
        let _ = repo.update_memo(item.id, Some("q".repeat(MAX_MEMO_CHARS + 1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let repo = test_repo();
        drop(repo.subscribe());
        repo.add(NewClothItem::new("/img/a.jpg", tags(1, "", "")))
            .unwrap();
        assert!(repo.subscribers.borrow().is_empty());
    }
}
