pub mod models;
pub mod schema;
pub mod sqlite;

use crate::errors::Result;
use models::{CategoryCount, ClothItem, ItemFilter, NewClothItem, StorageStats};

/// Typed access to the catalogue. Every list-returning operation orders
/// items newest first.
pub trait ClothStorage {
    fn insert(&self, item: NewClothItem) -> Result<i64>;
    fn update(&self, item: &ClothItem) -> Result<usize>;
    fn delete(&self, item: &ClothItem) -> Result<usize>;
    fn delete_by_id(&self, id: i64) -> Result<usize>;
    fn get_by_id(&self, id: i64) -> Result<Option<ClothItem>>;
    fn get_all(&self) -> Result<Vec<ClothItem>>;
    fn get_by_category(&self, category: &str) -> Result<Vec<ClothItem>>;
    fn get_by_size_range(&self, min: i32, max: i32) -> Result<Vec<ClothItem>>;
    fn get_count(&self) -> Result<i64>;
    fn search(&self, query: &str) -> Result<Vec<ClothItem>>;
    fn list(&self, filter: &ItemFilter) -> Result<Vec<ClothItem>>;
    fn find_by_image_path(&self, path: &str) -> Result<Option<ClothItem>>;
    fn categories(&self) -> Result<Vec<CategoryCount>>;
    fn stats(&self) -> Result<StorageStats>;
}
