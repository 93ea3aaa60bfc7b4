use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{ClothError, Result};
use crate::hash::photo_stem;
use crate::repository::ClothRepository;
use crate::storage::ClothStorage;
use crate::storage::models::{ClothItem, NewClothItem, TagData};

const PHOTO_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// A photo copied into the catalogue's images directory.
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub already_stored: bool,
}

impl StoredPhoto {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

pub fn is_photo_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| PHOTO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decodes `source` to make sure it is an image, then stores it under
/// `images_dir` named after its content hash. Importing the same bytes twice
/// yields the same path.
pub fn import_photo(source: &Path, images_dir: &Path) -> Result<StoredPhoto> {
    let data = fs::read(source)?;
    let format = image::guess_format(&data)
        .map_err(|e| ClothError::Image(format!("{}: {}", source.display(), e)))?;
    let img = image::load_from_memory_with_format(&data, format)
        .map_err(|e| ClothError::Image(format!("{}: {}", source.display(), e)))?;

    let ext = format.extensions_str().first().copied().unwrap_or("img");
    let path = images_dir.join(format!("{}.{}", photo_stem(&data), ext));
    let already_stored = path.exists();
    if !already_stored {
        fs::create_dir_all(images_dir)?;
        fs::write(&path, &data)?;
    }
    debug!(
        source = %source.display(),
        stored = %path.display(),
        already_stored,
        "imported photo"
    );

    Ok(StoredPhoto {
        path,
        width: img.width(),
        height: img.height(),
        size_bytes: data.len() as u64,
        already_stored,
    })
}

#[derive(Debug)]
pub enum ImportOutcome {
    Added(ClothItem),
    AlreadyCatalogued(ClothItem),
}

impl ImportOutcome {
    pub fn item(&self) -> &ClothItem {
        match self {
            ImportOutcome::Added(item) | ImportOutcome::AlreadyCatalogued(item) => item,
        }
    }
}

/// Stores the photo and adds it to the catalogue, unless the same photo is
/// already catalogued.
pub fn catalogue_photo<S: ClothStorage>(
    repo: &ClothRepository<S>,
    source: &Path,
    images_dir: &Path,
    tags: TagData,
    memo: Option<String>,
) -> Result<ImportOutcome> {
    let stored = import_photo(source, images_dir)?;
    let image_path = stored.path_string();
    if let Some(existing) = repo.find_by_image_path(&image_path)? {
        return Ok(ImportOutcome::AlreadyCatalogued(existing));
    }

    let new_item = NewClothItem {
        image_path,
        tags,
        memo,
    };
    match repo.add(new_item) {
        Ok(item) => Ok(ImportOutcome::Added(item)),
        Err(e) => {
            if !stored.already_stored
                && let Err(remove_err) = fs::remove_file(&stored.path)
            {
                warn!(
                    path = %stored.path.display(),
                    error = %remove_err,
                    "could not remove photo after failed insert"
                );
            }
            Err(e)
        }
    }
}
