use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use image::{GrayImage, Luma};
use log::{info, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Decoded single-channel templates keyed by file name, plus a lazily filled mask cache.
pub struct TemplateLibrary {
    root: Option<PathBuf>,
    templates: BTreeMap<String, Arc<GrayImage>>,
    /// `None` entries remember masks that were missing or unreadable.
    masks: Mutex<HashMap<String, Option<Arc<GrayImage>>>>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_image(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut all = Vec::new();
    collect_images(dir, &mut all).ok()?;
    all.sort();
    all.into_iter()
        .find(|p| p.file_name().and_then(|f| f.to_str()) == Some(name))
}

/// Force a mask to 0/255.
pub fn binarize(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] > 127 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

impl TemplateLibrary {
    /// Recursively index every image below `root`.
    pub fn load(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            bail!("template directory not found: {}", root.display());
        }

        let mut paths = Vec::new();
        collect_images(root, &mut paths)?;
        paths.sort();

        let mut templates = BTreeMap::new();
        for path in paths {
            let Some(name) = path.file_name().and_then(|f| f.to_str()).map(str::to_string) else {
                continue;
            };
            match image::open(&path) {
                Ok(img) => {
                    templates.insert(name, Arc::new(img.to_luma8()));
                }
                Err(err) => warn!("[Template] failed to load {}: {err}", path.display()),
            }
        }

        info!("[Template] {} templates indexed from {}", templates.len(), root.display());
        Ok(Self {
            root: Some(root.to_path_buf()),
            templates,
            masks: Mutex::new(HashMap::new()),
        })
    }

    /// In-memory library, used when templates do not come from disk.
    pub fn from_images(images: impl IntoIterator<Item = (String, GrayImage)>) -> Self {
        Self {
            root: None,
            templates: images
                .into_iter()
                .map(|(name, img)| (name, Arc::new(img)))
                .collect(),
            masks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mask(self, name: impl Into<String>, mask: GrayImage) -> Self {
        self.lock_masks()
            .insert(name.into(), Some(Arc::new(binarize(&mask))));
        self
    }

    fn lock_masks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<Arc<GrayImage>>>> {
        match self.masks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<GrayImage>> {
        self.templates.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<GrayImage>)> {
        self.templates.iter().map(|(name, img)| (name.as_str(), img))
    }

    /// Resolve a mask by file name, binarising and caching it on first use.
    /// Missing or unreadable masks resolve to `None` (unmasked comparison).
    pub fn mask(&self, name: &str) -> Option<Arc<GrayImage>> {
        if name.is_empty() {
            return None;
        }
        if let Some(cached) = self.lock_masks().get(name) {
            return cached.clone();
        }

        let resolved = self.read_mask(name);
        self.lock_masks().insert(name.to_string(), resolved.clone());
        resolved
    }

    fn read_mask(&self, name: &str) -> Option<Arc<GrayImage>> {
        let root = self.root.as_deref()?;
        let Some(path) = find_file(root, name) else {
            warn!("[Template] mask not found: {name}");
            return None;
        };
        match image::open(&path) {
            Ok(img) => Some(Arc::new(binarize(&img.to_luma8()))),
            Err(err) => {
                warn!("[Template] failed to read mask {name}: {err}");
                None
            }
        }
    }
}
