use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use image::GrayImage;
use log::{info, warn};
use serde::Serialize;

use super::library::TemplateLibrary;
use super::manifest::{resolve_threshold, DetectionContext, Manifest, TemplateSpec, FALLBACK_THRESHOLD};
use super::scoring::{exhaustive_score, is_approximate, match_score};

/// Anomaly rule: the template is "present" when similarity falls at or below the ceiling.
pub fn inverted_hit(score: f32, threshold: f32) -> bool {
    score <= threshold
}

/// Error-screen rule: plain similarity.
pub fn normal_hit(score: f32, threshold: f32) -> bool {
    score >= threshold
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateScore {
    pub template: String,
    pub score: f32,
    pub threshold: f32,
    pub hit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionReport {
    pub tag: String,
    pub templates: Vec<TemplateScore>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub hit: Option<String>,
    pub report: Option<DetectionReport>,
}

impl Detection {
    fn miss(report: Option<DetectionReport>) -> Self {
        Self { hit: None, report }
    }
}

/// Decode a captured frame into luma. The format is sniffed from the content, not the
/// file extension.
pub fn load_frame(path: &Path) -> Result<GrayImage> {
    let img = image::ImageReader::open(path)
        .with_context(|| format!("Failed to open frame {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Failed to sniff frame format {}", path.display()))?
        .decode()
        .with_context(|| format!("Failed to decode frame {}", path.display()))?;
    Ok(img.to_luma8())
}

pub struct DetectionEngine {
    library: TemplateLibrary,
    manifest: Option<Manifest>,
    evaluations: AtomicU64,
}

impl DetectionEngine {
    pub fn new(library: TemplateLibrary, manifest: Option<Manifest>) -> Self {
        Self {
            library,
            manifest,
            evaluations: AtomicU64::new(0),
        }
    }

    /// Index `template_root`; a missing manifest switches to legacy (unrouted) mode.
    pub fn load(template_root: &Path, manifest_path: Option<&Path>) -> Result<Self> {
        let library = TemplateLibrary::load(template_root)?;
        let manifest = match manifest_path {
            Some(path) if path.is_file() => {
                let manifest = Manifest::load(path)?;
                info!(
                    "[Template] manifest loaded: {} types, default threshold {:.2}",
                    manifest.types.len(),
                    manifest.default_threshold
                );
                Some(manifest)
            }
            Some(path) => {
                warn!("[Template] manifest not found at {}, using legacy mode", path.display());
                None
            }
            None => None,
        };
        Ok(Self::new(library, manifest))
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest.is_some()
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    /// Number of template comparisons performed so far.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// With a `ceiling`, a coarse score that would pass the low-score rule is rescored over
    /// every placement before it is trusted.
    fn score(
        &self,
        frame: &GrayImage,
        template: &GrayImage,
        mask: Option<&GrayImage>,
        ceiling: Option<f32>,
    ) -> Option<f32> {
        let score = match_score(frame, template, mask)?;
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        match ceiling {
            Some(ceiling) if inverted_hit(score, ceiling) && is_approximate(frame, template) => {
                let exact = exhaustive_score(frame, template, mask).unwrap_or(score);
                if exact > score {
                    info!("[Template] coarse score {score:.3} rescored to {exact:.3}");
                }
                Some(exact)
            }
            _ => Some(score),
        }
    }

    fn frame_is_empty(frame: &GrayImage, tag: Option<&str>) -> bool {
        if frame.width() == 0 || frame.height() == 0 {
            warn!("[Template][{}] empty frame, skipping detection", tag.unwrap_or("ALL"));
            return true;
        }
        false
    }

    /// Score one spec; `None` when its template is missing or larger than the frame.
    fn score_spec(
        &self,
        frame: &GrayImage,
        spec: &TemplateSpec,
        use_mask: bool,
        ceiling: Option<f32>,
    ) -> Option<f32> {
        if spec.file.is_empty() {
            return None;
        }
        let Some(template) = self.library.get(&spec.file) else {
            warn!("[Template] template image not found: {}", spec.file);
            return None;
        };
        if frame.width() < template.width() || frame.height() < template.height() {
            info!("[Template] skipped (frame smaller than template): {}", spec.file);
            return None;
        }

        let mask = if use_mask {
            spec.mask.as_deref().and_then(|name| self.library.mask(name))
        } else {
            None
        };
        if let Some(m) = mask.as_deref() {
            if m.dimensions() != template.dimensions() {
                warn!(
                    "[Template] mask size {:?} differs from {} {:?}, comparing unmasked",
                    m.dimensions(),
                    spec.file,
                    template.dimensions()
                );
            }
        }
        self.score(frame, &template, mask.as_deref(), ceiling)
    }

    /// Best `(name, score)` over the first `limit` library templates.
    fn best_of_library(
        &self,
        frame: &GrayImage,
        limit: usize,
        report: &mut Option<DetectionReport>,
        threshold: f32,
        inverted: bool,
    ) -> Option<(String, f32)> {
        let rule: fn(f32, f32) -> bool = if inverted { inverted_hit } else { normal_hit };
        let ceiling = inverted.then_some(threshold);
        let mut best: Option<(String, f32)> = None;
        for (name, template) in self.library.iter().take(limit) {
            let Some(score) = self.score(frame, template, None, ceiling) else {
                continue;
            };
            if let Some(r) = report.as_mut() {
                r.templates.push(TemplateScore {
                    template: name.to_string(),
                    score,
                    threshold,
                    hit: rule(score, threshold),
                });
            }
            if best.as_ref().map_or(true, |(_, b)| score > *b) {
                best = Some((name.to_string(), score));
            }
        }
        best
    }

    /// Primary anomaly detection: first routed spec whose score is at or below its threshold.
    pub fn detect_by_manifest(
        &self,
        frame: &GrayImage,
        tag: Option<&str>,
        default_threshold: Option<f32>,
        ctx: &DetectionContext,
        want_report: bool,
    ) -> Detection {
        let mut report = want_report.then(|| DetectionReport {
            tag: tag.unwrap_or("").to_string(),
            templates: Vec::new(),
        });
        if Self::frame_is_empty(frame, tag) {
            return Detection::miss(report);
        }

        let Some(manifest) = self.manifest.as_ref() else {
            let threshold = default_threshold.unwrap_or(FALLBACK_THRESHOLD);
            let hit = self
                .best_of_library(frame, usize::MAX, &mut report, threshold, true)
                .filter(|(_, score)| inverted_hit(*score, threshold))
                .map(|(name, _)| name);
            return Detection { hit, report };
        };

        let Some(tag) = tag.filter(|t| !t.is_empty()) else {
            return Detection::miss(report);
        };
        let Some(type_spec) = manifest.routed(tag) else {
            info!("[Template] type {tag} not routed by manifest");
            return Detection::miss(report);
        };
        let specs: Vec<&TemplateSpec> = type_spec.templates.iter().filter(|s| s.applies_to(ctx)).collect();
        if specs.is_empty() {
            info!(
                "[Template] type {tag}: no templates apply (source='{}', title='{}')",
                ctx.source, ctx.title
            );
            return Detection::miss(report);
        }

        let effective_default = manifest.effective_default(default_threshold);
        let mut hit = None;
        for spec in specs {
            let threshold = resolve_threshold(spec, type_spec, effective_default);
            let Some(score) = self.score_spec(frame, spec, true, Some(threshold)) else {
                continue;
            };
            let is_hit = inverted_hit(score, threshold);
            info!(
                "[Template][{tag}][{}] {} -> score={score:.5} thr={threshold:.2} hit={is_hit}",
                ctx.title, spec.file
            );
            if let Some(r) = report.as_mut() {
                r.templates.push(TemplateScore {
                    template: spec.file.clone(),
                    score,
                    threshold,
                    hit: is_hit,
                });
            }
            if is_hit && hit.is_none() {
                warn!(
                    "[Template][{tag}][{}] low-score trigger: {} ({score:.3} <= {threshold:.2})",
                    ctx.title, spec.file
                );
                hit = Some(spec.file.clone());
                if report.is_none() {
                    break;
                }
            }
        }
        Detection { hit, report }
    }

    /// Bounded variant for the fastest cadence: at most `max_templates` specs, no `when`
    /// filtering, no masks.
    pub fn detect_by_manifest_fast(
        &self,
        frame: &GrayImage,
        tag: Option<&str>,
        default_threshold: Option<f32>,
        max_templates: usize,
    ) -> Option<String> {
        if Self::frame_is_empty(frame, tag) {
            return None;
        }

        let Some(manifest) = self.manifest.as_ref() else {
            let threshold = default_threshold.unwrap_or(FALLBACK_THRESHOLD);
            return self
                .best_of_library(frame, max_templates, &mut None, threshold, true)
                .filter(|(_, score)| inverted_hit(*score, threshold))
                .map(|(name, _)| name);
        };

        let type_spec = manifest.routed(tag.unwrap_or(""))?;
        let effective_default = manifest.effective_default(default_threshold);
        type_spec.templates.iter().take(max_templates).find_map(|spec| {
            let threshold = resolve_threshold(spec, type_spec, effective_default);
            let score = self.score_spec(frame, spec, false, Some(threshold))?;
            inverted_hit(score, threshold).then(|| spec.file.clone())
        })
    }

    /// Error-screen detection: best routed spec whose score reaches its threshold.
    pub fn detect_high_score(
        &self,
        frame: &GrayImage,
        tag: Option<&str>,
        threshold: Option<f32>,
        ctx: &DetectionContext,
    ) -> Detection {
        let mut report = Some(DetectionReport {
            tag: tag.unwrap_or("").to_string(),
            templates: Vec::new(),
        });
        if Self::frame_is_empty(frame, tag) {
            return Detection::miss(report);
        }

        let Some(manifest) = self.manifest.as_ref() else {
            let threshold = threshold.unwrap_or(FALLBACK_THRESHOLD);
            let hit = self
                .best_of_library(frame, usize::MAX, &mut report, threshold, false)
                .filter(|(_, score)| normal_hit(*score, threshold))
                .map(|(name, _)| name);
            return Detection { hit, report };
        };

        let Some(type_spec) = tag.filter(|t| !t.is_empty()).and_then(|t| manifest.routed(t)) else {
            return Detection::miss(report);
        };
        let effective_default = manifest.effective_default(threshold);
        let mut best: Option<(String, f32)> = None;
        for spec in type_spec.templates.iter().filter(|s| s.applies_to(ctx)) {
            let Some(score) = self.score_spec(frame, spec, true, None) else {
                continue;
            };
            let thr = resolve_threshold(spec, type_spec, effective_default);
            let is_hit = normal_hit(score, thr);
            if let Some(r) = report.as_mut() {
                r.templates.push(TemplateScore {
                    template: spec.file.clone(),
                    score,
                    threshold: thr,
                    hit: is_hit,
                });
            }
            if is_hit && best.as_ref().map_or(true, |(_, b)| score > *b) {
                best = Some((spec.file.clone(), score));
            }
        }
        if let Some((name, score)) = best.as_ref() {
            warn!("[Template][{}] error screen matched: {name} (score={score:.3})", tag.unwrap_or(""));
        }
        Detection {
            hit: best.map(|(name, _)| name),
            report,
        }
    }

    /// Unrouted scan of every template; best score must reach `threshold`.
    pub fn detect_global(&self, frame: &GrayImage, threshold: f32) -> Option<String> {
        if Self::frame_is_empty(frame, None) {
            return None;
        }
        self.best_of_library(frame, usize::MAX, &mut None, threshold, false)
            .filter(|(_, score)| normal_hit(*score, threshold))
            .map(|(name, _)| name)
    }
}
