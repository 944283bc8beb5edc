use image::GrayImage;

/// Multiply-adds allowed for an exhaustive search before switching to coarse-to-fine.
const EXHAUSTIVE_BUDGET: u64 = 25_000_000;
/// Coarse placements carried into the full-resolution refinement.
const COARSE_CANDIDATES: usize = 8;
/// Smallest template side kept when downsampling.
const MIN_COARSE_SIDE: u32 = 6;
const EPSILON: f64 = 1e-9;

/// Template prepared for correlation: zero-mean values of the participating pixels.
struct Prepared {
    width: u32,
    height: u32,
    /// `(dx, dy, t - mean_t)` for every pixel that takes part (all pixels, or mask pixels).
    pixels: Vec<(u32, u32, f64)>,
    norm: f64,
    masked: bool,
}

impl Prepared {
    fn new(template: &GrayImage, mask: Option<&GrayImage>) -> Self {
        let (width, height) = template.dimensions();
        let mask = mask.filter(|m| m.dimensions() == (width, height));
        let mut raw = Vec::with_capacity((width * height) as usize);
        for (x, y, px) in template.enumerate_pixels() {
            let included = mask.map_or(true, |m| m.get_pixel(x, y).0[0] > 127);
            if included {
                raw.push((x, y, px.0[0] as f64));
            }
        }

        let count = raw.len().max(1) as f64;
        let mean = raw.iter().map(|(_, _, v)| v).sum::<f64>() / count;
        let pixels: Vec<(u32, u32, f64)> =
            raw.into_iter().map(|(x, y, v)| (x, y, v - mean)).collect();
        let norm = pixels.iter().map(|(_, _, v)| v * v).sum::<f64>().sqrt();

        Self {
            width,
            height,
            pixels,
            norm,
            masked: mask.is_some(),
        }
    }

    fn is_degenerate(&self) -> bool {
        self.pixels.is_empty() || self.norm < EPSILON
    }
}

/// Summed-area tables of pixel values and squared values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(frame: &GrayImage) -> Self {
        let (w, h) = frame.dimensions();
        let stride = w as usize + 1;
        let mut sum = vec![0.0; stride * (h as usize + 1)];
        let mut sum_sq = vec![0.0; stride * (h as usize + 1)];
        let raw = frame.as_raw();
        for y in 0..h as usize {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w as usize {
                let v = raw[y * w as usize + x] as f64;
                row += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let s = |t: &[f64]| {
            t[y1 * self.stride + x1] - t[y0 * self.stride + x1] - t[y1 * self.stride + x0]
                + t[y0 * self.stride + x0]
        };
        (s(&self.sum), s(&self.sum_sq))
    }
}

/// Zero-mean normalized cross-correlation at one placement, in [-1, 1].
fn score_at(frame: &GrayImage, template: &Prepared, integral: Option<&Integral>, x: u32, y: u32) -> f64 {
    let raw = frame.as_raw();
    let stride = frame.width() as usize;
    let n = template.pixels.len() as f64;

    let mut num = 0.0;
    let (sum, sum_sq) = match integral {
        Some(table) if !template.masked => {
            for &(dx, dy, t) in &template.pixels {
                num += t * raw[(y + dy) as usize * stride + (x + dx) as usize] as f64;
            }
            table.window(x, y, template.width, template.height)
        }
        _ => {
            let (mut s, mut q) = (0.0, 0.0);
            for &(dx, dy, t) in &template.pixels {
                let v = raw[(y + dy) as usize * stride + (x + dx) as usize] as f64;
                num += t * v;
                s += v;
                q += v * v;
            }
            (s, q)
        }
    };

    let variance = sum_sq - sum * sum / n;
    if variance <= EPSILON {
        return 0.0;
    }
    (num / (template.norm * variance.sqrt())).clamp(-1.0, 1.0)
}

/// Every placement as `(score, x, y)`.
fn score_map(frame: &GrayImage, template: &Prepared) -> Vec<(f64, u32, u32)> {
    let integral = (!template.masked).then(|| Integral::new(frame));
    let max_x = frame.width() - template.width;
    let max_y = frame.height() - template.height;
    let mut scores = Vec::with_capacity(((max_x + 1) * (max_y + 1)) as usize);
    for y in 0..=max_y {
        for x in 0..=max_x {
            scores.push((score_at(frame, template, integral.as_ref(), x, y), x, y));
        }
    }
    scores
}

fn exhaustive_best(frame: &GrayImage, template: &Prepared) -> f64 {
    score_map(frame, template)
        .into_iter()
        .map(|(score, _, _)| score)
        .fold(f64::NEG_INFINITY, f64::max)
}

fn search_cost(frame: &GrayImage, template: &GrayImage) -> u64 {
    let placements = (frame.width() - template.width() + 1) as u64
        * (frame.height() - template.height() + 1) as u64;
    placements * (template.width() as u64 * template.height() as u64)
}

/// Box-average downsample by an integer factor.
fn downsample(image: &GrayImage, factor: u32) -> GrayImage {
    let w = (image.width() / factor).max(1);
    let h = (image.height() / factor).max(1);
    let area = factor * factor;
    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0u32;
        for dy in 0..factor {
            for dx in 0..factor {
                acc += image.get_pixel(x * factor + dx, y * factor + dy).0[0] as u32;
            }
        }
        image::Luma([(acc / area) as u8])
    })
}

fn coarse_factor(frame: &GrayImage, template: &GrayImage) -> u32 {
    let mut factor = 1;
    loop {
        let next = factor * 2;
        if template.width() / next < MIN_COARSE_SIDE || template.height() / next < MIN_COARSE_SIDE {
            return factor;
        }
        let cost = search_cost(frame, template) / (next as u64).pow(4);
        factor = next;
        if cost <= EXHAUSTIVE_BUDGET {
            return factor;
        }
    }
}

fn comparable(frame: &GrayImage, template: &GrayImage) -> bool {
    frame.width() > 0
        && frame.height() > 0
        && template.width() > 0
        && template.height() > 0
        && frame.width() >= template.width()
        && frame.height() >= template.height()
}

/// Whether `match_score` searches this pair coarse-to-fine. Such scores are a lower bound
/// of the exhaustive one.
pub fn is_approximate(frame: &GrayImage, template: &GrayImage) -> bool {
    comparable(frame, template) && search_cost(frame, template) > EXHAUSTIVE_BUDGET
}

/// Best TM_CCOEFF_NORMED score of `template` over `frame`, optionally restricted to the
/// pixels where `mask` is set. `None` when the frame is smaller than the template in
/// either dimension or either image is empty.
pub fn match_score(frame: &GrayImage, template: &GrayImage, mask: Option<&GrayImage>) -> Option<f32> {
    if !comparable(frame, template) {
        return None;
    }

    let mask = mask.filter(|m| m.dimensions() == template.dimensions());
    let prepared = Prepared::new(template, mask);
    if prepared.is_degenerate() {
        return Some(0.0);
    }

    let best = if is_approximate(frame, template) {
        let factor = coarse_factor(frame, template);
        refine(frame, template, mask, &prepared, factor).unwrap_or_else(|| exhaustive_best(frame, &prepared))
    } else {
        exhaustive_best(frame, &prepared)
    };

    Some(best as f32)
}

/// `match_score` over every placement, whatever the cost.
pub fn exhaustive_score(frame: &GrayImage, template: &GrayImage, mask: Option<&GrayImage>) -> Option<f32> {
    if !comparable(frame, template) {
        return None;
    }
    let mask = mask.filter(|m| m.dimensions() == template.dimensions());
    let prepared = Prepared::new(template, mask);
    if prepared.is_degenerate() {
        return Some(0.0);
    }
    Some(exhaustive_best(frame, &prepared) as f32)
}

fn refine(
    frame: &GrayImage,
    template: &GrayImage,
    mask: Option<&GrayImage>,
    prepared: &Prepared,
    factor: u32,
) -> Option<f64> {
    if factor < 2 {
        return None;
    }
    let small_frame = downsample(frame, factor);
    let small_template = downsample(template, factor);
    let small_mask = mask.map(|m| downsample(m, factor));
    let coarse = Prepared::new(&small_template, small_mask.as_ref());
    // fine detail can average out to a flat coarse template
    if coarse.is_degenerate() || small_frame.width() < coarse.width || small_frame.height() < coarse.height {
        return None;
    }

    let mut candidates = score_map(&small_frame, &coarse);
    candidates.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
    candidates.truncate(COARSE_CANDIDATES);

    let integral = (!prepared.masked).then(|| Integral::new(frame));
    let max_x = frame.width() - prepared.width;
    let max_y = frame.height() - prepared.height;
    let mut best = f64::NEG_INFINITY;
    for (_, cx, cy) in candidates {
        let x0 = (cx * factor).saturating_sub(factor);
        let y0 = (cy * factor).saturating_sub(factor);
        let x1 = (cx * factor + factor).min(max_x);
        let y1 = (cy * factor + factor).min(max_y);
        for y in y0..=y1 {
            for x in x0..=x1 {
                best = best.max(score_at(frame, prepared, integral.as_ref(), x, y));
            }
        }
    }
    Some(best)
}
