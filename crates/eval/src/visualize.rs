//! Attention-map and image-grid visualization.
//!
//! Artifacts are PNG grids written under the log directory plus one JSONL
//! record per artifact in `events.jsonl`, consumable by external tooling.

use anyhow::Context;
use image::{Rgb, RgbImage};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const GRID_NROW: usize = 8;
pub const GRID_PADDING: u32 = 2;

/// Appends visualization events to `<dir>/events.jsonl` and saves the
/// referenced PNGs next to it. Tags keep their slashed form in the log;
/// file names flatten `/` to `_`.
pub struct EventWriter {
    dir: PathBuf,
    events: fs::File,
}

impl EventWriter {
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let events_path = dir.join("events.jsonl");
        let events = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .with_context(|| format!("failed to open event log {}", events_path.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            events,
        })
    }

    pub fn log_image(&mut self, tag: &str, step: usize, img: &RgbImage) -> anyhow::Result<PathBuf> {
        let name = format!("{}_{:05}.png", tag.replace('/', "_"), step);
        let path = self.dir.join(&name);
        img.save(&path)
            .with_context(|| format!("failed to save visualization {}", path.display()))?;
        // Wall-clock milliseconds since the Unix epoch.
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let record = serde_json::json!({
            "tag": tag,
            "step": step,
            "path": name,
            "timestamp_ms": timestamp_ms,
        });
        writeln!(self.events, "{}", record).context("failed to append event record")?;
        Ok(path)
    }
}

/// Undo the evaluation normalization and min-max scale each sample
/// independently (torchvision `make_grid(normalize=True, scale_each=True)`
/// semantics), producing displayable RGB images.
pub fn batch_to_display_images(
    data: &[f32],
    count: usize,
    height: usize,
    width: usize,
    mean: [f32; 3],
    std: [f32; 3],
) -> Vec<RgbImage> {
    let plane = height * width;
    let sample_len = 3 * plane;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let sample = &data[i * sample_len..(i + 1) * sample_len];
        let mut denorm = vec![0.0f32; sample_len];
        for c in 0..3 {
            for p in 0..plane {
                denorm[c * plane + p] = sample[c * plane + p] * std[c] + mean[c];
            }
        }
        let (lo, hi) = min_max(&denorm);
        let range = (hi - lo).max(1e-12);
        let mut img = RgbImage::new(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                let p = y * width + x;
                let px = |c: usize| (((denorm[c * plane + p] - lo) / range) * 255.0) as u8;
                img.put_pixel(x as u32, y as u32, Rgb([px(0), px(1), px(2)]));
            }
        }
        out.push(img);
    }
    out
}

/// Compose images into a grid, `nrow` per row, black padding between cells.
pub fn make_grid(images: &[RgbImage], nrow: usize) -> RgbImage {
    assert!(!images.is_empty(), "grid needs at least one image");
    let (w, h) = images[0].dimensions();
    let nrow = nrow.max(1);
    let cols = images.len().min(nrow) as u32;
    let rows = images.len().div_ceil(nrow) as u32;
    let mut canvas = RgbImage::new(
        cols * w + (cols + 1) * GRID_PADDING,
        rows * h + (rows + 1) * GRID_PADDING,
    );
    for (i, img) in images.iter().enumerate() {
        let col = (i % nrow) as u32;
        let row = (i / nrow) as u32;
        let x0 = GRID_PADDING + col * (w + GRID_PADDING);
        let y0 = GRID_PADDING + row * (h + GRID_PADDING);
        image::imageops::replace(&mut canvas, img, x0 as i64, y0 as i64);
    }
    canvas
}

/// Render one batch of raw compatibility maps as a heat-overlay grid.
///
/// Each map is normalized per the selected mode (spatial softmax plus
/// per-map min-max, or independent per-pixel sigmoid), bilinearly upsampled
/// by `up_factor`, stretched to its display cell if needed, colorized, and
/// blended 0.5/0.5 over the corresponding display image.
pub fn render_attention_grid(
    maps: &[Vec<f32>],
    map_h: usize,
    map_w: usize,
    up_factor: u32,
    normalize_attn: bool,
    cells: &[RgbImage],
    nrow: usize,
) -> RgbImage {
    assert_eq!(maps.len(), cells.len(), "one attention map per display cell");
    let mut overlays = Vec::with_capacity(maps.len());
    for (map, cell) in maps.iter().zip(cells) {
        let weights = if normalize_attn {
            let mut w = spatial_softmax(map);
            let (lo, hi) = min_max(&w);
            let range = (hi - lo).max(1e-12);
            for v in w.iter_mut() {
                *v = (*v - lo) / range;
            }
            w
        } else {
            map.iter().map(|v| 1.0 / (1.0 + (-v).exp())).collect()
        };

        let up_h = map_h * up_factor as usize;
        let up_w = map_w * up_factor as usize;
        let upsampled = bilinear_resize(&weights, map_h, map_w, up_h, up_w);
        let (cw, ch) = cell.dimensions();
        let heat = if (up_w as u32, up_h as u32) == (cw, ch) {
            upsampled
        } else {
            bilinear_resize(&upsampled, up_h, up_w, ch as usize, cw as usize)
        };

        let mut overlay = RgbImage::new(cw, ch);
        for y in 0..ch {
            for x in 0..cw {
                let v = heat[(y * cw + x) as usize];
                let hc = heat_color(v);
                let base = cell.get_pixel(x, y);
                let blend = |a: u8, b: u8| ((a as u16 + b as u16) / 2) as u8;
                overlay.put_pixel(
                    x,
                    y,
                    Rgb([
                        blend(base[0], hc[0]),
                        blend(base[1], hc[1]),
                        blend(base[2], hc[2]),
                    ]),
                );
            }
        }
        overlays.push(overlay);
    }
    make_grid(&overlays, nrow)
}

fn min_max(values: &[f32]) -> (f32, f32) {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &v in values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo, hi)
}

fn spatial_softmax(map: &[f32]) -> Vec<f32> {
    let (_, hi) = min_max(map);
    let exps: Vec<f32> = map.iter().map(|v| (v - hi).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum.max(1e-12)).collect()
}

fn bilinear_resize(src: &[f32], src_h: usize, src_w: usize, dst_h: usize, dst_w: usize) -> Vec<f32> {
    let mut dst = vec![0.0f32; dst_h * dst_w];
    for y in 0..dst_h {
        let sy = (y as f32 + 0.5) * src_h as f32 / dst_h as f32 - 0.5;
        let y0 = sy.floor().clamp(0.0, (src_h - 1) as f32) as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let fy = (sy - y0 as f32).clamp(0.0, 1.0);
        for x in 0..dst_w {
            let sx = (x as f32 + 0.5) * src_w as f32 / dst_w as f32 - 0.5;
            let x0 = sx.floor().clamp(0.0, (src_w - 1) as f32) as usize;
            let x1 = (x0 + 1).min(src_w - 1);
            let fx = (sx - x0 as f32).clamp(0.0, 1.0);
            let top = src[y0 * src_w + x0] * (1.0 - fx) + src[y0 * src_w + x1] * fx;
            let bottom = src[y1 * src_w + x0] * (1.0 - fx) + src[y1 * src_w + x1] * fx;
            dst[y * dst_w + x] = top * (1.0 - fy) + bottom * fy;
        }
    }
    dst
}

/// Blue-to-red heat ramp over [0, 1].
fn heat_color(v: f32) -> Rgb<u8> {
    let v = v.clamp(0.0, 1.0);
    let r = (v * 2.0).min(1.0);
    let b = ((1.0 - v) * 2.0).min(1.0);
    let g = 1.0 - (2.0 * v - 1.0).abs();
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_geometry_matches_row_count() {
        let images = vec![RgbImage::new(4, 4); 5];
        let grid = make_grid(&images, 4);
        // 4 columns, 2 rows, 2px padding.
        assert_eq!(grid.dimensions(), (4 * 4 + 5 * 2, 2 * 4 + 3 * 2));
    }

    #[test]
    fn display_images_scale_each_sample_to_full_range() {
        // Two samples with different dynamic ranges both stretch to 0..255.
        let plane = 4;
        let mut data = vec![0.0f32; 2 * 3 * plane];
        for p in 0..3 * plane {
            data[p] = p as f32;
            data[3 * plane + p] = 100.0 + p as f32 * 0.001;
        }
        let images = batch_to_display_images(&data, 2, 2, 2, [0.0; 3], [1.0; 3]);
        for img in &images {
            let values: Vec<u8> = img.pixels().flat_map(|p| p.0).collect();
            assert_eq!(*values.iter().min().unwrap(), 0);
            assert!(*values.iter().max().unwrap() >= 254);
        }
    }

    #[test]
    fn attention_overlay_matches_cell_size() {
        let maps = vec![vec![0.0f32, 1.0, -1.0, 2.0]; 2];
        let cells = vec![RgbImage::new(16, 16); 2];
        for normalize in [true, false] {
            let grid = render_attention_grid(&maps, 2, 2, 8, normalize, &cells, 8);
            assert_eq!(grid.dimensions(), (2 * 16 + 3 * 2, 16 + 2 * 2));
        }
    }

    #[test]
    fn spatial_softmax_sums_to_one() {
        let sm = spatial_softmax(&[0.0, 1.0, 2.0, 3.0]);
        let sum: f32 = sm.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(sm[3] > sm[0]);
    }

    #[test]
    fn bilinear_resize_preserves_constant_fields() {
        let out = bilinear_resize(&[0.25; 4], 2, 2, 8, 8);
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn event_writer_appends_jsonl_records() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut writer = EventWriter::create(tmp.path())?;
        let img = RgbImage::new(2, 2);
        let path = writer.log_image("test/image", 0, &img)?;
        writer.log_image("test/attention_map_1", 0, &img)?;
        assert!(path.ends_with("test_image_00000.png"));
        assert!(path.exists());

        let log = std::fs::read_to_string(tmp.path().join("events.jsonl"))?;
        let records: Vec<serde_json::Value> = log
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["tag"], "test/image");
        assert_eq!(records[1]["tag"], "test/attention_map_1");
        assert_eq!(records[0]["step"], 0);
        // Timestamps are wall-clock Unix millis, not process-relative.
        let ts = records[0]["timestamp_ms"].as_u64().unwrap();
        assert!(ts > 1_500_000_000_000, "timestamp_ms={ts}");
        Ok(())
    }
}
