//! YuNet face detector as a [`LandmarkProvider`].
//!
//! YuNet is anchor-free. For each stride (8, 16, 32) the 640x640 model emits
//! four tensors over its H*W grid:
//! - cls: [1, H*W, 1] - classification scores
//! - obj: [1, H*W, 1] - objectness scores
//! - bbox: [1, H*W, 4] - (dx, dy, log w, log h) in stride units
//! - kps: [1, H*W, 10] - 5 landmark offsets in stride units
//!
//! Output order: cls_8, cls_16, cls_32, obj_8, ..., bbox_8, ..., kps_8, ...
//!
//! Decoding:
//! cx = (grid_x + dx) * stride
//! cy = (grid_y + dy) * stride
//! w = exp(log w) * stride
//! score = sqrt(cls * obj)

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};

use crate::error::VisionError;
use crate::landmarks::{FaceDetection, LandmarkProvider, LandmarkSet};

const STRIDES: [usize; 3] = [8, 16, 32];
pub const INPUT_SIZE: u32 = 640;

pub const DEFAULT_CANDIDATE_THRESHOLD: f32 = 0.3;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

/// Detection in letterboxed input pixels.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // x1,y1,...,x5,y5
}

/// How a photo was fitted into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    /// Size of the photo once scaled, never below one pixel.
    pub resized_width: u32,
    pub resized_height: u32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        let max_dim = width.max(height).max(1);
        let scale = INPUT_SIZE as f32 / max_dim as f32;
        let resized_width = ((width as f32 * scale) as u32).clamp(1, INPUT_SIZE);
        let resized_height = ((height as f32 * scale) as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            resized_width,
            resized_height,
            offset_x: ((INPUT_SIZE - resized_width) / 2) as f32,
            offset_y: ((INPUT_SIZE - resized_height) / 2) as f32,
        }
    }

    /// Model input pixels back to photo pixels.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }

    pub fn unmap_detection(&self, raw: &RawDetection) -> FaceDetection {
        let (x, y) = self.unmap(raw.bbox[0], raw.bbox[1]);
        let mut flat = [0.0f32; 10];
        for k in 0..5 {
            let (lx, ly) = self.unmap(raw.landmarks[k * 2], raw.landmarks[k * 2 + 1]);
            flat[k * 2] = lx;
            flat[k * 2 + 1] = ly;
        }
        FaceDetection {
            bbox: [x, y, raw.bbox[2] / self.scale, raw.bbox[3] / self.scale],
            score: raw.score,
            landmarks: LandmarkSet::from_5_points(&flat),
        }
    }
}

/// Letterbox `img` into a 640x640 BGR NCHW tensor.
pub fn prepare_input(img: &DynamicImage) -> Result<(Array4<f32>, Letterbox)> {
    let (orig_width, orig_height) = img.dimensions();
    let letterbox = Letterbox::for_dimensions(orig_width, orig_height);
    let resized = img.resize_exact(
        letterbox.resized_width,
        letterbox.resized_height,
        image::imageops::FilterType::Triangle,
    );
    let mut canvas = DynamicImage::new_rgb8(INPUT_SIZE, INPUT_SIZE);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );
    let canvas = canvas.to_rgb8();

    let pixel_count = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * pixel_count];
    let (b_channel, rest) = input_data.split_at_mut(pixel_count);
    let (g_channel, r_channel) = rest.split_at_mut(pixel_count);

    for (i, px) in canvas.as_raw().chunks_exact(3).enumerate() {
        r_channel[i] = px[0] as f32;
        g_channel[i] = px[1] as f32;
        b_channel[i] = px[2] as f32;
    }

    let input = Array4::from_shape_vec(
        (1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize),
        input_data,
    )?;
    Ok((input, letterbox))
}

pub struct YuNet {
    session: Mutex<Session>,
    candidate_threshold: f32,
    nms_threshold: f32,
}

impl YuNet {
    pub fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            candidate_threshold: DEFAULT_CANDIDATE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(crate::model::detector_session(path)?))
    }

    /// `candidate` drops weak grid cells before NMS; `nms` is the IoU cutoff.
    pub fn with_thresholds(mut self, candidate: f32, nms: f32) -> Self {
        self.candidate_threshold = candidate;
        self.nms_threshold = nms;
        self
    }

    /// All faces above the candidate threshold, best first.
    pub fn detect_all(&self, img: &DynamicImage) -> Result<Vec<FaceDetection>> {
        let (input, letterbox) = prepare_input(img)?;
        let output_data = self.infer(input)?;

        let output_refs: Vec<(&[i64], &[f32])> = output_data
            .iter()
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();
        let (scores, bboxes, landmarks) = parse_outputs(&output_refs, INPUT_SIZE as usize)?;
        let raw = decode_detections(
            &scores,
            &bboxes,
            &landmarks,
            self.candidate_threshold,
            INPUT_SIZE as usize,
        )?;
        let kept = nms(raw, self.nms_threshold);
        log::trace!("yunet kept {} detection(s)", kept.len());

        Ok(kept.iter().map(|d| letterbox.unmap_detection(d)).collect())
    }

    fn infer(&self, input: Array4<f32>) -> Result<Vec<(Vec<i64>, Vec<f32>)>> {
        let input_tensor = Value::from_array(input)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("detector session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .context("running face detector")?;

        let mut output_data = Vec::with_capacity(12);
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            output_data.push((shape.iter().copied().collect(), data.to_vec()));
        }
        Ok(output_data)
    }
}

impl LandmarkProvider for YuNet {
    fn detect_face(&self, image: &DynamicImage) -> crate::error::Result<Option<FaceDetection>> {
        let detections = self.detect_all(image).map_err(VisionError::provider)?;
        // nms() sorts by score, so the first one is the best face.
        Ok(detections.into_iter().next())
    }
}

/// Split the 12 raw outputs into per-stride (score, bbox, landmark) arrays.
/// Scores are already fused as `sqrt(cls * obj)`.
pub fn parse_outputs(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
) -> Result<(Vec<Array2<f32>>, Vec<Array2<f32>>, Vec<Array2<f32>>)> {
    if outputs.len() < 12 {
        anyhow::bail!("expected 12 detector outputs, got {}", outputs.len());
    }

    let counts: Vec<usize> = STRIDES
        .iter()
        .map(|s| (input_size / s) * (input_size / s))
        .collect();

    let tensor = |slot: usize, count: usize, width: usize, name: &str| -> Result<Array2<f32>> {
        let (shape, data) = outputs[slot];
        if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != count || shape[2] as usize != width
        {
            anyhow::bail!(
                "unexpected {} shape at output {}: {:?}, expected [1, {}, {}]",
                name,
                slot,
                shape,
                count,
                width
            );
        }
        Ok(Array2::from_shape_vec((count, width), data.to_vec())?)
    };

    let mut scores = Vec::with_capacity(3);
    let mut bboxes = Vec::with_capacity(3);
    let mut landmarks = Vec::with_capacity(3);
    for (i, &count) in counts.iter().enumerate() {
        let cls = tensor(i, count, 1, "cls")?;
        let obj = tensor(i + 3, count, 1, "obj")?;
        let fused = ndarray::Zip::from(&cls)
            .and(&obj)
            .map_collect(|c, o| (c.clamp(0.0, 1.0) * o.clamp(0.0, 1.0)).sqrt());
        scores.push(fused);
        bboxes.push(tensor(i + 6, count, 4, "bbox")?);
        landmarks.push(tensor(i + 9, count, 10, "kps")?);
    }

    Ok((scores, bboxes, landmarks))
}

/// Grid decoding into input-pixel detections.
pub fn decode_detections(
    scores: &[Array2<f32>],
    bboxes: &[Array2<f32>],
    landmarks: &[Array2<f32>],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let (Some(score_map), Some(bbox_map), Some(kps_map)) = (
            scores.get(scale_idx),
            bboxes.get(scale_idx),
            landmarks.get(scale_idx),
        ) else {
            anyhow::bail!("missing outputs for stride {}", stride);
        };

        let feature_size = input_size / stride;
        if score_map.shape()[0] != feature_size * feature_size {
            anyhow::bail!(
                "expected {} cells for stride {}, got {}",
                feature_size * feature_size,
                stride,
                score_map.shape()[0]
            );
        }
        let stride_f = stride as f32;

        for row in 0..feature_size {
            for col in 0..feature_size {
                let idx = row * feature_size + col;
                let score = score_map[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + bbox_map[[idx, 0]]) * stride_f;
                let cy = (row as f32 + bbox_map[[idx, 1]]) * stride_f;
                let w = bbox_map[[idx, 2]].exp() * stride_f;
                let h = bbox_map[[idx, 3]].exp() * stride_f;

                let mut lms = [0.0f32; 10];
                for k in 0..5 {
                    lms[k * 2] = (col as f32 + kps_map[[idx, k * 2]]) * stride_f;
                    lms[k * 2 + 1] = (row as f32 + kps_map[[idx, k * 2 + 1]]) * stride_f;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks: lms,
                });
            }
        }
    }

    Ok(detections)
}

/// Non-maximum suppression. Output is sorted by descending score.
pub fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(&k.bbox, &det.bbox) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let area_a = a[2] * a[3];
    let area_b = b[2] * b[3];
    inter / (area_a + area_b - inter)
}
