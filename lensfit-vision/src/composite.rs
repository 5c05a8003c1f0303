use std::io::Cursor;

use image::{
    imageops::FilterType, ColorType, DynamicImage, ImageBuffer, ImageFormat, Pixel, Rgba32FImage,
};

use crate::error::{Result, VisionError};
use crate::geometry::Point;
use crate::placement::{OverlaySpec, PlacementRect};

pub const DEFAULT_OPACITY: f32 = 0.85;

/// A decoded photo that remembers the format it arrived in.
#[derive(Debug, Clone)]
pub struct Photo {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl Photo {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes).map_err(VisionError::ImageDecode)?;
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(VisionError::ImageDecode)?;
        Ok(Self { image, format })
    }
}

/// Encoded raster bytes plus their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl EncodedImage {
    pub fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Self> {
        let mut data = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut data), format)
            .map_err(VisionError::Encoding)?;
        Ok(Self { data, format })
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        image::load_from_memory_with_format(&self.data, self.format)
            .map_err(VisionError::ImageDecode)
    }
}

/// Decode `photo`, draw the overlay and re-encode in the photo's format.
pub fn composite(
    photo: &[u8],
    overlay: &OverlaySpec,
    placement: &PlacementRect,
    opacity: f32,
) -> Result<EncodedImage> {
    let photo = Photo::decode(photo)?;
    composite_photo(&photo, overlay, placement, opacity)
}

pub fn composite_photo(
    photo: &Photo,
    overlay: &OverlaySpec,
    placement: &PlacementRect,
    opacity: f32,
) -> Result<EncodedImage> {
    let output = composite_image(&photo.image, overlay, placement, opacity);
    EncodedImage::encode(&output, photo.format)
}

/// Draw `overlay` onto a copy of `photo`.
///
/// The overlay is scaled to the placement size, rotated clockwise by
/// `rotation_degrees` about `pivot` and blended with `opacity` times its
/// own alpha. Blending happens at the photo's bit depth and the result has
/// the photo's color type, so pixels whose centers fall outside the rotated
/// rectangle come back bit-for-bit. Non-finite opacity draws nothing.
pub fn composite_image(
    photo: &DynamicImage,
    overlay: &OverlaySpec,
    placement: &PlacementRect,
    opacity: f32,
) -> DynamicImage {
    let opacity = if opacity.is_finite() {
        opacity.clamp(0.0, 1.0)
    } else {
        0.0
    };
    if photo.width() == 0 || photo.height() == 0 || opacity == 0.0 {
        return photo.clone();
    }

    let source = overlay_source(overlay, placement);
    let blended = match photo {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => {
            let mut surface = photo.to_rgba16();
            draw(&mut surface, &source, placement, opacity);
            DynamicImage::ImageRgba16(surface)
        }
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            let mut surface = photo.to_rgba32f();
            draw(&mut surface, &source, placement, opacity);
            DynamicImage::ImageRgba32F(surface)
        }
        _ => {
            let mut surface = photo.to_rgba8();
            draw(&mut surface, &source, placement, opacity);
            DynamicImage::ImageRgba8(surface)
        }
    };

    into_color(blended, photo.color())
}

/// Native artwork to sample from, prefiltered only when shrunk more than 2x.
fn overlay_source(overlay: &OverlaySpec, placement: &PlacementRect) -> Rgba32FImage {
    let (native_w, native_h) = (overlay.native_width, overlay.native_height);
    if placement.width * 2.0 < native_w as f32 || placement.height * 2.0 < native_h as f32 {
        let w = (placement.width.round().max(1.0) as u32).min(native_w);
        let h = (placement.height.round().max(1.0) as u32).min(native_h);
        overlay
            .image
            .resize_exact(w, h, FilterType::Triangle)
            .to_rgba32f()
    } else {
        overlay.image.to_rgba32f()
    }
}

/// Channel types the compositor blends in, normalized to `[0, 1]`.
trait Channel: Copy {
    fn to_unit(self) -> f32;
    fn from_unit(v: f32) -> Self;
}

impl Channel for u8 {
    fn to_unit(self) -> f32 {
        self as f32 / 255.0
    }

    fn from_unit(v: f32) -> Self {
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

impl Channel for u16 {
    fn to_unit(self) -> f32 {
        self as f32 / 65535.0
    }

    fn from_unit(v: f32) -> Self {
        (v * 65535.0).round().clamp(0.0, 65535.0) as u16
    }
}

impl Channel for f32 {
    fn to_unit(self) -> f32 {
        self
    }

    fn from_unit(v: f32) -> Self {
        v
    }
}

/// Blend `source` into an RGBA `surface` of any channel depth.
fn draw<P>(
    surface: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    source: &Rgba32FImage,
    placement: &PlacementRect,
    opacity: f32,
) where
    P: Pixel,
    P::Subpixel: Channel,
{
    let (img_w, img_h) = surface.dimensions();
    let (src_w, src_h) = source.dimensions();

    // Overlay pixels per surface pixel along each rectangle axis.
    let sx = src_w as f32 / placement.width;
    let sy = src_h as f32 / placement.height;
    let theta = placement.rotation_degrees.to_radians();

    let (min_x, min_y, max_x, max_y) = placement.rotated_bounds();
    let x_start = min_x.floor().max(0.0) as u32;
    let y_start = min_y.floor().max(0.0) as u32;
    let x_end = (max_x.ceil().max(0.0) as u32).min(img_w);
    let y_end = (max_y.ceil().max(0.0) as u32).min(img_h);

    for out_y in y_start..y_end {
        for out_x in x_start..x_end {
            // Undo the rotation to land in the unrotated rectangle.
            let center = Point::new(out_x as f32 + 0.5, out_y as f32 + 0.5);
            let local = center.rotate_about(&placement.pivot, -theta);

            let u = (local.x - placement.x) * sx;
            let v = (local.y - placement.y) * sy;
            if !(u >= 0.0 && v >= 0.0 && u < src_w as f32 && v < src_h as f32) {
                continue;
            }

            let src = sample_bilinear(source, u - 0.5, v - 0.5);
            let alpha = opacity * src[3];
            if alpha <= 0.0 {
                continue;
            }

            let channels = surface.get_pixel_mut(out_x, out_y).channels_mut();
            let dst: [f32; 4] = std::array::from_fn(|c| channels[c].to_unit());
            for (channel, v) in channels.iter_mut().zip(blend(dst, src, alpha)) {
                *channel = Channel::from_unit(v);
            }
        }
    }
}

/// Bilinear sample with edge clamping. Coordinates are in pixel-center space.
fn sample_bilinear(img: &Rgba32FImage, x: f32, y: f32) -> [f32; 4] {
    let (w, h) = img.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let w00 = (1.0 - fx) * (1.0 - fy);
    let w10 = fx * (1.0 - fy);
    let w01 = (1.0 - fx) * fy;
    let w11 = fx * fy;

    let mut out = [0.0f32; 4];
    for (c, channel) in out.iter_mut().enumerate() {
        *channel = p00[c] * w00 + p10[c] * w10 + p01[c] * w01 + p11[c] * w11;
    }
    out
}

/// Source-over with a straight (non-premultiplied) alpha, in unit space.
fn blend(dst: [f32; 4], src: [f32; 4], alpha: f32) -> [f32; 4] {
    let dst_a = dst[3];
    let out_a = alpha + dst_a * (1.0 - alpha);
    if out_a <= 0.0 {
        return [0.0; 4];
    }

    let mut out = [0.0f32; 4];
    for c in 0..3 {
        out[c] = (src[c] * alpha + dst[c] * dst_a * (1.0 - alpha)) / out_a;
    }
    out[3] = out_a;
    out
}

/// Convert the blended surface back to the photo's own color type.
fn into_color(image: DynamicImage, color: ColorType) -> DynamicImage {
    match color {
        ColorType::L8 => DynamicImage::ImageLuma8(image.to_luma8()),
        ColorType::La8 => DynamicImage::ImageLumaA8(image.to_luma_alpha8()),
        ColorType::Rgb8 => DynamicImage::ImageRgb8(image.to_rgb8()),
        ColorType::Rgba8 => DynamicImage::ImageRgba8(image.into_rgba8()),
        ColorType::L16 => DynamicImage::ImageLuma16(image.to_luma16()),
        ColorType::La16 => DynamicImage::ImageLumaA16(image.to_luma_alpha16()),
        ColorType::Rgb16 => DynamicImage::ImageRgb16(image.to_rgb16()),
        ColorType::Rgba16 => DynamicImage::ImageRgba16(image.into_rgba16()),
        ColorType::Rgb32F => DynamicImage::ImageRgb32F(image.to_rgb32f()),
        ColorType::Rgba32F => DynamicImage::ImageRgba32F(image.into_rgba32f()),
        _ => image,
    }
}
