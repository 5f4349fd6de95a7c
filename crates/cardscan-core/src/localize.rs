//! Card boundary detection and perspective rectification.
//!
//! Detection works on a downscaled, contrast-enhanced grayscale copy:
//! blur → Canny → dilation → outer contours, largest first. The first contour
//! whose polygon approximation has four vertices and covers enough of the
//! image is the card; otherwise the bounding rectangle of the largest contour
//! is used. The boundary is mapped back to source coordinates and the card is
//! warped to an upright rectangle.
//!
//! A photo with no usable boundary is not an error: [`Localization::success`]
//! is `false` and the original image is handed on unrectified.

use image::{DynamicImage, GenericImageView, GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length, contour_area};
use imageproc::morphology::dilate;
use imageproc::point::Point;

use crate::config::LocalizerConfig;
use crate::normalize::{self, DenoiseMethod, ImageError};

const BLUR_SIGMA: f32 = 1.1;

/// Four card corners in source-image coordinates, ordered
/// top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    points: [(f32, f32); 4],
}

impl Quadrilateral {
    /// Order `points` canonically and reject degenerate shapes.
    ///
    /// Returns `None` when the ordering rule assigns one point to two corners
    /// or the enclosed area is not positive.
    pub fn new(points: [(f32, f32); 4]) -> Option<Self> {
        let ordered = order_points(points);
        for i in 0..4 {
            for j in (i + 1)..4 {
                if ordered[i] == ordered[j] {
                    return None;
                }
            }
        }
        if quad_area(&ordered) <= f32::EPSILON {
            return None;
        }
        Some(Self { points: ordered })
    }

    pub fn points(&self) -> [(f32, f32); 4] {
        self.points
    }

    pub fn area(&self) -> f32 {
        quad_area(&self.points)
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            points: self.points.map(|(x, y)| (x * factor, y * factor)),
        }
    }

    /// Output size of the rectified card: the longer of each pair of
    /// opposing edges.
    pub fn target_size(&self) -> (u32, u32) {
        let [tl, tr, br, bl] = self.points;
        let width = distance(br, bl).max(distance(tr, tl));
        let height = distance(tr, br).max(distance(tl, bl));
        (width as u32, height as u32)
    }
}

/// Canonical corner order by the sum/difference rule.
///
/// Smallest `x + y` is top-left, largest is bottom-right; smallest `y - x` is
/// top-right, largest is bottom-left. Ties go to the earlier point.
pub fn order_points(points: [(f32, f32); 4]) -> [(f32, f32); 4] {
    let sum = |p: (f32, f32)| p.0 + p.1;
    let diff = |p: (f32, f32)| p.1 - p.0;
    [
        extreme(&points, sum, false),
        extreme(&points, diff, false),
        extreme(&points, sum, true),
        extreme(&points, diff, true),
    ]
}

fn extreme(points: &[(f32, f32); 4], key: impl Fn((f32, f32)) -> f32, max: bool) -> (f32, f32) {
    let mut best = points[0];
    let mut best_key = key(best);
    for &p in &points[1..] {
        let k = key(p);
        if (max && k > best_key) || (!max && k < best_key) {
            best = p;
            best_key = k;
        }
    }
    best
}

fn quad_area(points: &[(f32, f32); 4]) -> f32 {
    contour_area(&points.map(|(x, y)| Point::new(x, y))) as f32
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Warp the quadrilateral region of `image` to an upright rectangle.
///
/// Returns `None` for a degenerate target size or projection.
pub fn rectify(image: &DynamicImage, quad: &Quadrilateral) -> Option<DynamicImage> {
    let (width, height) = quad.target_size();
    if width < 2 || height < 2 {
        return None;
    }
    let right = (width - 1) as f32;
    let bottom = (height - 1) as f32;
    let target = [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)];
    let projection = Projection::from_control_points(quad.points(), target)?;

    let source = image.to_rgb8();
    let mut card = RgbImage::new(width, height);
    warp_into(
        &source,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut card,
    );
    Some(DynamicImage::ImageRgb8(card))
}

/// Outcome of one localization pass.
#[derive(Debug, Clone)]
pub struct Localization {
    /// The rectified card, or a copy of the input when `success` is false.
    pub card: DynamicImage,
    pub quad: Option<Quadrilateral>,
    pub success: bool,
}

impl Localization {
    fn unrectified(image: &DynamicImage) -> Self {
        Self {
            card: image.clone(),
            quad: None,
            success: false,
        }
    }
}

pub struct CardLocalizer {
    config: LocalizerConfig,
}

impl CardLocalizer {
    pub fn new(config: LocalizerConfig) -> Self {
        Self { config }
    }

    /// Find the card in `image` and rectify it.
    pub fn localize(&self, image: &DynamicImage) -> Result<Localization, ImageError> {
        normalize::ensure_valid(image)?;
        let (prepared, scale) = self.prepare(image)?;

        let Some(quad) = self.find_boundary(&prepared) else {
            tracing::info!("no card boundary found, using unrectified image");
            return Ok(Localization::unrectified(image));
        };
        let quad = quad.scaled(1.0 / scale);

        match rectify(image, &quad) {
            Some(card) => {
                tracing::info!(
                    width = card.width(),
                    height = card.height(),
                    corners = ?quad.points(),
                    "card rectified"
                );
                Ok(Localization {
                    card,
                    quad: Some(quad),
                    success: true,
                })
            }
            None => {
                tracing::warn!(corners = ?quad.points(), "degenerate card boundary");
                Ok(Localization::unrectified(image))
            }
        }
    }

    /// Detection copy: downscaled, grayscale, contrast-enhanced, smoothed.
    /// Returns the image with the scale factor relative to the source.
    fn prepare(&self, image: &DynamicImage) -> Result<(GrayImage, f32), ImageError> {
        let resized = normalize::resize(image, self.config.max_width, self.config.max_height)?;
        let scale = resized.width() as f32 / image.width() as f32;
        let gray = normalize::normalize(&resized)?;
        let enhanced = normalize::enhance_contrast(&gray, self.config.contrast_alpha, 0.0)?;
        let smoothed = normalize::denoise(&enhanced, DenoiseMethod::Gaussian)?;
        Ok((smoothed, scale))
    }

    /// Locate the card boundary in a prepared grayscale image.
    pub fn find_boundary(&self, gray: &GrayImage) -> Option<Quadrilateral> {
        let blurred = gaussian_blur_f32(gray, BLUR_SIGMA);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);
        let dilated = dilate(&edges, Norm::LInf, self.config.dilate_radius);

        let mut contours: Vec<(f64, Vec<Point<i32>>)> = find_contours::<i32>(&dilated)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter(|c| c.points.len() >= 3)
            .map(|c| (contour_area(&c.points), c.points))
            .collect();
        if contours.is_empty() {
            tracing::debug!("no external contours");
            return None;
        }
        contours.sort_by(|a, b| b.0.total_cmp(&a.0));

        let (width, height) = gray.dimensions();
        let min_area = width as f64 * height as f64 * self.config.min_area_ratio;

        for (area, points) in &contours {
            let approx = self.approximate(points);
            if approx.len() != 4 || *area <= min_area {
                continue;
            }
            let corners = [0, 1, 2, 3].map(|i| (approx[i].x as f32, approx[i].y as f32));
            if let Some(quad) = Quadrilateral::new(corners) {
                tracing::debug!(area, "four-vertex card boundary");
                return Some(quad);
            }
        }

        let (area, largest) = &contours[0];
        if self.approximate(largest).len() < 4 {
            tracing::debug!(area, "largest contour is not a polygon");
            return None;
        }
        tracing::debug!(area, "falling back to bounding rectangle of largest contour");
        bounding_quad(largest)
    }

    fn approximate(&self, points: &[Point<i32>]) -> Vec<Point<i32>> {
        let epsilon = self.config.polygon_epsilon * arc_length(points, true);
        approximate_closed(points, epsilon)
    }
}

/// Douglas-Peucker over a closed contour: split at the point farthest from
/// the start and simplify each half as an open curve.
fn approximate_closed(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    if points.len() < 3 || epsilon <= 0.0 {
        return points.to_vec();
    }
    let start = points[0];
    let dist2 = |p: &Point<i32>| {
        let dx = (p.x - start.x) as i64;
        let dy = (p.y - start.y) as i64;
        dx * dx + dy * dy
    };
    let mut far = 0;
    for (i, p) in points.iter().enumerate() {
        if dist2(p) > dist2(&points[far]) {
            far = i;
        }
    }
    if far == 0 {
        return vec![start];
    }

    let mut closing = points[far..].to_vec();
    closing.push(start);

    let mut polygon = approximate_polygon_dp(&points[..=far], epsilon, false);
    polygon.pop();
    polygon.extend(approximate_polygon_dp(&closing, epsilon, false));
    polygon.pop();
    polygon
}

fn bounding_quad(points: &[Point<i32>]) -> Option<Quadrilateral> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    let (x0, y0) = (min_x as f32, min_y as f32);
    let (x1, y1) = ((max_x + 1) as f32, (max_y + 1) as f32);
    Quadrilateral::new([(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
}
