//! Chart model built by plotting calls, rendered to PNG rasters.

use image::{ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Kind of a plotted series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    /// Vertical bars over categories.
    Bar,
    /// Horizontal bars over categories.
    BarH,
    /// Connected points.
    Line,
    /// Unconnected points.
    Scatter,
    /// Slices of a disc.
    Pie,
    /// Adjacent bars over value bins.
    Hist,
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bar => "bar",
            Self::BarH => "barh",
            Self::Line => "line",
            Self::Scatter => "scatter",
            Self::Pie => "pie",
            Self::Hist => "hist",
        };
        write!(f, "{name}")
    }
}

impl ChartKind {
    /// Parses a `kind=` argument.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bar" => Some(Self::Bar),
            "barh" => Some(Self::BarH),
            "line" => Some(Self::Line),
            "scatter" => Some(Self::Scatter),
            "pie" => Some(Self::Pie),
            "hist" => Some(Self::Hist),
            _ => None,
        }
    }

    fn is_categorical(self) -> bool {
        matches!(self, Self::Bar | Self::BarH | Self::Hist)
    }
}

/// One plotted series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    /// How the series is drawn.
    pub kind: ChartKind,
    /// Legend label.
    pub label: Option<String>,
    /// Category labels for categorical kinds.
    pub categories: Vec<String>,
    /// X positions.
    pub x: Vec<f64>,
    /// Y values.
    pub y: Vec<f64>,
}

impl ChartSeries {
    /// A categorical series (bar, barh, pie).
    #[must_use]
    pub fn categorical(kind: ChartKind, categories: Vec<String>, y: Vec<f64>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let x = (0..y.len()).map(|i| i as f64).collect();
        Self {
            kind,
            label: None,
            categories,
            x,
            y,
        }
    }

    /// A numeric series (line, scatter).
    #[must_use]
    pub fn numeric(kind: ChartKind, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self {
            kind,
            label: None,
            categories: Vec::new(),
            x,
            y,
        }
    }

    /// Bins `values` into a histogram series.
    #[must_use]
    pub fn histogram(values: &[f64], bins: usize) -> Self {
        let bins = bins.max(1);
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let (lo, hi) = finite.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
        let mut counts = vec![0.0; bins];
        let mut categories = Vec::with_capacity(bins);
        if finite.is_empty() {
            return Self::categorical(ChartKind::Hist, vec![String::new(); bins], counts);
        }
        let span = if hi > lo { hi - lo } else { 1.0 };
        #[allow(clippy::cast_precision_loss)]
        let width = span / bins as f64;
        for v in &finite {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = (((v - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1.0;
        }
        for i in 0..bins {
            #[allow(clippy::cast_precision_loss)]
            let start = lo + width * i as f64;
            categories.push(format!("{start:.2}"));
        }
        Self::categorical(ChartKind::Hist, categories, counts)
    }

    /// Sets the legend label.
    #[must_use]
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }
}

/// A figure: text metadata plus plotted series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chart {
    /// Figure title.
    pub title: Option<String>,
    /// X axis label.
    pub xlabel: Option<String>,
    /// Y axis label.
    pub ylabel: Option<String>,
    /// Plotted series, in call order.
    pub series: Vec<ChartSeries>,
}

const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);

fn color(i: usize) -> Rgb<u8> {
    Rgb(PALETTE[i % PALETTE.len()])
}

struct Frame {
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
}

impl Frame {
    fn px(&self, x: f64) -> f64 {
        self.left + (x - self.x_min) / (self.x_max - self.x_min) * (self.right - self.left)
    }

    fn py(&self, y: f64) -> f64 {
        self.bottom - (y - self.y_min) / (self.y_max - self.y_min) * (self.bottom - self.top)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fill_rect(img: &mut RgbImage, x0: f64, y0: f64, x1: f64, y1: f64, c: Rgb<u8>) {
    let (w, h) = (f64::from(img.width()), f64::from(img.height()));
    let xa = x0.min(x1).clamp(0.0, w) as u32;
    let xb = x0.max(x1).clamp(0.0, w) as u32;
    let ya = y0.min(y1).clamp(0.0, h) as u32;
    let yb = y0.max(y1).clamp(0.0, h) as u32;
    for y in ya..yb {
        for x in xa..xb {
            img.put_pixel(x, y, c);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn draw_line(img: &mut RgbImage, from: (f64, f64), to: (f64, f64), c: Rgb<u8>) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as usize;
    #[allow(clippy::cast_precision_loss)]
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = from.0 + (to.0 - from.0) * t;
        let y = from.1 + (to.1 - from.1) * t;
        fill_rect(img, x - 1.0, y - 1.0, x + 1.0, y + 1.0, c);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fill_circle(img: &mut RgbImage, cx: f64, cy: f64, r: f64, c: Rgb<u8>) {
    let (w, h) = (img.width(), img.height());
    let y0 = (cy - r).floor().max(0.0) as u32;
    let y1 = ((cy + r).ceil().max(0.0) as u32).min(h);
    let x0 = (cx - r).floor().max(0.0) as u32;
    let x1 = ((cx + r).ceil().max(0.0) as u32).min(w);
    for y in y0..y1 {
        for x in x0..x1 {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            if dx * dx + dy * dy <= r * r {
                img.put_pixel(x, y, c);
            }
        }
    }
}

impl Chart {
    /// Creates an empty figure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing has been plotted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// The kind of the first series.
    #[must_use]
    pub fn kind(&self) -> Option<ChartKind> {
        self.series.first().map(|s| s.kind)
    }

    /// Adds a series.
    pub fn push(&mut self, series: ChartSeries) {
        self.series.push(series);
    }

    /// Renders the figure to an RGB raster.
    #[must_use]
    pub fn render(&self, width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(width.max(32), height.max(32), WHITE);
        match self.kind() {
            None => {}
            Some(ChartKind::Pie) => self.render_pie(&mut img),
            Some(_) => self.render_axes(&mut img),
        }
        img
    }

    /// Renders and writes the figure as a PNG file.
    pub fn save_png(&self, path: &Path, width: u32, height: u32) -> Result<(), String> {
        self.render(width, height)
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| e.to_string())
    }

    fn render_pie(&self, img: &mut RgbImage) {
        let values: Vec<f64> = self
            .series
            .iter()
            .filter(|s| s.kind == ChartKind::Pie)
            .flat_map(|s| s.y.iter().copied())
            .map(|v| if v.is_finite() && v > 0.0 { v } else { 0.0 })
            .collect();
        let total: f64 = values.iter().sum();
        if total <= 0.0 {
            return;
        }
        let (w, h) = (f64::from(img.width()), f64::from(img.height()));
        let (cx, cy) = (w / 2.0, h / 2.0);
        let r = (w.min(h) / 2.0 - 20.0).max(4.0);
        let mut bounds = Vec::with_capacity(values.len());
        let mut acc = 0.0;
        for v in &values {
            acc += v / total;
            bounds.push(acc);
        }
        for y in 0..img.height() {
            for x in 0..img.width() {
                let dx = f64::from(x) - cx;
                let dy = f64::from(y) - cy;
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                // Start at twelve o'clock, go counter-clockwise.
                let angle = (-dx).atan2(-dy);
                let frac = (angle + std::f64::consts::PI) / std::f64::consts::TAU;
                let slice = bounds.iter().position(|b| frac <= *b).unwrap_or(values.len() - 1);
                img.put_pixel(x, y, color(slice));
            }
        }
    }

    fn frame(&self, img: &RgbImage) -> Frame {
        let (w, h) = (f64::from(img.width()), f64::from(img.height()));
        let mut x_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;
        let horizontal = self.kind() == Some(ChartKind::BarH);
        for s in &self.series {
            let (xs, ys) = if horizontal { (&s.y, &s.x) } else { (&s.x, &s.y) };
            for v in xs.iter().filter(|v| v.is_finite()) {
                x_min = x_min.min(*v);
                x_max = x_max.max(*v);
            }
            for v in ys.iter().filter(|v| v.is_finite()) {
                y_min = y_min.min(*v);
                y_max = y_max.max(*v);
            }
            if s.kind.is_categorical() {
                if horizontal {
                    x_min = x_min.min(0.0);
                    y_min -= 0.5;
                    y_max += 0.5;
                } else {
                    y_min = y_min.min(0.0);
                    x_min -= 0.5;
                    x_max += 0.5;
                }
            }
        }
        if !x_min.is_finite() || !x_max.is_finite() {
            (x_min, x_max) = (0.0, 1.0);
        }
        if !y_min.is_finite() || !y_max.is_finite() {
            (y_min, y_max) = (0.0, 1.0);
        }
        if x_max - x_min < f64::EPSILON {
            x_min -= 1.0;
            x_max += 1.0;
        }
        if y_max - y_min < f64::EPSILON {
            y_min -= 1.0;
            y_max += 1.0;
        }
        let y_pad = (y_max - y_min) * 0.05;
        Frame {
            left: 50.0,
            right: w - 20.0,
            top: 30.0,
            bottom: h - 40.0,
            x_min,
            x_max,
            y_min: if y_min == 0.0 { 0.0 } else { y_min - y_pad },
            y_max: y_max + y_pad,
        }
    }

    fn render_axes(&self, img: &mut RgbImage) {
        let frame = self.frame(img);
        for i in 0..=4 {
            let y = frame.top + (frame.bottom - frame.top) * f64::from(i) / 4.0;
            fill_rect(img, frame.left, y, frame.right, y + 1.0, GRID);
        }

        let bar_series: Vec<usize> = self
            .series
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind, ChartKind::Bar | ChartKind::BarH))
            .map(|(i, _)| i)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let slot = 0.8 / bar_series.len().max(1) as f64;

        for (i, s) in self.series.iter().enumerate() {
            let c = color(i);
            match s.kind {
                ChartKind::Bar | ChartKind::BarH => {
                    let k = bar_series.iter().position(|&b| b == i).unwrap_or(0);
                    #[allow(clippy::cast_precision_loss)]
                    let offset = -0.4 + slot * k as f64;
                    for (x, y) in s.x.iter().zip(&s.y).filter(|(_, y)| y.is_finite()) {
                        if s.kind == ChartKind::Bar {
                            fill_rect(
                                img,
                                frame.px(x + offset),
                                frame.py(0.0_f64.max(frame.y_min)),
                                frame.px(x + offset + slot),
                                frame.py(*y),
                                c,
                            );
                        } else {
                            fill_rect(
                                img,
                                frame.px(0.0_f64.max(frame.x_min)),
                                frame.py(x + offset),
                                frame.px(*y),
                                frame.py(x + offset + slot),
                                c,
                            );
                        }
                    }
                }
                ChartKind::Hist => {
                    for (x, y) in s.x.iter().zip(&s.y) {
                        fill_rect(
                            img,
                            frame.px(x - 0.5) + 1.0,
                            frame.py(0.0),
                            frame.px(x + 0.5),
                            frame.py(*y),
                            c,
                        );
                    }
                }
                ChartKind::Line => {
                    let points: Vec<(f64, f64)> = s
                        .x
                        .iter()
                        .zip(&s.y)
                        .filter(|(x, y)| x.is_finite() && y.is_finite())
                        .map(|(x, y)| (frame.px(*x), frame.py(*y)))
                        .collect();
                    for pair in points.windows(2) {
                        draw_line(img, pair[0], pair[1], c);
                    }
                    if points.len() == 1 {
                        fill_circle(img, points[0].0, points[0].1, 3.0, c);
                    }
                }
                ChartKind::Scatter => {
                    for (x, y) in s.x.iter().zip(&s.y) {
                        if x.is_finite() && y.is_finite() {
                            fill_circle(img, frame.px(*x), frame.py(*y), 3.0, c);
                        }
                    }
                }
                ChartKind::Pie => {}
            }
        }

        fill_rect(img, frame.left - 1.0, frame.top, frame.left + 1.0, frame.bottom, BLACK);
        fill_rect(img, frame.left, frame.bottom - 1.0, frame.right, frame.bottom + 1.0, BLACK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_bins() {
        let s = ChartSeries::histogram(&[1.0, 2.0, 2.5, 10.0], 3);
        assert_eq!(s.y, vec![3.0, 0.0, 1.0]);
        assert_eq!(s.categories.len(), 3);
    }

    #[test]
    fn test_render_bar_draws_pixels() {
        let mut chart = Chart::new();
        chart.push(ChartSeries::categorical(
            ChartKind::Bar,
            vec!["a".into(), "b".into()],
            vec![3.0, 5.0],
        ));
        let img = chart.render(200, 150);
        assert_eq!(img.dimensions(), (200, 150));
        assert!(img.pixels().any(|p| *p == color(0)));
    }

    #[test]
    fn test_render_pie() {
        let mut chart = Chart::new();
        chart.push(ChartSeries::categorical(
            ChartKind::Pie,
            vec!["x".into(), "y".into()],
            vec![1.0, 1.0],
        ));
        let img = chart.render(100, 100);
        assert!(img.pixels().any(|p| *p == color(0)));
        assert!(img.pixels().any(|p| *p == color(1)));
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.png");
        let mut chart = Chart::new();
        chart.push(ChartSeries::numeric(ChartKind::Line, vec![0.0, 1.0, 2.0], vec![1.0, 4.0, 2.0]));
        chart.save_png(&path, 120, 90).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_empty_chart_renders_blank() {
        let img = Chart::new().render(64, 64);
        assert!(img.pixels().all(|p| *p == WHITE));
    }
}
