//! Cluster plots with Plotters
//!
//! A plot is built in two steps. [`build_figure`] decides everything that will
//! be drawn (point colors, centroid annotations, query markers, connector
//! lines, the counterfactual arrow) and [`render_figure`] puts that on a PNG or
//! SVG canvas.

use std::ops::Range;

use ndarray::{array, Array1, Array2};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::error::PlotError;
use crate::model::{cluster_centroids, unique_labels, Classifier};

/// A position in data coordinates
pub type Point = (f64, f64);

/// Matplotlib's `tab10` qualitative colormap
pub const TAB10: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

pub const QUERY_RED: RGBColor = RGBColor(255, 0, 0);
pub const COUNTERFACTUAL_GREEN: RGBColor = RGBColor(0, 128, 0);
pub const SECOND_QUERY_BLUE: RGBColor = RGBColor(0, 0, 255);
pub const CONNECTOR_GRAY: RGBColor = RGBColor(128, 128, 128);

/// Share of the query-to-counterfactual vector covered by the arrow
const ARROW_SCALE: f64 = 0.9;
/// Arrow head width in data units; the head is 1.5 times as long
const ARROW_HEAD_WIDTH: f64 = 0.15;

/// Which query overlay to draw on top of the clustered scatter
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// Scatter and centroid annotations only
    None,
    /// One test point connected to every centroid
    Single(Point),
    /// A query point, its counterfactual, and an arrow between them
    Counterfactual { query: Point, counterfactual: Point },
    /// Two independent test points, each tied to its own cluster
    Paired([Point; 2]),
}

/// Look up `tab10` for a value in [0, 1]
pub fn tab10(fraction: f64) -> RGBColor {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    let index = ((fraction * TAB10.len() as f64) as usize).min(TAB10.len() - 1);
    TAB10[index]
}

/// Color of a cluster label, scaled by the largest label in play.
///
/// A lone label 0 maps to the first colour.
pub fn cluster_color(label: usize, max_label: usize) -> RGBColor {
    if max_label == 0 {
        return tab10(0.0);
    }
    tab10(label as f64 / max_label as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterPoint {
    pub position: Point,
    pub color: RGBColor,
}

/// Bold, outlined "Cluster N" label placed at a centroid
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub text: String,
    pub position: Point,
    pub color: RGBColor,
}

/// A highlighted query point with its legend entry
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub position: Point,
    pub color: RGBColor,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectorStyle {
    /// Solid line in the colour of the cluster the point was assigned to
    Assigned(RGBColor),
    /// Dashed gray line to a cluster the point was not assigned to
    Unassigned,
}

/// Line from a query point to a centroid
#[derive(Debug, Clone, PartialEq)]
pub struct Connector {
    pub from: Point,
    pub to: Point,
    pub cluster: usize,
    pub style: ConnectorStyle,
}

/// Arrow whose length includes its triangular head
#[derive(Debug, Clone, PartialEq)]
pub struct Arrow {
    pub start: Point,
    pub tip: Point,
    /// Where the shaft meets the base of the head
    pub shaft_end: Point,
    /// Tip followed by the two base corners
    pub head: [Point; 3],
}

impl Arrow {
    /// Arrow from `start` covering `scale` of the way to `target`
    pub fn towards(start: Point, target: Point, scale: f64, head_width: f64) -> Self {
        let dx = (target.0 - start.0) * scale;
        let dy = (target.1 - start.1) * scale;
        let tip = (start.0 + dx, start.1 + dy);
        let length = dx.hypot(dy);

        if length == 0.0 {
            return Self {
                start,
                tip,
                shaft_end: start,
                head: [tip, tip, tip],
            };
        }

        let (ux, uy) = (dx / length, dy / length);
        let head_length = (1.5 * head_width).min(length);
        let shaft_end = (tip.0 - ux * head_length, tip.1 - uy * head_length);
        let half = head_width / 2.0;
        let (nx, ny) = (-uy * half, ux * half);

        Self {
            start,
            tip,
            shaft_end,
            head: [
                tip,
                (shaft_end.0 + nx, shaft_end.1 + ny),
                (shaft_end.0 - nx, shaft_end.1 - ny),
            ],
        }
    }
}

/// Everything a cluster plot draws, in data coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterFigure {
    pub points: Vec<ScatterPoint>,
    pub annotations: Vec<Annotation>,
    pub markers: Vec<Marker>,
    pub connectors: Vec<Connector>,
    pub arrow: Option<Arrow>,
    pub show_legend: bool,
}

impl ClusterFigure {
    /// Axis ranges covering every drawn position, padded by 5%
    pub fn bounds(&self) -> (Range<f64>, Range<f64>) {
        let mut positions: Vec<Point> = self.points.iter().map(|p| p.position).collect();
        positions.extend(self.annotations.iter().map(|a| a.position));
        positions.extend(self.markers.iter().map(|m| m.position));
        if let Some(arrow) = &self.arrow {
            positions.extend(arrow.head.iter().copied());
            positions.push(arrow.start);
        }

        let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for (x, y) in positions.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }

        (padded(x_min, x_max), padded(y_min, y_max))
    }
}

fn padded(min: f64, max: f64) -> Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return 0.0..1.0;
    }
    let pad = if max > min { (max - min) * 0.05 } else { 0.5 };
    (min - pad)..(max + pad)
}

/// Canvas and typography settings for rendered plots
#[derive(Debug, Clone)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub font_family: String,
    pub point_radius: u32,
    pub marker_radius: u32,
    pub line_width: u32,
    pub annotation_font_size: f64,
    pub legend_font_size: f64,
    /// Pixel offset of the dark outline drawn behind centroid annotations
    pub outline_width: i32,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 2000,
            height: 1000,
            font_family: "sans-serif".to_string(),
            point_radius: 3,
            marker_radius: 8,
            line_width: 2,
            annotation_font_size: 50.0,
            legend_font_size: 20.0,
            outline_width: 3,
        }
    }
}

/// Decide what a cluster plot shows.
///
/// Without a classifier the result is a plain black scatter. With one, points
/// are coloured by predicted cluster and every label in `labels` gets a centroid
/// annotation, then `query` selects the overlay. `explanations` only matters
/// for [`QueryMode::Paired`], where its presence suppresses the overlay.
pub fn build_figure(
    points: &Array2<f64>,
    labels: &Array1<usize>,
    classifier: Option<&dyn Classifier>,
    query: &QueryMode,
    explanations: Option<&[String]>,
) -> crate::Result<ClusterFigure> {
    if points.nrows() == 0 {
        return Err(PlotError::EmptyPoints.into());
    }
    if points.ncols() != 2 {
        return Err(PlotError::NotTwoDimensional(points.ncols()).into());
    }
    if points.nrows() != labels.len() {
        return Err(PlotError::LengthMismatch {
            points: points.nrows(),
            labels: labels.len(),
        }
        .into());
    }

    let positions: Vec<Point> = points.outer_iter().map(|row| (row[0], row[1])).collect();

    let Some(classifier) = classifier else {
        log::debug!("No classifier given, drawing {} points unlabelled", positions.len());
        return Ok(ClusterFigure {
            points: positions
                .into_iter()
                .map(|position| ScatterPoint {
                    position,
                    color: BLACK,
                })
                .collect(),
            ..ClusterFigure::default()
        });
    };

    let predictions = classifier.predict(points)?;
    if predictions.len() != points.nrows() {
        return Err(PlotError::PredictionCount {
            expected: points.nrows(),
            got: predictions.len(),
        }
        .into());
    }

    let cls = unique_labels(labels);
    let max_label = cls.last().copied().unwrap_or(0);

    let p_min = predictions.iter().copied().min().unwrap_or(0);
    let p_max = predictions.iter().copied().max().unwrap_or(0);
    let scatter = positions
        .iter()
        .zip(predictions.iter())
        .map(|(&position, &p)| {
            let fraction = if p_max > p_min {
                (p - p_min) as f64 / (p_max - p_min) as f64
            } else {
                0.0
            };
            ScatterPoint {
                position,
                color: tab10(fraction),
            }
        })
        .collect();

    let centroids: Vec<(usize, Point)> = cluster_centroids(points, &predictions, &cls)?
        .into_iter()
        .map(|c| (c.label, (c.position[0], c.position[1])))
        .collect();

    let annotations = centroids
        .iter()
        .map(|&(label, position)| Annotation {
            text: format!("Cluster {}", label),
            position,
            color: cluster_color(label, max_label),
        })
        .collect();

    let mut figure = ClusterFigure {
        points: scatter,
        annotations,
        ..ClusterFigure::default()
    };

    match (query, explanations) {
        (QueryMode::None, _) => {}
        (QueryMode::Single(p), _) => {
            let assigned = predict_point(classifier, *p)?;
            figure.markers.push(marker(*p, QUERY_RED, "P"));
            figure.connectors = connect_to_all(*p, assigned, &centroids, max_label);
            figure.show_legend = true;
        }
        (
            QueryMode::Counterfactual {
                query,
                counterfactual,
            },
            _,
        ) => {
            let assigned = predict_point(classifier, *counterfactual)?;
            figure.markers.push(marker(*query, QUERY_RED, "P"));
            figure
                .markers
                .push(marker(*counterfactual, COUNTERFACTUAL_GREEN, "P_cf"));
            figure.arrow = Some(Arrow::towards(
                *query,
                *counterfactual,
                ARROW_SCALE,
                ARROW_HEAD_WIDTH,
            ));
            figure.connectors = connect_to_all(*counterfactual, assigned, &centroids, max_label);
            figure.show_legend = true;
        }
        (QueryMode::Paired(pair), None) => {
            let colors = [QUERY_RED, SECOND_QUERY_BLUE];
            for (idx, (&p, color)) in pair.iter().zip(colors).enumerate() {
                let assigned = predict_point(classifier, p)?;
                figure.markers.push(marker(p, color, &format!("P_{}", idx)));
                figure.connectors.extend(
                    centroids
                        .iter()
                        .filter(|(label, _)| *label == assigned)
                        .map(|&(label, to)| Connector {
                            from: p,
                            to,
                            cluster: label,
                            style: ConnectorStyle::Assigned(cluster_color(label, max_label)),
                        }),
                );
            }
            figure.show_legend = true;
        }
        (QueryMode::Paired(_), Some(_)) => {
            log::debug!("Explanations supplied, skipping paired query overlay");
        }
    }

    Ok(figure)
}

fn predict_point(classifier: &dyn Classifier, p: Point) -> crate::Result<usize> {
    let predicted = classifier.predict(&array![[p.0, p.1]])?;
    predicted.get(0).copied().ok_or_else(|| {
        PlotError::PredictionCount {
            expected: 1,
            got: predicted.len(),
        }
        .into()
    })
}

fn marker(position: Point, color: RGBColor, label: &str) -> Marker {
    Marker {
        position,
        color,
        label: label.to_string(),
    }
}

/// One connector per centroid; only the assigned cluster's is solid
fn connect_to_all(
    from: Point,
    assigned: usize,
    centroids: &[(usize, Point)],
    max_label: usize,
) -> Vec<Connector> {
    centroids
        .iter()
        .map(|&(label, to)| Connector {
            from,
            to,
            cluster: label,
            style: if label == assigned {
                ConnectorStyle::Assigned(cluster_color(label, max_label))
            } else {
                ConnectorStyle::Unassigned
            },
        })
        .collect()
}

/// Draw a figure to `output_path`; a `.svg` extension selects the SVG backend
pub fn render_figure(figure: &ClusterFigure, style: &PlotStyle, output_path: &str) -> crate::Result<()> {
    let size = (style.width, style.height);
    if output_path.to_ascii_lowercase().ends_with(".svg") {
        let root = SVGBackend::new(output_path, size).into_drawing_area();
        draw_figure(&root, figure, style)?;
        root.present()?;
    } else {
        let root = BitMapBackend::new(output_path, size).into_drawing_area();
        draw_figure(&root, figure, style)?;
        root.present()?;
    }

    log::info!("Cluster plot saved to {}", output_path);
    Ok(())
}

/// Build and render a cluster plot in one call
pub fn plot_clusters(
    points: &Array2<f64>,
    labels: &Array1<usize>,
    classifier: Option<&dyn Classifier>,
    query: &QueryMode,
    explanations: Option<&[String]>,
    style: &PlotStyle,
    output_path: &str,
) -> crate::Result<ClusterFigure> {
    let figure = build_figure(points, labels, classifier, query, explanations)?;
    render_figure(&figure, style, output_path)?;
    Ok(figure)
}

fn draw_figure<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    figure: &ClusterFigure,
    style: &PlotStyle,
) -> crate::Result<()>
where
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;

    let (x_range, y_range) = figure.bounds();
    let mut chart = ChartBuilder::on(root)
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)?;

    chart.configure_mesh().draw()?;

    chart.draw_series(
        figure
            .points
            .iter()
            .map(|p| Circle::new(p.position, style.point_radius, p.color.filled())),
    )?;

    for connector in &figure.connectors {
        let path = vec![connector.from, connector.to];
        match connector.style {
            ConnectorStyle::Assigned(color) => {
                chart.draw_series(LineSeries::new(path, color.stroke_width(style.line_width)))?;
            }
            ConnectorStyle::Unassigned => {
                chart.draw_series(DashedLineSeries::new(
                    path,
                    10,
                    6,
                    CONNECTOR_GRAY.stroke_width(style.line_width),
                ))?;
            }
        }
    }

    if let Some(arrow) = &figure.arrow {
        chart.draw_series(LineSeries::new(
            vec![arrow.start, arrow.shaft_end],
            BLACK.stroke_width(style.line_width),
        ))?;
        chart.draw_series(std::iter::once(Polygon::new(
            arrow.head.to_vec(),
            BLACK.filled(),
        )))?;
    }

    for marker in &figure.markers {
        let color = marker.color;
        chart
            .draw_series(std::iter::once(Circle::new(
                marker.position,
                style.marker_radius,
                color.filled(),
            )))?
            .label(marker.label.as_str())
            .legend(move |(x, y)| Circle::new((x, y), 6, color.filled()));
    }

    let family = style.font_family.as_str();
    let anchor = Pos::new(HPos::Center, VPos::Center);
    let w = style.outline_width;
    let offsets = [(-w, 0), (w, 0), (0, -w), (0, w), (-w, -w), (-w, w), (w, -w), (w, w)];
    for annotation in &figure.annotations {
        let font = FontDesc::new(FontFamily::from(family), style.annotation_font_size, FontStyle::Bold);
        let outline = TextStyle::from(font.clone()).color(&BLACK).pos(anchor);
        let fill = TextStyle::from(font).color(&annotation.color).pos(anchor);

        chart.draw_series(offsets.iter().map(|&offset| {
            EmptyElement::at(annotation.position)
                + Text::new(annotation.text.clone(), offset, outline.clone())
        }))?;
        chart.draw_series(std::iter::once(
            EmptyElement::at(annotation.position)
                + Text::new(annotation.text.clone(), (0, 0), fill.clone()),
        ))?;
    }

    if figure.show_legend {
        chart
            .configure_series_labels()
            .label_font(TextStyle::from(FontDesc::new(
                FontFamily::from(family),
                style.legend_font_size,
                FontStyle::Normal,
            )))
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    Ok(())
}
