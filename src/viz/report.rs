//! Self-contained HTML comparison of training runs

use std::fs;
use std::ops::Range;
use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::info;

use super::records::Record;
use super::run_config::{Experiment, RunConfig};
use crate::{DctnError, Result};

const PANELS: usize = 5;

/// Layout switches
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// One chart per row at a larger size
    pub big_plots: bool,
}

impl ReportOptions {
    fn grid(&self) -> (usize, (u32, u32)) {
        if self.big_plots {
            (1, (1400, 850))
        } else {
            (2, (640, 400))
        }
    }
}

struct NitdPanel {
    y_desc: &'static str,
    y_range: Range<f64>,
    value: fn(&Record) -> f64,
    legend: SeriesLabelPosition,
}

fn render_error<E: std::fmt::Display>(e: E) -> DctnError {
    DctnError::Render(e.to_string())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// One line style per experiment, hues spread evenly around the wheel
fn palette(n: usize) -> Vec<ShapeStyle> {
    (0..n)
        .map(|i| HSLColor(i as f64 / n as f64, 0.75, 0.45).stroke_width(2))
        .collect()
}

fn positive_or_one(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

fn draw_vacc_by_tracc<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    experiments: &[Experiment],
    styles: &[ShapeStyle],
) -> Result<()> {
    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..1.0, 0.0..1.0)
        .map_err(render_error)?;
    chart
        .configure_mesh()
        .x_desc("train acc")
        .y_desc("val acc")
        .draw()
        .map_err(render_error)?;

    chart
        .draw_series(LineSeries::new(
            [(0.0, 0.0), (1.0, 1.0)],
            BLACK.mix(0.3).stroke_width(1),
        ))
        .map_err(render_error)?;

    for (experiment, &style) in experiments.iter().zip(styles) {
        let points = experiment
            .increasing_tracc_records
            .iter()
            .map(|r| (r.tracc, r.vacc));
        chart
            .draw_series(LineSeries::new(points, style))
            .map_err(render_error)?
            .label(experiment.entry.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(render_error)?;
    Ok(())
}

fn draw_by_nitd<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    experiments: &[Experiment],
    styles: &[ShapeStyle],
    max_nitd: f64,
    panel: NitdPanel,
) -> Result<()> {
    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..max_nitd, panel.y_range)
        .map_err(render_error)?;
    chart
        .configure_mesh()
        .x_desc("number of iterations done")
        .y_desc(panel.y_desc)
        .draw()
        .map_err(render_error)?;

    for (experiment, &style) in experiments.iter().zip(styles) {
        let value = panel.value;
        let points = experiment
            .records
            .iter()
            .map(move |r| (r.nitd as f64, value(r)));
        chart
            .draw_series(LineSeries::new(points, style))
            .map_err(render_error)?
            .label(experiment.entry.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], style));
    }

    chart
        .configure_series_labels()
        .position(panel.legend)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(render_error)?;
    Ok(())
}

fn render_charts(experiments: &[Experiment], options: ReportOptions) -> Result<String> {
    let styles = palette(experiments.len());

    let max_nitd = experiments
        .iter()
        .filter_map(|e| e.records.last())
        .map(|r| r.nitd as f64)
        .fold(0.0, f64::max);
    let max_ce = experiments
        .iter()
        .flat_map(|e| e.records.iter())
        .flat_map(|r| [r.trmce, r.vmce])
        .fold(0.0, f64::max);
    let max_nitd = positive_or_one(max_nitd);
    let max_ce = positive_or_one(max_ce);

    let panels = [
        NitdPanel {
            y_desc: "val acc",
            y_range: 0.0..1.0,
            value: |r| r.vacc,
            legend: SeriesLabelPosition::LowerRight,
        },
        NitdPanel {
            y_desc: "train acc",
            y_range: 0.0..1.0,
            value: |r| r.tracc,
            legend: SeriesLabelPosition::LowerRight,
        },
        NitdPanel {
            y_desc: "val mean negative log likelihood",
            y_range: 0.0..max_ce,
            value: |r| r.vmce,
            legend: SeriesLabelPosition::UpperRight,
        },
        NitdPanel {
            y_desc: "train mean negative log likelihood",
            y_range: 0.0..max_ce,
            value: |r| r.trmce,
            legend: SeriesLabelPosition::UpperRight,
        },
    ];

    let (columns, (cell_width, cell_height)) = options.grid();
    let rows = PANELS.div_ceil(columns);
    let size = (cell_width * columns as u32, cell_height * rows as u32);

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;
        let areas = root.split_evenly((rows, columns));

        draw_vacc_by_tracc(&areas[0], experiments, &styles)?;
        for (area, panel) in areas[1..].iter().zip(panels) {
            draw_by_nitd(area, experiments, &styles, max_nitd, panel)?;
        }
        root.present().map_err(render_error)?;
    }
    Ok(svg)
}

/// Render the comparison of `experiments` as a standalone HTML document
pub fn render_report(
    config: &RunConfig,
    experiments: &[Experiment],
    options: ReportOptions,
) -> Result<String> {
    let svg = render_charts(experiments, options)?;

    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Training comparison</title>\n</head>\n<body>\n",
    );
    html.push_str(&format!("<p>{}</p>\n", escape_html(&config.common_description)));
    html.push_str("<ul style=\"list-style-type:circle;\">\n");
    for experiment in experiments {
        let run_info = serde_json::to_string(&experiment.run_info)?;
        html.push_str(&format!(
            "<li><b>{}</b>: <i>{}</i> : {}</li>\n",
            escape_html(&experiment.entry.name),
            escape_html(&experiment.entry.description),
            escape_html(&run_info)
        ));
    }
    html.push_str("</ul>\n");
    html.push_str(&svg);
    html.push_str("\n</body>\n</html>\n");
    Ok(html)
}

/// Render and write the report to `path`
pub fn write_report(
    path: impl AsRef<Path>,
    config: &RunConfig,
    experiments: &[Experiment],
    options: ReportOptions,
) -> Result<()> {
    let html = render_report(config, experiments, options)?;
    fs::write(path.as_ref(), html)?;
    info!(path = %path.as_ref().display(), "report written");
    Ok(())
}
