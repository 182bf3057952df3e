//! Isoform block model as SVG: one row per transcript, exons and UTRs as
//! thin boxes, CDS as thick boxes, introns as lines. Every box of an
//! isoform shares the fill chosen by the color mapper.

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use polars::prelude::*;
use tracing::info;

use crate::analysis::color_ramp::{BUPU_9, NO_DATA_COLOR};
use crate::analysis::isoform_join::GeneView;
use crate::models::SegmentKind;

const WIDTH: u32 = 1100;
const LEGEND_WIDTH: u32 = 190;
const X_PAD: i64 = 50;

const EXON_HALF_HEIGHT: f64 = 0.10;
const CDS_HALF_HEIGHT: f64 = 0.18;

const TEXT_COLOR: RGBColor = RGBColor(31, 45, 61);
const PLOT_BG: RGBColor = RGBColor(250, 250, 247);

fn plot_err<E: std::fmt::Display>(e: E) -> PolarsError {
    PolarsError::ComputeError(format!("plotting failed: {e}").into())
}

pub fn plot_height(isoforms: usize) -> u32 {
    280 + 60 * isoforms as u32
}

fn draw_legend<DB: DrawingBackend>(area: &DrawingArea<DB, Shift>, view: &GeneView) -> PolarsResult<()> {
    let title = ("sans-serif", 14).into_font().color(&TEXT_COLOR);
    let small = ("sans-serif", 12).into_font().color(&TEXT_COLOR);

    area.draw(&Text::new("log1p(mean TPM)", (10, 60), title.clone())).map_err(plot_err)?;
    area.draw(&Text::new(format!("({})", view.condition.label()), (10, 78), small.clone()))
        .map_err(plot_err)?;

    // darkest on top
    let (x0, x1, top, step) = (14, 44, 100, 18);
    for (i, color) in BUPU_9.iter().rev().enumerate() {
        let y0 = top + step * i as i32;
        area.draw(&Rectangle::new([(x0, y0), (x1, y0 + step)], color.filled()))
            .map_err(plot_err)?;
    }
    area.draw(&Rectangle::new([(x0, top), (x1, top + step * BUPU_9.len() as i32)], BLACK.stroke_width(1)))
        .map_err(plot_err)?;

    let bottom = top + step * BUPU_9.len() as i32;
    let (lo, hi) = view.log_range.unwrap_or((0.0, 0.0));
    area.draw(&Text::new(format!("{hi:.2}"), (x1 + 8, top + 4), small.clone())).map_err(plot_err)?;
    area.draw(&Text::new(format!("{lo:.2}"), (x1 + 8, bottom - 12), small.clone())).map_err(plot_err)?;

    let no_data_y = bottom + 20;
    area.draw(&Rectangle::new([(x0, no_data_y), (x1, no_data_y + step)], NO_DATA_COLOR.filled()))
        .map_err(plot_err)?;
    area.draw(&Rectangle::new([(x0, no_data_y), (x1, no_data_y + step)], BLACK.stroke_width(1)))
        .map_err(plot_err)?;
    area.draw(&Text::new("no data", (x1 + 8, no_data_y + 3), small)).map_err(plot_err)?;

    Ok(())
}

fn draw_gene_view<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, view: &GeneView, title: &str) -> PolarsResult<()> {
    let (x_min, x_max) = view
        .span()
        .ok_or_else(|| PolarsError::ComputeError(format!("{} has no segments to draw", view.gene_id).into()))?;
    let rows = view.isoforms.len();

    root.fill(&WHITE).map_err(plot_err)?;
    let (width, _) = root.dim_in_pixel();
    let (chart_area, legend_area) = root.split_horizontally(width.saturating_sub(LEGEND_WIDTH) as i32);

    let mut chart = ChartBuilder::on(&chart_area)
        .caption(title, ("sans-serif", 22).into_font().color(&TEXT_COLOR))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(130)
        .build_cartesian_2d((x_min - X_PAD)..(x_max + X_PAD), -1.0..rows as f64)
        .map_err(plot_err)?;

    chart.plotting_area().fill(&PLOT_BG).map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(0)
        .x_desc("Genomic position (bp)")
        .y_desc("Transcript isoform")
        .light_line_style(BLACK.mix(0.06).stroke_width(1))
        .label_style(("sans-serif", 13).into_font().color(&TEXT_COLOR))
        .axis_desc_style(("sans-serif", 14).into_font().color(&TEXT_COLOR))
        .draw()
        .map_err(plot_err)?;

    for (row, iso) in view.isoforms.iter().enumerate() {
        let y = row as f64;
        let fill = iso.color.mix(0.95).filled();

        // introns first so the boxes sit on top of the line ends
        chart
            .draw_series(iso.introns.iter().map(|&(s, e)| {
                PathElement::new(vec![(s - 1, y), (e + 1, y)], BLACK.mix(0.55).stroke_width(2))
            }))
            .map_err(plot_err)?;

        for (kind, half) in [
            (SegmentKind::Exon, EXON_HALF_HEIGHT),
            (SegmentKind::Utr, EXON_HALF_HEIGHT),
            (SegmentKind::Cds, CDS_HALF_HEIGHT),
        ] {
            chart
                .draw_series(
                    iso.segments_of(kind)
                        .map(|s| Rectangle::new([(s.start, y - half), (s.end, y + half)], fill)),
                )
                .map_err(plot_err)?;
            chart
                .draw_series(iso.segments_of(kind).map(|s| {
                    Rectangle::new([(s.start, y - half), (s.end, y + half)], BLACK.stroke_width(1))
                }))
                .map_err(plot_err)?;
        }

        // transcript ID in the label area, right-aligned against the axis
        let (px, py) = chart.backend_coord(&(x_min - X_PAD, y));
        let style = ("sans-serif", 13)
            .into_font()
            .color(&TEXT_COLOR)
            .pos(Pos::new(HPos::Right, VPos::Center));
        root.draw(&Text::new(iso.transcript_id.clone(), (px - 8, py), style))
            .map_err(plot_err)?;
    }

    draw_legend(&legend_area, view)?;
    Ok(())
}

fn default_title(view: &GeneView) -> String {
    format!("Isoform block model: {}", view.gene_id)
}

/// Render into an in-memory SVG document.
pub fn isoform_svg(view: &GeneView) -> PolarsResult<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (WIDTH, plot_height(view.isoforms.len()))).into_drawing_area();
        draw_gene_view(&root, view, &default_title(view))?;
        root.present().map_err(plot_err)?;
    }
    Ok(svg)
}

pub fn render_isoform_plot(view: &GeneView, output_path: &Path) -> PolarsResult<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(plot_err)?;
    }

    let root = SVGBackend::new(output_path, (WIDTH, plot_height(view.isoforms.len()))).into_drawing_area();
    draw_gene_view(&root, view, &default_title(view))?;
    root.present().map_err(plot_err)?;

    info!(
        "Isoform plot for {} ({}) saved to {}",
        view.gene_id,
        view.condition.label(),
        output_path.display()
    );
    Ok(())
}
