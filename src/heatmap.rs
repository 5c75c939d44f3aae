use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontTransform;
use thiserror::Error;

use crate::error::CladekitError;
use crate::presence::PresenceMatrix;
use crate::utils::read_lines;

/*
========================================
   Custom error definitions
========================================
*/

#[derive(Error, Debug)]
pub enum HeatmapError {
    /// Represents a failure of the drawing backend
    #[error("plot error: {0}")]
    Plot(String),
    /// Indicates a matrix without rows or columns
    #[error("matrix has no species or no genes to draw")]
    EmptyMatrix,
}

#[derive(Debug, Clone)]
pub struct HeatmapConfig {
    pub input: PathBuf,
    pub species_order: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
}

// Light yellow through teal to blue
const SCALE: [(f64, (u8, u8, u8)); 3] = [(0.0, (255, 255, 217)), (0.5, (65, 182, 196)), (1.0, (34, 94, 168))];

const FONT_SIZE: u32 = 12;
const CHAR_WIDTH: u32 = 7;

/// Cell colour for a value scaled into `[0, 1]`
pub fn scale_color(fraction: f64) -> RGBColor {
    let t = fraction.clamp(0.0, 1.0);
    for pair in SCALE.windows(2) {
        let (lo, (r0, g0, b0)) = pair[0];
        let (hi, (r1, g1, b1)) = pair[1];
        if t <= hi {
            let f = if hi > lo { (t - lo) / (hi - lo) } else { 0.0 };
            let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
            return RGBColor(mix(r0, r1), mix(g0, g1), mix(b0, b1));
        }
    }
    let (_, (r, g, b)) = SCALE[SCALE.len() - 1];
    RGBColor(r, g, b)
}

/// Draw the matrix as an SVG heatmap with species rows and gene columns
pub fn render_heatmap(matrix: &PresenceMatrix, output: &Path, width: u32, height: u32) -> Result<(), HeatmapError> {
    if matrix.species.is_empty() || matrix.genes.is_empty() {
        return Err(HeatmapError::EmptyMatrix);
    }
    let plot_err = |e: DrawingAreaErrorKind<std::io::Error>| HeatmapError::Plot(e.to_string());

    let longest = |labels: &[String]| labels.iter().map(|l| l.chars().count() as u32).max().unwrap_or(0);
    let left = longest(matrix.species.as_slice()) * CHAR_WIDTH + 2 * FONT_SIZE;
    let top = longest(matrix.genes.as_slice()) * CHAR_WIDTH + 2 * FONT_SIZE;
    let margin = FONT_SIZE;

    let cell_w = (width.saturating_sub(left + margin) / matrix.genes.len() as u32).max(1);
    let cell_h = (height.saturating_sub(top + margin) / matrix.species.len() as u32).max(1);

    let root = SVGBackend::new(output, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let max = matrix.max_value().max(1) as f64;
    let border = RGBColor(128, 128, 128);

    for (row, (_, values)) in matrix.rows().enumerate() {
        for (col, value) in values.iter().enumerate() {
            let x0 = (left + col as u32 * cell_w) as i32;
            let y0 = (top + row as u32 * cell_h) as i32;
            let corners = [(x0, y0), (x0 + cell_w as i32, y0 + cell_h as i32)];

            root.draw(&Rectangle::new(corners, scale_color(*value as f64 / max).filled()))
                .map_err(plot_err)?;
            root.draw(&Rectangle::new(corners, border.stroke_width(1)))
                .map_err(plot_err)?;
        }
    }

    let species_style = TextStyle::from(("sans-serif", FONT_SIZE).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Right, VPos::Center));
    for (row, species) in matrix.species.iter().enumerate() {
        let y = (top + row as u32 * cell_h + cell_h / 2) as i32;
        root.draw_text(species, &species_style, ((left - FONT_SIZE / 2) as i32, y))
            .map_err(plot_err)?;
    }

    let gene_style = TextStyle::from(("sans-serif", FONT_SIZE).into_font().transform(FontTransform::Rotate270))
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center));
    for (col, gene) in matrix.genes.iter().enumerate() {
        let x = (left + col as u32 * cell_w + cell_w / 2) as i32;
        root.draw_text(gene, &gene_style, (x, (top - FONT_SIZE / 2) as i32))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Read a matrix, order its rows by the species list and render it
pub fn run_heatmap(config: &HeatmapConfig) -> Result<PresenceMatrix, CladekitError> {
    let matrix = PresenceMatrix::read_csv(&config.input)?;
    let species_order = read_lines(&config.species_order)?;

    let missing = species_order.iter().filter(|s| !matrix.species.contains(s)).count();
    if missing > 0 {
        log::warn!("{missing} species from the species order are not in the matrix and are drawn as absent");
    }
    let dropped = matrix.species.iter().filter(|s| !species_order.contains(s)).count();
    if dropped > 0 {
        log::warn!("{dropped} species in the matrix are not in the species order and are left out");
    }

    let ordered = matrix.reindex(&species_order);
    render_heatmap(&ordered, &config.output, config.width, config.height)?;
    log::info!("Heatmap saved as '{}'", config.output.display());

    Ok(ordered)
}
