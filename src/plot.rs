// src/plot.rs

use crate::batch::ResultTable;
use crate::error::{Result, VqsweepError};
use crate::metrics::SequenceMeans;
use log::info;
use once_cell::sync::Lazy;
use plotters::coord::Shift;
use plotters::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Sweep outputs are named `output_<codec>_<bitrate>k_decoded.yuv`; the
/// chart recovers the grid coordinates from those names.
static FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"output_(\w+)_(\d+)k_").expect("Invalid variant name regex"));

/// Sorted per-codec series of (bitrate, means), keyed by codec name.
type CodecSeries = BTreeMap<String, Vec<(u32, SequenceMeans)>>;

/// Extracts (codec, bitrate_kbps) from a sweep output file name.
pub fn parse_variant(file: &str) -> Result<(String, u32)> {
    let caps = FILE_PATTERN.captures(file).ok_or_else(|| {
        VqsweepError::Parse(format!(
            "File name does not follow the output_<codec>_<bitrate>k convention: {file}"
        ))
    })?;
    let codec = caps[1].to_string();
    let bitrate = caps[2]
        .parse::<u32>()
        .map_err(|_| VqsweepError::Parse(format!("Invalid bitrate in file name: {file}")))?;
    Ok((codec, bitrate))
}

fn series_by_codec(table: &ResultTable) -> Result<CodecSeries> {
    let mut groups: CodecSeries = BTreeMap::new();
    for row in table.rows() {
        let (codec, bitrate) = parse_variant(&row.file)?;
        groups.entry(codec).or_default().push((bitrate, row.means));
    }
    for points in groups.values_mut() {
        points.sort_by_key(|(bitrate, _)| *bitrate);
    }
    Ok(groups)
}

/// Renders the result table as three side-by-side panels, one per
/// metric, each plotting bitrate against the metric with one line per
/// codec. A row whose file name cannot be attributed to a sweep
/// variant fails the whole chart.
pub fn render_chart(table: &ResultTable, output_path: &Path) -> Result<()> {
    if table.is_empty() {
        return Err(VqsweepError::Plot("No scored rows to plot".to_string()));
    }
    let groups = series_by_codec(table)?;
    info!(
        "Plotting {} codec series to {}",
        groups.len(),
        output_path.display()
    );

    let root = BitMapBackend::new(output_path, (1800, 520)).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| VqsweepError::Plot(format!("Failed to fill chart background: {e}")))?;
    let panels = root.split_evenly((1, 3));

    let metrics: [(&str, &str, fn(&SequenceMeans) -> f64); 3] = [
        ("PSNR", "Average PSNR (dB)", |m| m.psnr),
        ("SSIM", "Average SSIM", |m| m.ssim),
        ("LPIPS", "Average LPIPS", |m| m.lpips),
    ];
    for (panel, (title, axis_label, pick)) in panels.iter().zip(metrics) {
        draw_panel(panel, title, axis_label, pick, &groups)?;
    }

    root.present()
        .map_err(|e| VqsweepError::Plot(format!("Failed to save chart: {e:?}")))?;
    info!("Successfully generated chart: {}", output_path.display());
    Ok(())
}

fn draw_panel(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    title: &str,
    axis_label: &str,
    pick: fn(&SequenceMeans) -> f64,
    groups: &CodecSeries,
) -> Result<()> {
    let mut x_min = u32::MAX;
    let mut x_max = 0u32;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;
    for points in groups.values() {
        for (bitrate, means) in points {
            let value = pick(means);
            x_min = x_min.min(*bitrate);
            x_max = x_max.max(*bitrate);
            y_min = y_min.min(value);
            y_max = y_max.max(value);
        }
    }

    // Padding keeps single-point and flat series visible.
    let y_pad = ((y_max - y_min).abs() * 0.05).max(0.01);
    let x_pad = ((x_max - x_min) / 20).max(50);
    let x_range = x_min.saturating_sub(x_pad)..(x_max + x_pad);
    let y_range = (y_min - y_pad)..(y_max + y_pad);

    let mut chart = ChartBuilder::on(area)
        .caption(format!("{title} vs Bitrate"), ("sans-serif", 20).into_font())
        .margin(12)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(|e| VqsweepError::Plot(format!("Failed to build chart: {e}")))?;

    chart
        .configure_mesh()
        .x_desc("Bitrate (kbps)")
        .y_desc(axis_label)
        .axis_desc_style(("sans-serif", 14))
        .label_style(("sans-serif", 12))
        .draw()
        .map_err(|e| VqsweepError::Plot(format!("Failed to draw mesh: {e:?}")))?;

    for (index, (codec, points)) in groups.iter().enumerate() {
        let color = Palette99::pick(index).to_rgba();
        chart
            .draw_series(LineSeries::new(
                points.iter().map(|(bitrate, means)| (*bitrate, pick(means))),
                color.stroke_width(2),
            ))
            .map_err(|e| VqsweepError::Plot(format!("Failed to draw series: {e:?}")))?
            .label(codec.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.filled()));

        chart
            .draw_series(
                points
                    .iter()
                    .map(|(bitrate, means)| Circle::new((*bitrate, pick(means)), 3, color.filled())),
            )
            .map_err(|e| VqsweepError::Plot(format!("Failed to draw markers: {e:?}")))?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .margin(8)
        .label_font(("sans-serif", 12))
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| VqsweepError::Plot(format!("Failed to draw legend: {e:?}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SequenceScore;

    fn score(file: &str, psnr: f64) -> SequenceScore {
        SequenceScore {
            file: file.to_string(),
            means: SequenceMeans {
                psnr,
                ssim: 0.9,
                lpips: 0.1,
            },
        }
    }

    #[test]
    fn variant_names_parse_into_codec_and_bitrate() {
        assert_eq!(
            parse_variant("output_h264_nvenc_1000k_decoded.yuv").unwrap(),
            ("h264_nvenc".to_string(), 1000)
        );
        assert_eq!(
            parse_variant("output_av1_nvenc_500k_decoded.yuv").unwrap(),
            ("av1_nvenc".to_string(), 500)
        );
    }

    #[test]
    fn foreign_file_names_are_rejected() {
        let err = parse_variant("reference.yuv").unwrap_err();
        assert!(matches!(err, VqsweepError::Parse(_)));
    }

    #[test]
    fn series_group_by_codec_and_sort_by_bitrate() {
        let mut table = ResultTable::new();
        table.push(score("output_h264_nvenc_2000k_decoded.yuv", 30.0));
        table.push(score("output_av1_nvenc_500k_decoded.yuv", 29.0));
        table.push(score("output_h264_nvenc_500k_decoded.yuv", 25.0));

        let groups = series_by_codec(&table).unwrap();
        let codecs: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(codecs, ["av1_nvenc", "h264_nvenc"]);

        let h264 = &groups["h264_nvenc"];
        assert_eq!(h264[0].0, 500);
        assert_eq!(h264[1].0, 2000);
    }

    #[test]
    fn empty_tables_cannot_be_plotted() {
        let err = render_chart(&ResultTable::new(), Path::new("/tmp/never.png")).unwrap_err();
        assert!(matches!(err, VqsweepError::Plot(_)));
    }
}
