//! Renders a planned model's arena occupancy to an SVG: operator
//! columns on the x axis, byte offsets on the y axis, one colored
//! rectangle per activation and one translucent one per staging
//! buffer, with the peak drawn as a horizontal rule.

use plotters::prelude::*;

use crate::geometry::{get_buf_rects, get_rects};
use crate::helpe::*;

pub fn render_footprint(
    model: &Model,
    peak: ByteSteps,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    let op_num = model.operators.len();
    let root = SVGBackend::new(path, (1024, 640)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("arena peak: {peak} B"), ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(42)
        .y_label_area_size(64)
        .build_cartesian_2d(0f64..op_num as f64, 0f64..peak as f64 * 1.08)?;
    chart
        .configure_mesh()
        .x_desc("operator")
        .y_desc("arena offset (bytes)")
        .disable_mesh()
        .draw()?;

    for (i, rect) in get_rects(model).iter().enumerate() {
        if rect.width == 0 {
            // Consumed in place at birth; nothing of its own to draw.
            continue;
        }
        let addr = match model.tensors[&rect.id].addr {
            Some(addr) => addr,
            None => continue,
        };
        let color = Palette99::pick(i);
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (rect.start as f64, addr as f64),
                ((rect.start + rect.width) as f64, (addr + rect.height) as f64),
            ],
            color.mix(0.6).filled(),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            format!("t{}", rect.id),
            (
                rect.start as f64 + 0.05,
                (addr + rect.height) as f64 - peak as f64 * 0.02,
            ),
            ("sans-serif", 13),
        )))?;
    }

    for rect in get_buf_rects(model) {
        let op = &model.operators[rect.id as usize];
        if op.buffer_size == 0 {
            continue;
        }
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (rect.start as f64, op.buffer_addr as f64),
                (
                    (rect.start + rect.width) as f64,
                    (op.buffer_addr + op.buffer_size) as f64,
                ),
            ],
            BLACK.mix(0.2).filled(),
        )))?;
    }

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(0f64, peak as f64), (op_num as f64, peak as f64)],
        RED.stroke_width(2),
    )))?;
    root.present()?;

    Ok(())
}
