use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, Gauge, GraphType, Paragraph},
    Frame,
};

use super::training_dashboard::{DashboardState, TrainingStatus};
use crate::coach::GateDecision;

/// Render the full training dashboard.
pub fn render(frame: &mut Frame, dashboard: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),  // Main content
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    render_header(frame, dashboard, chunks[0]);
    render_main(frame, dashboard, chunks[1]);
    render_footer(frame, chunks[2]);
}

fn render_header(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let (status_str, status_color) = match &dashboard.status {
        TrainingStatus::Running => ("RUNNING", Color::Green),
        TrainingStatus::Stopping => ("STOPPING", Color::Yellow),
        TrainingStatus::Finished => ("FINISHED", Color::Cyan),
        TrainingStatus::Failed(_) => ("FAILED", Color::Red),
    };

    let mut spans = vec![
        Span::styled(
            format!("Iteration {}/{}", dashboard.iteration, dashboard.total_iterations),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("  |  pass {}", dashboard.attempt)),
        Span::raw(format!("  |  {}", dashboard.phase)),
    ];
    if dashboard.warmup {
        spans.push(Span::styled("  (warmup)", Style::default().fg(Color::Yellow)));
    }
    spans.extend([
        Span::raw("  |  ["),
        Span::styled(status_str, Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        Span::raw("]"),
    ]);

    let header = Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));

    frame.render_widget(header, area);
}

fn render_main(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let main_cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(50), // Win rate chart
            Constraint::Min(6),         // Loss chart
            Constraint::Length(3),      // Self-play gauge
            Constraint::Length(3),      // Iteration gauge
        ])
        .split(main_cols[0]);

    render_win_rate_chart(frame, dashboard, left_rows[0]);
    render_loss_chart(frame, dashboard, left_rows[1]);
    render_selfplay_gauge(frame, dashboard, left_rows[2]);
    render_progress_gauge(frame, dashboard, left_rows[3]);
    render_stats_panel(frame, dashboard, main_cols[1]);
}

fn render_win_rate_chart(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let random_data: Vec<(f64, f64)> = dashboard.random_history.iter().copied().collect();
    let past_data: Vec<(f64, f64)> = dashboard.past_history.iter().copied().collect();

    let (x_min, x_max) = x_bounds(&[random_data.as_slice(), past_data.as_slice()], dashboard.total_iterations);

    let mut datasets = vec![];
    if !past_data.is_empty() {
        datasets.push(
            Dataset::default()
                .name("vs Past")
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(Color::Green))
                .data(&past_data),
        );
    }
    if !random_data.is_empty() {
        datasets.push(
            Dataset::default()
                .name("vs Random")
                .marker(symbols::Marker::Dot)
                .graph_type(GraphType::Scatter)
                .style(Style::default().fg(Color::Cyan))
                .data(&random_data),
        );
    }

    let y_labels = vec![Span::raw("0%"), Span::raw("50%"), Span::raw("100%")];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("Arena Win Rate"))
        .x_axis(iteration_axis(x_min, x_max))
        .y_axis(
            Axis::default()
                .title("Rate")
                .labels(y_labels)
                .bounds([0.0, 1.0]),
        );

    frame.render_widget(chart, area);
}

fn render_loss_chart(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let total: Vec<(f64, f64)> = dashboard.loss_history.iter().copied().collect();
    let policy: Vec<(f64, f64)> = dashboard.policy_loss_history.iter().copied().collect();
    let value: Vec<(f64, f64)> = dashboard.value_loss_history.iter().copied().collect();

    let (x_min, x_max) = x_bounds(&[total.as_slice()], dashboard.total_iterations);

    let y_max = total.iter().map(|&(_, y)| y).fold(0.1_f64, f64::max);
    // Round up to nearest 0.1
    let y_max = ((y_max * 10.0).ceil() / 10.0).max(0.1);

    let mut datasets = vec![];
    for (name, data, color) in [
        ("Total", &total, Color::Red),
        ("Policy", &policy, Color::Magenta),
        ("Value", &value, Color::Blue),
    ] {
        if !data.is_empty() {
            datasets.push(
                Dataset::default()
                    .name(name)
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(color))
                    .data(data),
            );
        }
    }

    let y_labels = vec![Span::raw("0"), Span::raw(format!("{:.2}", y_max))];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("Loss"))
        .x_axis(iteration_axis(x_min, x_max))
        .y_axis(
            Axis::default()
                .title("Loss")
                .labels(y_labels)
                .bounds([0.0, y_max]),
        );

    frame.render_widget(chart, area);
}

fn render_selfplay_gauge(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let progress = dashboard.selfplay_progress();
    let label = format!("{}/{} games", dashboard.games_completed, dashboard.games_total);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Self-Play"))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(progress)
        .label(label);

    frame.render_widget(gauge, area);
}

fn render_progress_gauge(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let progress = dashboard.progress();
    let label = format!(
        "{}/{} ({:.1}%)",
        dashboard.iteration.saturating_sub(1),
        dashboard.total_iterations,
        progress * 100.0
    );

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Iterations"))
        .gauge_style(Style::default().fg(Color::Blue))
        .ratio(progress)
        .label(label);

    frame.render_widget(gauge, area);
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v * 100.0))
}

fn render_stats_panel(frame: &mut Frame, dashboard: &DashboardState, area: Rect) {
    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::White));

    let mut lines = vec![
        Line::from(vec![
            label("vs Past:     "),
            Span::styled(
                percent(DashboardState::latest(&dashboard.past_history)),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            label("vs Random:   "),
            Span::styled(
                percent(DashboardState::latest(&dashboard.random_history)),
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(vec![
            label("Draws:       "),
            Span::styled(
                percent(dashboard.draw_rate.map(f64::from)),
                Style::default().fg(Color::Yellow),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            label("Loss:        "),
            Span::raw(
                DashboardState::latest(&dashboard.loss_history)
                    .map_or_else(|| "-".to_string(), |l| format!("{:.4}", l)),
            ),
        ]),
        Line::from(vec![
            label("Model:       "),
            Span::raw(
                dashboard
                    .model_version
                    .map_or_else(|| "-".to_string(), |v| format!("iteration {v}")),
            ),
        ]),
        Line::from(""),
    ];

    let gate = match dashboard.last_gate {
        Some((iteration, decision)) => {
            let color = match decision {
                GateDecision::Accepted => Color::Green,
                GateDecision::Forced => Color::Yellow,
                GateDecision::Rejected => Color::Red,
            };
            Span::styled(format!("{decision} ({iteration})"), Style::default().fg(color))
        }
        None => Span::raw("-"),
    };
    lines.push(Line::from(vec![label("Last Gate:   "), gate]));
    lines.push(Line::from(vec![
        label("Rejected:    "),
        Span::raw(format!("{}", dashboard.rejections)),
    ]));
    lines.push(Line::from(vec![
        label("Forced:      "),
        Span::raw(format!("{}", dashboard.forced)),
    ]));

    if let TrainingStatus::Failed(message) = &dashboard.status {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Red),
        )));
    }

    let stats = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Stats"));

    frame.render_widget(stats, area);
}

fn render_footer(frame: &mut Frame, area: Rect) {
    let footer = Paragraph::new("Q: Quit after this iteration")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Controls"));

    frame.render_widget(footer, area);
}

fn iteration_axis(x_min: f64, x_max: f64) -> Axis<'static> {
    Axis::default()
        .title("Iteration")
        .labels([x_min as usize, x_max as usize].map(|x| Span::raw(x.to_string())))
        .bounds([x_min, x_max])
}

/// Compute x-axis bounds from data points.
fn x_bounds(series: &[&[(f64, f64)]], total_iterations: usize) -> (f64, f64) {
    let firsts = series.iter().filter_map(|s| s.first().map(|d| d.0));
    let lasts = series.iter().filter_map(|s| s.last().map(|d| d.0));
    let x_min = firsts.fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x))));
    let x_max = lasts.fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))));

    let x_min = x_min.unwrap_or(0.0);
    let x_max = x_max.unwrap_or(total_iterations.max(1) as f64);
    (x_min, x_max.max(x_min + 1.0))
}
