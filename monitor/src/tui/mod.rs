mod input;

use crate::{
    aggregate::RateCache,
    parameters::DisplayParams,
    store::TimeSeriesStore,
};
use chrono::{Local, TimeZone};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use input::{Action, action_for, span_label, step_y_max};
use pulse_monitor_common::{BUCKET_WIDTH, EpochIndex};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    symbols::Marker,
    text::Line,
    widgets::{Axis, Bar, BarChart, BarGroup, Block, Borders, Chart, Dataset, GraphType, Paragraph},
};
use std::{
    io::{self, Stdout},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use strum::Display;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Largest averaging interval that still fits a day of data on the
/// plot (86400 s over a 60-column window).
const MAX_INTERVAL_SECS: usize = 1440;
const KEY_HELP: &str = "q quit | arrows/,./<> navigate | Home/End | PgUp/PgDn y-max | +/- interval | h view | s/l params | r reset";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub(crate) enum Mode {
    #[strum(to_string = "live")]
    Live,
    #[strum(to_string = "playback")]
    Playback,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
enum View {
    #[strum(to_string = "rate")]
    RatePlot,
    #[strum(to_string = "histogram")]
    Histogram,
}

/// The terminal dashboard: a scrolling count-rate plot or a
/// pulse-height histogram over the store, navigated with the
/// keyboard. Purely a reader of the store; all mutation here is
/// display parameters and the shutdown flag.
pub(crate) struct DisplayApp {
    store: Arc<TimeSeriesStore>,
    cache: RateCache,
    params: DisplayParams,
    params_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    mode: Mode,
    view: View,
    end_epoch: EpochIndex,
    tracking: bool,
}

impl DisplayApp {
    pub(crate) fn new(
        store: Arc<TimeSeriesStore>,
        params: DisplayParams,
        params_path: PathBuf,
        shutdown: Arc<AtomicBool>,
        mode: Mode,
    ) -> Self {
        let cache = RateCache::new(
            store.clone(),
            params.avg_intvl,
            usize::from(params.pht) / BUCKET_WIDTH as usize,
        );
        let end_epoch = store.count().saturating_sub(1);
        Self {
            store,
            cache,
            params,
            params_path,
            shutdown,
            mode,
            view: View::RatePlot,
            end_epoch,
            tracking: mode == Mode::Live,
        }
    }

    /// Takes over the terminal until quit or shutdown.
    pub(crate) fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                info!("shutdown flag raised, leaving display loop");
                return Ok(());
            }
            if self.tracking {
                self.end_epoch = self.store.count().saturating_sub(1);
            }
            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(POLL_INTERVAL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        if let Some(action) = action_for(key) {
                            if self.apply(action) {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Applies one user command; returns true on quit.
    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::Quit => {
                self.shutdown.store(true, Ordering::Release);
                return true;
            }
            Action::SeekByInterval(steps) => {
                self.seek_by(steps * self.cache.interval() as i64)
            }
            Action::SeekBy(delta) => self.seek_by(delta),
            Action::SeekHome => self.seek_to(0),
            Action::SeekEnd => self.seek_to(i64::MAX),
            Action::YMaxUp => self.params.y_max = step_y_max(self.params.y_max, true),
            Action::YMaxDown => self.params.y_max = step_y_max(self.params.y_max, false),
            Action::IntervalUp => self.set_interval(self.params.avg_intvl + 1),
            Action::IntervalDown => self.set_interval(self.params.avg_intvl.saturating_sub(1)),
            Action::ToggleView => {
                self.view = match self.view {
                    View::RatePlot => View::Histogram,
                    View::Histogram => View::RatePlot,
                }
            }
            Action::SaveParams => {
                if let Err(e) = self.params.save(&self.params_path) {
                    error!("failed to save parameters: {e}");
                }
            }
            Action::LoadParams => match DisplayParams::load(&self.params_path) {
                Ok(params) => self.set_params(params),
                // prior in-memory values stay in force
                Err(e) => error!("failed to load parameters: {e}"),
            },
            Action::ResetDefaults => self.set_params(DisplayParams::default()),
        }
        false
    }

    fn set_params(&mut self, params: DisplayParams) {
        self.params = params;
        self.set_interval(params.avg_intvl);
        self.cache
            .set_threshold_bucket(usize::from(params.pht) / BUCKET_WIDTH as usize);
    }

    fn set_interval(&mut self, interval: usize) {
        let interval = interval.clamp(1, MAX_INTERVAL_SECS);
        self.params.avg_intvl = interval;
        self.cache.set_interval(interval);
    }

    fn seek_by(&mut self, delta: i64) {
        self.seek_to(self.end_epoch as i64 + delta);
    }

    // Out-of-range targets clamp silently; tracking re-engages in
    // live mode when the newest epoch comes back into view.
    fn seek_to(&mut self, target: i64) {
        let newest = self.store.count().saturating_sub(1);
        self.end_epoch = target.clamp(0, newest as i64) as EpochIndex;
        self.tracking = self.mode == Mode::Live && self.end_epoch == newest;
    }

    fn draw(&mut self, frame: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(8),
                Constraint::Length(3),
                Constraint::Length(1),
            ])
            .split(frame.area());

        match self.view {
            View::RatePlot => self.draw_rate_plot(frame, rows[0]),
            View::Histogram => self.draw_histogram(frame, rows[0]),
        }
        self.draw_readout(frame, rows[1]);
        self.draw_status(frame, rows[2]);
    }

    fn draw_rate_plot(&mut self, frame: &mut Frame, area: Rect) {
        let interval = self.cache.interval();
        let columns = usize::from(area.width.saturating_sub(10)).max(1);

        let mut data = Vec::with_capacity(columns);
        for k in 0..columns {
            let offset = k * interval;
            if offset > self.end_epoch {
                break;
            }
            let epoch = self.end_epoch - offset;
            if let Some(rate) = self.cache.average_rate(epoch) {
                data.push((epoch as f64, rate));
            }
        }

        let x_hi = self.end_epoch as f64;
        let x_lo = x_hi - (columns * interval) as f64;
        let y_max = f64::from(self.params.y_max);
        let span = span_label((columns * interval) as u64);

        let dataset = Dataset::default()
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&data);
        let chart = Chart::new(vec![dataset])
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("count rate [{span}]")),
            )
            .x_axis(
                Axis::default()
                    .bounds([x_lo, x_hi])
                    .labels([self.time_label(x_lo), self.time_label(x_hi)]),
            )
            .y_axis(
                Axis::default()
                    .bounds([0.0, y_max])
                    .labels(["0".to_string(), format!("{y_max:.0}")]),
            );
        frame.render_widget(chart, area);
    }

    fn draw_histogram(&mut self, frame: &mut Frame, area: Rect) {
        let Some(rates) = self.cache.average_rate_all_buckets(self.end_epoch) else {
            let empty = Paragraph::new("no data in window")
                .block(Block::default().borders(Borders::ALL).title("pulse heights"));
            frame.render_widget(empty, area);
            return;
        };
        let threshold_bucket = self.cache.threshold_bucket();
        let visible = usize::from(area.width.saturating_sub(2));
        let bars = rates
            .iter()
            .take(visible)
            .enumerate()
            .map(|(bucket, &rate)| {
                let style = if bucket < threshold_bucket {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default().fg(Color::Green)
                };
                Bar::default()
                    .value(rate.round() as u64)
                    .text_value(String::new())
                    .style(style)
            })
            .collect::<Vec<_>>();
        let chart = BarChart::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("pulse heights [{} ADC/bucket]", BUCKET_WIDTH)),
            )
            .bar_width(1)
            .bar_gap(0)
            .max(u64::from(self.params.y_max))
            .data(BarGroup::default().bars(&bars));
        frame.render_widget(chart, area);
    }

    fn draw_readout(&mut self, frame: &mut Frame, area: Rect) {
        let rate = self.cache.average_rate(self.end_epoch);
        let text = match rate {
            Some(rate) => format!(
                "{rate:8.1} CPM   avg {}s   pht {}   y-max {}",
                self.params.avg_intvl, self.params.pht, self.params.y_max
            ),
            None => format!(
                "     n/a CPM   avg {}s   pht {}   y-max {}",
                self.params.avg_intvl, self.params.pht, self.params.y_max
            ),
        };
        let colour = if self.tracking { Color::Green } else { Color::Red };
        let readout = Paragraph::new(Line::styled(text, Style::default().fg(colour)))
            .block(Block::default().borders(Borders::ALL));
        frame.render_widget(readout, area);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let status = format!(
            "{} | {} | epoch {}/{} @ {} | {}",
            self.mode,
            self.view,
            self.end_epoch,
            self.store.count(),
            self.time_label(self.end_epoch as f64),
            KEY_HELP,
        );
        frame.render_widget(Paragraph::new(status), area);
    }

    fn time_label(&self, epoch: f64) -> String {
        Local
            .timestamp_opt(self.store.start_time() + epoch as i64, 0)
            .single()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string())
    }
}
