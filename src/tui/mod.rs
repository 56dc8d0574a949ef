// src/tui/mod.rs
use crate::types::{BotStatus, EngineSnapshot, EventKind};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use rust_decimal::Decimal;
use std::{io, time::Duration};
use tokio::sync::watch;

/// Blocking UI loop; run it on a blocking thread.
///
/// Quits on `q` / Ctrl+C (which also requests engine shutdown) or once the
/// engine reports it has stopped.
pub fn run(
    snapshots: watch::Receiver<EngineSnapshot>,
    shutdown: watch::Sender<bool>,
) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &snapshots, &shutdown);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    snapshots: &watch::Receiver<EngineSnapshot>,
    shutdown: &watch::Sender<bool>,
) -> anyhow::Result<()> {
    loop {
        let snapshot = snapshots.borrow().clone();
        terminal.draw(|f| ui(f, &snapshot))?;

        if snapshot.status == BotStatus::Stopped {
            return Ok(());
        }

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                let ctrl_c =
                    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
                if key.code == KeyCode::Char('q') || ctrl_c {
                    shutdown.send_replace(true);
                    return Ok(());
                }
            }
        }
    }
}

fn fmt_opt(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn status_style(status: &BotStatus) -> Style {
    let color = match status {
        BotStatus::Running => Color::Green,
        BotStatus::Halted => Color::Red,
        BotStatus::Starting | BotStatus::Stopped => Color::Yellow,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn ui(f: &mut Frame, snapshot: &EngineSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(8),
                Constraint::Min(5),
            ]
            .as_ref(),
        )
        .split(f.size());

    let price_text = match snapshot.last_price {
        Some(p) => p.to_string(),
        None => "Waiting for data...".to_string(),
    };
    let mode = if snapshot.dry_run { "DRY RUN" } else { "LIVE" };

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!("Candle Sniper [{} {}]", snapshot.symbol, snapshot.timeframe),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" | {} | Price: ", mode)),
        Span::styled(
            price_text,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(format!("{:?}", snapshot.status).to_uppercase(), status_style(&snapshot.status)),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(header, chunks[0]);

    let mut lines = match snapshot.position.open_position() {
        Some(open) => {
            let pnl_color = match snapshot.unrealized_pnl {
                Some(p) if p.is_sign_negative() => Color::Red,
                _ => Color::Green,
            };
            vec![
                Line::from(Span::styled("OPEN", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))),
                Line::from(format!("Entry {}  Qty {}", open.entry_price, open.quantity)),
                Line::from(format!("SL {}  TP {}", open.stop_loss_price, open.take_profit_price)),
                Line::from(Span::styled(
                    format!(
                        "Unrealized {} ({}%)",
                        fmt_opt(snapshot.unrealized_pnl),
                        fmt_opt(snapshot.unrealized_pnl_pct)
                    ),
                    Style::default().fg(pnl_color),
                )),
            ]
        }
        None => vec![Line::from(Span::styled("FLAT", Style::default().fg(Color::DarkGray)))],
    };
    lines.push(Line::from(format!(
        "Realized {} over {} trades | rev {} | signal {}",
        snapshot.realized_pnl,
        snapshot.closed_trades,
        snapshot.revision,
        snapshot
            .last_signal
            .map(|s| format!("{:?}", s).to_uppercase())
            .unwrap_or_else(|| "-".to_string())
    )));
    let position = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Position"));
    f.render_widget(position, chunks[1]);

    let events: Vec<ListItem> = snapshot
        .recent_events
        .iter()
        .rev()
        .map(|e| {
            let color = match e.kind {
                EventKind::Entered => Color::Green,
                EventKind::Exited => Color::Magenta,
                EventKind::Halted | EventKind::OrderFailed => Color::Red,
                EventKind::FetchFailed | EventKind::InvalidCandles | EventKind::EntrySkipped => {
                    Color::Yellow
                }
                _ => Color::White,
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{} ", e.at.format("%H:%M:%S"))),
                Span::styled(e.message.clone(), Style::default().fg(color)),
            ]))
        })
        .collect();

    let events_list =
        List::new(events).block(Block::default().borders(Borders::ALL).title("Events (q to quit)"));
    f.render_widget(events_list, chunks[2]);
}
