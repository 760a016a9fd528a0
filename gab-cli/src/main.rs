mod cache;
mod chat;
mod client;
mod config;
mod ui;

use anyhow::Result;
use chat::ChatController;
use client::{ChatApi, HttpApi};
use config::CliConfig;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use gab_shared::UNKNOWN_CHAT_ID;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use ui::Screen;

const BLINK_INTERVAL: Duration = Duration::from_millis(500);

struct App<A> {
    controller: ChatController<A>,
    input: String,
    /// Byte offset into `input`, always on a char boundary.
    cursor_position: usize,
    blink_on: bool,
}

impl<A: ChatApi> App<A> {
    fn new(controller: ChatController<A>) -> Self {
        Self {
            controller,
            input: String::new(),
            cursor_position: 0,
            blink_on: true,
        }
    }

    fn move_cursor_left(&mut self) {
        if let Some(c) = self.input[..self.cursor_position].chars().next_back() {
            self.cursor_position -= c.len_utf8();
        }
    }

    fn move_cursor_right(&mut self) {
        if let Some(c) = self.input[self.cursor_position..].chars().next() {
            self.cursor_position += c.len_utf8();
        }
    }

    fn insert_char(&mut self, c: char) {
        self.input.insert(self.cursor_position, c);
        self.cursor_position += c.len_utf8();
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.move_cursor_left();
            self.input.remove(self.cursor_position);
        }
    }

    /// Sends the input line unless it's blank or a request is still running.
    fn submit(&mut self) {
        if self.input.trim().is_empty() || self.controller.state().is_loading() {
            return;
        }
        let content = std::mem::take(&mut self.input);
        self.cursor_position = 0;
        self.controller.state().scroll_to_bottom();

        let controller = self.controller.clone();
        tokio::spawn(async move { controller.handle_send_message(content).await });
    }

    fn open_chat(&self, chat_id: String) {
        let controller = self.controller.clone();
        tokio::spawn(async move { controller.open_chat(&chat_id).await });
    }

    fn switch_chat(&self, step: isize) {
        let target = self.controller.state().adjacent_chat(step);
        if let Some(chat_id) = target {
            self.open_chat(chat_id);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = CliConfig::from_env()?;

    // Log to a file so the TUI stays intact
    let log_file = std::fs::File::create(&config.log_file).ok();
    if let Some(file) = log_file {
        tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .init();
    }
    info!("Using server at {}", config.server_url);

    let api = Arc::new(HttpApi::new(&config.server_url)?);
    let (redraw_tx, mut redraw_rx) = mpsc::unbounded_channel();
    let controller = ChatController::new(api, redraw_tx);

    tokio::spawn({
        let controller = controller.clone();
        async move {
            controller.load_chats().await;
            controller.open_chat(UNKNOWN_CHAT_ID).await;
        }
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = event::read() {
            if ui_tx.send(event).is_err() {
                break;
            }
        }
    });

    let mut app = App::new(controller);
    let res = run_app(&mut terminal, &mut app, &mut redraw_rx, &mut ui_rx).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

async fn run_app<B: Backend, A: ChatApi>(
    terminal: &mut Terminal<B>,
    app: &mut App<A>,
    redraw_rx: &mut mpsc::UnboundedReceiver<()>,
    ui_rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    let mut blink = tokio::time::interval(BLINK_INTERVAL);

    loop {
        {
            let state = app.controller.state();
            let screen = Screen {
                state: &state,
                input: &app.input,
                cursor_position: app.cursor_position,
                blink_on: app.blink_on,
            };
            terminal.draw(|f| ui::ui(f, &screen))?;
        }

        tokio::select! {
            Some(()) = redraw_rx.recv() => {}
            _ = blink.tick() => {
                app.blink_on = !app.blink_on;
            }
            Some(event) = ui_rx.recv() => {
                match event {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Char('c') if ctrl => return Ok(()),
                            KeyCode::Char('n') if ctrl => {
                                app.open_chat(UNKNOWN_CHAT_ID.to_string());
                            }
                            KeyCode::Up if ctrl => app.switch_chat(-1),
                            KeyCode::Down if ctrl => app.switch_chat(1),
                            KeyCode::Char(c) => app.insert_char(c),
                            KeyCode::Backspace => app.delete_char(),
                            KeyCode::Left => app.move_cursor_left(),
                            KeyCode::Right => app.move_cursor_right(),
                            KeyCode::Home => app.cursor_position = 0,
                            KeyCode::End => app.cursor_position = app.input.len(),
                            KeyCode::Enter => app.submit(),
                            KeyCode::Up => app.controller.state().scroll_up(1),
                            KeyCode::Down => app.controller.state().scroll_down(1),
                            KeyCode::PageUp => app.controller.state().scroll_up(10),
                            KeyCode::PageDown => app.controller.state().scroll_down(10),
                            _ => {}
                        }
                    }
                    Event::Mouse(mouse) => match mouse.kind {
                        event::MouseEventKind::ScrollUp => app.controller.state().scroll_up(3),
                        event::MouseEventKind::ScrollDown => app.controller.state().scroll_down(3),
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }
}
