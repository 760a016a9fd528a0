use crate::chat::{ChatState, EMPTY_CHAT_HINT};
use gab_shared::{builtin_prompts, Message, MessageRole, UNKNOWN_CHAT_ID};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

const EVEN_ROW_BG: Color = Color::Rgb(44, 46, 51);
const SIDEBAR_WIDTH: u16 = 26;

/// Everything a frame needs, borrowed from the app for one draw.
pub struct Screen<'a> {
    pub state: &'a ChatState,
    pub input: &'a str,
    pub cursor_position: usize,
    pub blink_on: bool,
}

pub fn ui(f: &mut Frame, screen: &Screen) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(1)])
        .split(f.area());

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Status line
            Constraint::Min(1),    // Messages
            Constraint::Length(3), // Input box
        ])
        .split(columns[1]);

    render_sidebar(f, screen.state, columns[0]);
    render_status(f, screen.state, rows[0]);
    render_chat(f, screen, rows[1]);
    render_input(f, screen, rows[2]);
}

fn render_sidebar(f: &mut Frame, state: &ChatState, area: Rect) {
    let mut lines = vec![chat_entry("+ New chat", state.chat_id == UNKNOWN_CHAT_ID)];
    for chat in state.cache.chats().unwrap_or(&[]) {
        let marker = if chat.is_system() { "⚙" } else { "#" };
        let short_id: String = chat.id.chars().take(8).collect();
        lines.push(chat_entry(
            &format!("{} {}", marker, short_id),
            chat.id == state.chat_id,
        ));
    }

    let sidebar = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::RIGHT)
            .title("Chats (Ctrl-↑↓)"),
    );
    f.render_widget(sidebar, area);
}

fn chat_entry(label: &str, active: bool) -> Line<'static> {
    let style = if active {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    Line::from(Span::styled(label.to_string(), style))
}

fn render_status(f: &mut Frame, state: &ChatState, area: Rect) {
    let (text, color) = if let Some(error) = &state.error {
        (format!("● Error: {}", error), Color::Red)
    } else if state.wait_for_reply() {
        let text = match state.reply() {
            Some(draft) if !draft.content.is_empty() => "● Receiving reply...",
            _ => "● Waiting for reply...",
        };
        (text.to_string(), Color::Yellow)
    } else if state.is_loading() {
        ("● Saving...".to_string(), Color::Yellow)
    } else {
        let system = match state.current_chat() {
            Some(chat) if chat.is_system() => " (system prompt set)",
            _ => "",
        };
        (format!("● Ready{}", system), Color::Green)
    };
    f.render_widget(
        Paragraph::new(Line::from(Span::styled(text, Style::default().fg(color)))),
        area,
    );
}

fn render_chat(f: &mut Frame, screen: &Screen, area: Rect) {
    let state = screen.state;
    let messages = state.messages();

    if messages.is_empty() {
        if !state.is_loading() && state.is_loaded() {
            render_empty_hint(f, area);
        }
        return;
    }

    let typing = state.typing_message();
    let all_lines = message_lines(
        messages,
        typing.as_ref(),
        screen.blink_on,
        area.width as usize,
    );

    // Rows are already wrapped, so the offset counts screen rows.
    let total_lines = all_lines.len();
    let visible_height = area.height as usize;

    let start_line = if total_lines > visible_height {
        let max_scroll = total_lines.saturating_sub(visible_height);
        let actual_scroll = state.scroll_offset.min(max_scroll);
        max_scroll.saturating_sub(actual_scroll)
    } else {
        0
    };
    let end_line = (start_line + visible_height).min(total_lines);
    let visible_lines: Vec<Line> = all_lines[start_line..end_line].to_vec();

    let chat = Paragraph::new(visible_lines).block(Block::default().borders(Borders::NONE));
    f.render_widget(chat, area);
}

fn render_empty_hint(f: &mut Frame, area: Rect) {
    let padding = area.height.saturating_sub(1) / 2;
    let mut lines: Vec<Line> = (0..padding).map(|_| Line::from("")).collect();
    lines.push(Line::from(Span::styled(
        EMPTY_CHAT_HINT,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    let hint = Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(hint, area);
}

/// Lays out the message bubbles, followed by the typing bubble if a reply
/// is pending, as rows wrapped to `width`. Every second bubble gets a darker
/// background.
pub fn message_lines(
    messages: &[Message],
    typing: Option<&Message>,
    blink_on: bool,
    width: usize,
) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let bubbles = messages
        .iter()
        .map(|m| (m, false))
        .chain(typing.map(|m| (m, true)));

    for (index, (message, is_typing)) in bubbles.enumerate() {
        let background = if index % 2 == 1 {
            Style::default().bg(EVEN_ROW_BG)
        } else {
            Style::default()
        };
        lines.extend(bubble_lines(message, is_typing, blink_on, width, background));
    }
    lines
}

fn avatar(role: MessageRole) -> Span<'static> {
    let (label, color) = match role {
        MessageRole::User => (" You ", Color::Cyan),
        MessageRole::Assistant | MessageRole::System => (" GPT ", Color::Green),
    };
    Span::styled(
        label,
        Style::default()
            .fg(Color::Black)
            .bg(color)
            .add_modifier(Modifier::BOLD),
    )
}

fn bubble_lines(
    message: &Message,
    typing: bool,
    blink_on: bool,
    width: usize,
    background: Style,
) -> Vec<Line<'static>> {
    let mut lines = vec![Line::from(""), Line::from(avatar(message.role))];

    if typing && message.content.is_empty() {
        let cursor = if blink_on { "█" } else { " " };
        lines.push(Line::from(Span::styled(
            cursor,
            Style::default().fg(Color::DarkGray),
        )));
    } else {
        let mut content: Vec<String> = message.content.lines().map(str::to_string).collect();
        if content.is_empty() {
            content.push(String::new());
        }
        if typing {
            if let Some(last) = content.last_mut() {
                last.push('▌');
            }
        }
        let options = textwrap::Options::new(width.max(1)).break_words(true);
        for line in &content {
            lines.extend(
                textwrap::wrap(line, &options)
                    .into_iter()
                    .map(|row| Line::from(row.into_owned())),
            );
        }
    }

    lines.into_iter().map(|line| line.style(background)).collect()
}

fn placeholder() -> String {
    let commands: Vec<String> = builtin_prompts()
        .map(|(name, _)| format!("/{}", name))
        .collect();
    format!(
        "Type your message. Commands: /system <prompt>, /reset, {}",
        commands.join(", ")
    )
}

fn render_input(f: &mut Frame, screen: &Screen, area: Rect) {
    let (input_text, style) = if screen.input.is_empty() {
        (placeholder(), Style::default().fg(Color::DarkGray))
    } else {
        (screen.input.to_string(), Style::default())
    };

    let title = if screen.state.is_loading() {
        "Input (working...)"
    } else {
        "Input (Enter to send, Ctrl-N new chat, Ctrl-Q quit)"
    };

    let input = Paragraph::new(input_text)
        .style(style)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(Color::White)),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(input, area);

    if !screen.input.is_empty() {
        let typed = screen.input[..screen.cursor_position].chars().count() as u16;
        let cursor_x = area.x + typed + 1;
        let cursor_y = area.y + 1;
        let last_column = area.x + area.width.saturating_sub(2);
        f.set_cursor_position((cursor_x.min(last_column), cursor_y));
    }
}
