use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use streamchat_core::{ChatMessage, ChatRole};

use crate::app::App;

const WELCOME_TITLE: &str = "Welcome to AI Chat";
const WELCOME_BODY: &str =
    "Start a conversation with the AI assistant. Ask questions, get information, or just chat!";

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;
    let mut plain = String::new();

    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        match after.find("**") {
            Some(end) if end > 0 => {
                plain.push_str(&rest[..start]);
                if !plain.is_empty() {
                    spans.push(Span::raw(std::mem::take(&mut plain)));
                }
                spans.push(Span::styled(
                    after[..end].to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ));
                rest = &after[end + 2..];
            }
            // No closing ** (or empty pair), treat as literal
            _ => {
                plain.push_str(&rest[..start + 2]);
                rest = after;
            }
        }
    }
    plain.push_str(rest);

    if !plain.is_empty() {
        spans.push(Span::raw(plain));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn user_label(has_avatar: bool) -> &'static str {
    if has_avatar {
        "You (\u{25c9}):"
    } else {
        "You:"
    }
}

/// Transcript lines as rendered, before wrapping
fn transcript_lines(
    messages: &[ChatMessage],
    has_avatar: bool,
    thinking_frame: Option<u8>,
) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();

    for msg in messages {
        match msg.role {
            ChatRole::User => {
                lines.push(Line::from(Span::styled(
                    user_label(has_avatar),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.lines() {
                    lines.push(Line::from(line.to_string()));
                }
            }
            ChatRole::Assistant => {
                lines.push(Line::from(Span::styled(
                    "AI:",
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )));
                for line in msg.content.lines() {
                    lines.push(parse_markdown_line(line));
                }
            }
        }
        lines.push(Line::default());
    }

    if let Some(frame) = thinking_frame {
        lines.push(Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((frame as usize % 3) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(3),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" AI Assistant ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            app.client.endpoint().to_string(),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(Paragraph::new(title), area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);
    if app.follow_tail {
        app.scroll_chat_to_bottom();
    }

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Chat ");

    let messages = app.conversation.transcript().messages();
    let chat_text = if messages.is_empty() && !app.is_loading() {
        Text::from(vec![
            Line::from(Span::styled(WELCOME_TITLE, Style::default().bold())),
            Line::from(Span::styled(WELCOME_BODY, Style::default().fg(Color::DarkGray))),
        ])
    } else {
        let thinking = app.awaiting_first_fragment().then_some(app.animation_frame);
        Text::from(transcript_lines(messages, app.profile_image.is_some(), thinking))
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let loading = app.is_loading();
    let (title, border) = if loading {
        (" Waiting for reply... (Esc to stop) ", Color::DarkGray)
    } else {
        (" Message (Enter to send) ", Color::Cyan)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title);

    let text = if app.input.is_empty() && !loading {
        Span::styled("Type your message...", Style::default().fg(Color::DarkGray))
    } else {
        let style = if loading {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        Span::styled(app.input.clone(), style)
    };

    // Keep the cursor in view on long input
    let inner_width = area.width.saturating_sub(2) as usize;
    let offset = app.input_cursor.saturating_sub(inner_width.saturating_sub(1));
    let input = Paragraph::new(Line::from(text))
        .block(block)
        .scroll((0, offset as u16));
    frame.render_widget(input, area);

    if !loading {
        let x = area.x + 1 + (app.input_cursor - offset) as u16;
        frame.set_cursor_position((x, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let line = match &app.notice {
        Some(notice) => {
            let color = if notice.is_error { Color::Red } else { Color::Yellow };
            Line::from(Span::styled(format!(" {} ", notice.text), Style::default().fg(color)))
        }
        None => Line::from(Span::styled(
            " Enter: send  Esc: stop/clear  PgUp/PgDn: scroll  Ctrl+C: quit ",
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(line), area);
}
