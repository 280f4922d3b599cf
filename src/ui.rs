use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame,
};

use crate::app::{App, InputMode, Sender};

/// Naive triple-backtick splitting: segments between ``` fences render in
/// a code style, everything else is plain text. No further markdown.
fn message_lines(text: &str) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let code_style = Style::default().fg(Color::Green);

    for (index, part) in text.split("```").enumerate() {
        if index % 2 == 1 {
            // Code block; drop the language line's leading newline
            let part = part.strip_prefix('\n').unwrap_or(part);
            for line in part.lines() {
                lines.push(Line::from(Span::styled(line.to_string(), code_style)));
            }
        } else {
            for line in part.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let attach_height = if app.attachments.is_empty() { 0 } else { 1 };
    let [header_area, transcript_area, attach_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(attach_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_transcript(app, frame, transcript_area);
    if attach_height > 0 {
        render_attachments(app, frame, attach_area);
    }
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    // Popups, innermost first
    if app.show_attach_input {
        render_attach_popup(app, frame, area);
    } else if app.delete_confirm.is_some() {
        render_delete_confirm(app, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let model = if app.selected_model.is_empty() {
        "sem modelo".to_string()
    } else {
        app.selected_model.clone()
    };

    let title = Line::from(vec![
        Span::styled(" Conversa ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!(" {model} "), Style::default().fg(Color::White)),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    // Inner size for wrap/scroll math, before building the text
    app.transcript_height = area.height.saturating_sub(2);
    app.transcript_width = area.width.saturating_sub(2);

    let mut lines: Vec<Line<'static>> = Vec::new();
    let last = app.transcript.len().saturating_sub(1);

    for (i, entry) in app.transcript.iter().enumerate() {
        match entry.sender {
            Sender::User => {
                lines.push(Line::from(Span::styled(
                    "Você:",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                )));
            }
            Sender::Model => {
                lines.push(Line::from(Span::styled(
                    "IA:",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                )));
            }
        }

        if entry.text.is_empty() {
            if app.streaming && i == last {
                // Animated ellipsis while the first fragment is pending
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Pensando{dots}"),
                    Style::default()
                        .fg(Color::DarkGray)
                        .add_modifier(Modifier::ITALIC),
                )));
            } else {
                lines.push(Line::default());
            }
        } else {
            lines.extend(message_lines(&entry.text));
        }
        lines.push(Line::default());
    }

    let transcript = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.transcript_scroll, 0));

    frame.render_widget(transcript, area);
}

fn render_attachments(app: &App, frame: &mut Frame, area: Rect) {
    let names: Vec<String> = app
        .attachments
        .iter()
        .map(|attachment| attachment.name.clone())
        .collect();

    let strip = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Anexos ({}): ", names.len()),
            Style::default().fg(Color::Magenta).bold(),
        ),
        Span::raw(names.join(", ")),
    ]));
    frame.render_widget(strip, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let border_color = match app.input_mode {
        InputMode::Editing => Color::Yellow,
        InputMode::Normal => Color::DarkGray,
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Mensagem (Enter envia) ");

    // Horizontal scroll keeps the cursor visible in a single-line box
    let inner_width = area.width.saturating_sub(2) as usize;
    let scroll_offset = if inner_width == 0 {
        0
    } else if app.cursor >= inner_width {
        app.cursor - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);
    frame.render_widget(input, area);

    if app.input_mode == InputMode::Editing {
        let cursor_x = (app.cursor - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match app.input_mode {
        InputMode::Editing => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" enviar ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" comandos ", label_style),
        ],
        InputMode::Normal => vec![
            Span::styled(" i ", key_style),
            Span::styled(" escrever ", label_style),
            Span::styled(" m ", key_style),
            Span::styled(" modelos ", label_style),
            Span::styled(" a ", key_style),
            Span::styled(" anexar ", label_style),
            Span::styled(" n ", key_style),
            Span::styled(" nova conversa ", label_style),
            Span::styled(" j/k ", key_style),
            Span::styled(" rolar ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" sair ", label_style),
        ],
    };

    frame.render_widget(Paragraph::new(Line::from(hints)), area);
}

fn centered_popup(area: Rect, width: u16, height: u16) -> Rect {
    let popup_width = width.min(area.width.saturating_sub(4));
    let popup_height = height.min(area.height.saturating_sub(4));
    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;
    Rect::new(popup_x, popup_y, popup_width, popup_height)
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 48, app.available_models.len() as u16 + 2);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Modelos (Enter seleciona, d deleta, Esc fecha) ");

    let items: Vec<ListItem> = app
        .available_models
        .iter()
        .map(|model| {
            let style = if model == &app.selected_model {
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {model} ")).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}

fn render_delete_confirm(app: &App, frame: &mut Frame, area: Rect) {
    let Some(name) = app.delete_confirm.as_deref() else {
        return;
    };

    let popup_area = centered_popup(area, 56, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Deletar modelo ");

    let text = Text::from(vec![
        Line::from(format!("Tem certeza que deseja deletar {name}?")),
        Line::default(),
        Line::from(Span::styled(
            "s = sim    n/Esc = cancelar",
            Style::default().fg(Color::DarkGray),
        )),
    ]);

    let confirm = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
    frame.render_widget(confirm, popup_area);
}

fn render_attach_popup(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = centered_popup(area, 60, 7);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Anexar imagem ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Caminho do arquivo. Enter anexa, Esc cancela.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let input =
        Paragraph::new(app.attach_input.as_str()).style(Style::default().fg(Color::Cyan));
    frame.render_widget(input, input_area);

    let cursor_x = app.attach_cursor.min(input_area.width as usize) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));

    if let Some(error) = &app.attach_error {
        let error_line = Paragraph::new(error.as_str()).style(Style::default().fg(Color::Red));
        frame.render_widget(error_line, Rect::new(inner.x, inner.y + 4, inner.width, 1));
    }
}
