use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

use crate::app::{App, ChannelSink, InputMode, StreamEvent, MODELS_ERROR_MESSAGE};
use crate::attach;
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string edits
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(
    app: &mut App,
    event: AppEvent,
    stream_tx: &UnboundedSender<StreamEvent>,
) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key, stream_tx).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Tick => app.tick_animation(),
    }
    Ok(())
}

async fn handle_key(
    app: &mut App,
    key: KeyEvent,
    stream_tx: &UnboundedSender<StreamEvent>,
) -> Result<()> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    // Popups capture all input while open
    if app.show_attach_input {
        handle_attach_input(app, key);
        return Ok(());
    }
    if app.delete_confirm.is_some() {
        handle_delete_confirm(app, key).await;
        return Ok(());
    }
    if app.show_model_picker {
        handle_model_picker(app, key);
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key).await,
        InputMode::Editing => handle_editing_mode(app, key, stream_tx),
    }
    Ok(())
}

async fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Back to typing
        KeyCode::Char('i') | KeyCode::Enter => {
            app.input_mode = InputMode::Editing;
            app.cursor = app.input.chars().count();
        }

        // Transcript scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
        KeyCode::Char('g') => app.transcript_scroll = 0,
        KeyCode::Char('G') => app.scroll_to_bottom(),

        // New chat clears the transcript; blocked mid-stream so the
        // in-flight response has somewhere to land
        KeyCode::Char('n') => {
            if app.chat_task.is_none() {
                app.new_chat();
            }
        }

        // Model picker
        KeyCode::Char('m') => open_model_picker(app).await,

        // Image attachment
        KeyCode::Char('a') => {
            app.show_attach_input = true;
            app.attach_input.clear();
            app.attach_cursor = 0;
            app.attach_error = None;
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent, stream_tx: &UnboundedSender<StreamEvent>) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            if let Some(request) = app.begin_exchange() {
                let client = app.client.clone();
                let tx = stream_tx.clone();
                app.chat_task = Some(tokio::spawn(async move {
                    let mut sink = ChannelSink::new(tx.clone());
                    if let Err(err) = client.chat(&request, &mut sink).await {
                        error!(%err, "chat request failed");
                        let _ = tx.send(StreamEvent::Failed(err.to_string()));
                    }
                    let _ = tx.send(StreamEvent::Done);
                }));
            }
        }
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

async fn open_model_picker(app: &mut App) {
    match app.client.list_models().await {
        Ok(models) => {
            app.available_models = models;
            if app.available_models.is_empty() {
                app.push_model_message(crate::app::NO_MODELS_MESSAGE);
                return;
            }
            let current_idx = app
                .available_models
                .iter()
                .position(|m| m == &app.selected_model)
                .unwrap_or(0);
            app.model_picker_state.select(Some(current_idx));
            app.show_model_picker = true;
        }
        Err(err) => {
            error!(%err, "failed to fetch model list");
            app.push_model_message(MODELS_ERROR_MESSAGE);
        }
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.show_model_picker = false,
        KeyCode::Char('j') | KeyCode::Down => app.model_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.model_picker_nav_up(),
        KeyCode::Enter => app.select_model(),
        KeyCode::Char('d') => {
            app.delete_confirm = app.picked_model().cloned();
        }
        _ => {}
    }
}

async fn handle_delete_confirm(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('s') | KeyCode::Char('y') | KeyCode::Enter => {
            if let Some(name) = app.delete_confirm.take() {
                // Fire-and-forget: a failure is logged, never fatal
                if let Err(err) = app.client.delete_model(&name).await {
                    warn!(%err, model = %name, "model delete failed");
                }
                match app.client.list_models().await {
                    Ok(models) => {
                        app.available_models = models;
                        if app.available_models.is_empty() {
                            app.show_model_picker = false;
                            app.push_model_message(crate::app::NO_MODELS_MESSAGE);
                        } else {
                            let last = app.available_models.len() - 1;
                            let i = app.model_picker_state.selected().unwrap_or(0).min(last);
                            app.model_picker_state.select(Some(i));
                        }
                    }
                    Err(err) => {
                        error!(%err, "failed to refresh model list after delete");
                        app.show_model_picker = false;
                    }
                }
            }
        }
        KeyCode::Char('n') | KeyCode::Esc => {
            app.delete_confirm = None;
        }
        _ => {}
    }
}

fn handle_attach_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_attach_input = false;
            app.attach_input.clear();
            app.attach_error = None;
        }
        KeyCode::Enter => {
            if app.attach_input.trim().is_empty() {
                return;
            }
            match attach::load_image(&app.attach_input) {
                Ok(attachment) => {
                    app.attachments.push(attachment);
                    app.show_attach_input = false;
                    app.attach_input.clear();
                    app.attach_cursor = 0;
                    app.attach_error = None;
                }
                Err(err) => {
                    warn!(%err, "attachment failed");
                    app.attach_error = Some(err.to_string());
                }
            }
        }
        KeyCode::Backspace => {
            if app.attach_cursor > 0 {
                app.attach_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.attach_input, app.attach_cursor);
                app.attach_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.attach_cursor = app.attach_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.attach_input.chars().count();
            app.attach_cursor = (app.attach_cursor + 1).min(char_count);
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.attach_input, app.attach_cursor);
            app.attach_input.insert(byte_pos, c);
            app.attach_cursor += 1;
        }
        _ => {}
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollDown => {
            app.scroll_down();
            app.scroll_down();
            app.scroll_down();
        }
        MouseEventKind::ScrollUp => {
            app.scroll_up();
            app.scroll_up();
            app.scroll_up();
        }
        _ => {}
    }
}
