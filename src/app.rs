use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, warn};

use crate::attach::Attachment;
use crate::config::Config;
use crate::ollama::{ChatRequest, OllamaClient};
use crate::stream::FragmentSink;

pub const WELCOME_MESSAGE: &str = "Selecione um modelo e inicie a conversa.";
pub const NO_MODELS_MESSAGE: &str =
    "Nenhum modelo encontrado. Baixe um modelo com \"ollama pull <nome_do_modelo>\" no terminal.";
pub const MODELS_ERROR_MESSAGE: &str =
    "Erro ao carregar modelos. Verifique se o Ollama está em execução.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Model,
}

/// One rendered message bubble. `text` is appended to while a response
/// streams in.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub sender: Sender,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Events forwarded from the streaming task to the UI loop.
#[derive(Debug)]
pub enum StreamEvent {
    Fragment { text: String, first: bool },
    Done,
    Failed(String),
}

/// Bridges the decoder's sink calls onto the UI event channel.
pub struct ChannelSink {
    tx: UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }
}

impl FragmentSink for ChannelSink {
    fn replace(&mut self, text: &str) {
        let _ = self.tx.send(StreamEvent::Fragment {
            text: text.to_string(),
            first: true,
        });
    }

    fn append(&mut self, text: &str) {
        let _ = self.tx.send(StreamEvent::Fragment {
            text: text.to_string(),
            first: false,
        });
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Transcript
    pub transcript: Vec<TranscriptEntry>,
    pub transcript_scroll: u16,
    pub transcript_height: u16, // inner chat area, set during render
    pub transcript_width: u16,

    // Input box
    pub input: String,
    pub cursor: usize, // char index into input

    // Pending image attachments, cleared when a message is sent
    pub attachments: Vec<Attachment>,

    // In-flight request (at most one). `response_index` pins the entry
    // fragments land on; informational messages may be pushed after it
    // while a response is still streaming.
    pub chat_task: Option<tokio::task::JoinHandle<()>>,
    pub response_index: Option<usize>,
    pub streaming: bool,
    pub animation_frame: u8,

    // Model picker
    pub selected_model: String,
    pub available_models: Vec<String>,
    pub show_model_picker: bool,
    pub model_picker_state: ListState,
    pub delete_confirm: Option<String>,

    // Attach popup
    pub show_attach_input: bool,
    pub attach_input: String,
    pub attach_cursor: usize,
    pub attach_error: Option<String>,

    pub client: OllamaClient,
}

impl App {
    pub fn new(client: OllamaClient, config: &Config) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            transcript: vec![TranscriptEntry {
                sender: Sender::Model,
                text: WELCOME_MESSAGE.to_string(),
            }],
            transcript_scroll: 0,
            transcript_height: 0,
            transcript_width: 0,

            input: String::new(),
            cursor: 0,

            attachments: Vec::new(),

            chat_task: None,
            response_index: None,
            streaming: false,
            animation_frame: 0,

            selected_model: config.default_model.clone().unwrap_or_default(),
            available_models: Vec::new(),
            show_model_picker: false,
            model_picker_state: ListState::default(),
            delete_confirm: None,

            show_attach_input: false,
            attach_input: String::new(),
            attach_cursor: 0,
            attach_error: None,

            client,
        }
    }

    /// Fetch the model list at startup. An empty list and a connection
    /// failure both degrade to a transcript message, never an exit.
    pub async fn load_models(&mut self) {
        match self.client.list_models().await {
            Ok(models) => {
                if models.is_empty() {
                    self.push_model_message(NO_MODELS_MESSAGE);
                } else if !models.contains(&self.selected_model) {
                    self.selected_model = models[0].clone();
                }
                self.available_models = models;
            }
            Err(err) => {
                error!(%err, "failed to load model list");
                self.push_model_message(MODELS_ERROR_MESSAGE);
            }
        }
    }

    pub fn push_model_message(&mut self, text: &str) {
        self.transcript.push(TranscriptEntry {
            sender: Sender::Model,
            text: text.to_string(),
        });
    }

    /// Validate and stage a new exchange: user bubble, empty model bubble,
    /// input and attachments cleared. Returns the request to send, or
    /// `None` when sending is not possible right now (empty prompt, no
    /// model, or a response still streaming).
    pub fn begin_exchange(&mut self) -> Option<ChatRequest> {
        let prompt = self.input.trim().to_string();
        if prompt.is_empty() || self.selected_model.is_empty() || self.chat_task.is_some() {
            return None;
        }

        self.transcript.push(TranscriptEntry {
            sender: Sender::User,
            text: prompt.clone(),
        });
        self.transcript.push(TranscriptEntry {
            sender: Sender::Model,
            text: String::new(),
        });
        self.response_index = Some(self.transcript.len() - 1);

        self.input.clear();
        self.cursor = 0;
        self.streaming = true;
        self.scroll_to_bottom();

        let images = std::mem::take(&mut self.attachments)
            .into_iter()
            .map(|attachment| attachment.data)
            .collect();

        Some(ChatRequest {
            model: self.selected_model.clone(),
            prompt,
            images,
        })
    }

    pub fn apply_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Fragment { text, first } => {
                if let Some(entry) = self.response_entry() {
                    if first {
                        entry.text = text;
                    } else {
                        entry.text.push_str(&text);
                    }
                }
                self.scroll_to_bottom();
            }
            StreamEvent::Done => {
                self.streaming = false;
                self.chat_task = None;
                self.response_index = None;
            }
            StreamEvent::Failed(message) => {
                if let Some(entry) = self.response_entry() {
                    entry.text = format!("Erro: {message}");
                }
                self.scroll_to_bottom();
            }
        }
    }

    fn response_entry(&mut self) -> Option<&mut TranscriptEntry> {
        self.response_index
            .and_then(|index| self.transcript.get_mut(index))
    }

    /// New-chat action: the whole transcript is cleared back to the
    /// welcome message.
    pub fn new_chat(&mut self) {
        self.transcript = vec![TranscriptEntry {
            sender: Sender::Model,
            text: WELCOME_MESSAGE.to_string(),
        }];
        self.response_index = None;
        self.transcript_scroll = 0;
    }

    pub fn tick_animation(&mut self) {
        if self.streaming {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Transcript scrolling
    pub fn scroll_down(&mut self) {
        let max = self
            .total_transcript_lines()
            .saturating_sub(self.transcript_height);
        if self.transcript_scroll < max {
            self.transcript_scroll += 1;
        }
    }

    pub fn scroll_up(&mut self) {
        self.transcript_scroll = self.transcript_scroll.saturating_sub(1);
    }

    pub fn scroll_to_bottom(&mut self) {
        let total = self.total_transcript_lines();
        self.transcript_scroll = total.saturating_sub(self.transcript_height);
    }

    /// Rendered line count of the transcript, accounting for wrapping, so
    /// scrolling can pin to the bottom. Mirrors how `ui::render` lays the
    /// text out: one role line, the wrapped content, one blank line.
    fn total_transcript_lines(&self) -> u16 {
        let wrap_width = if self.transcript_width > 0 {
            self.transcript_width as usize
        } else {
            50
        };

        let mut total: u16 = 0;
        for entry in &self.transcript {
            total += 1; // role line
            for line in entry.text.lines() {
                // Character count, not byte length; prompts are UTF-8
                let chars = line.chars().count();
                total += ((chars / wrap_width) + 1) as u16;
            }
            if entry.text.is_empty() {
                total += 1; // placeholder / "Pensando..." line
            }
            total += 1; // blank line after message
        }
        total
    }

    // Model picker navigation
    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn picked_model(&self) -> Option<&String> {
        self.model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i))
    }

    pub fn select_model(&mut self) {
        if let Some(model) = self.picked_model().cloned() {
            self.selected_model = model;
            self.show_model_picker = false;
            if let Err(err) = Config::save_default_model(&self.selected_model) {
                warn!(%err, "failed to save default model");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> App {
        let mut app = App::new(OllamaClient::new("http://localhost:11434"), &Config::new());
        app.selected_model = "llama3.2:latest".to_string();
        app
    }

    #[test]
    fn first_fragment_overwrites_placeholder() {
        let mut app = test_app();
        app.input = "oi".into();
        app.begin_exchange().unwrap();

        app.apply_stream_event(StreamEvent::Fragment {
            text: "Hel".into(),
            first: true,
        });
        app.apply_stream_event(StreamEvent::Fragment {
            text: "lo".into(),
            first: false,
        });

        assert_eq!(app.transcript.last().unwrap().text, "Hello");
        assert_eq!(app.transcript.last().unwrap().sender, Sender::Model);
    }

    #[test]
    fn begin_exchange_requires_prompt_and_model() {
        let mut app = test_app();
        app.input = "   ".into();
        assert!(app.begin_exchange().is_none());

        app.input = "oi".into();
        app.selected_model.clear();
        assert!(app.begin_exchange().is_none());
    }

    #[test]
    fn begin_exchange_takes_attachments() {
        let mut app = test_app();
        app.input = "o que tem na imagem?".into();
        app.attachments.push(Attachment {
            name: "foto.png".into(),
            data: "aGVsbG8=".into(),
        });

        let request = app.begin_exchange().unwrap();
        assert_eq!(request.images, vec!["aGVsbG8=".to_string()]);
        assert!(app.attachments.is_empty());
        assert!(app.input.is_empty());
    }

    #[test]
    fn transport_failure_is_surfaced_inline() {
        let mut app = test_app();
        app.input = "oi".into();
        app.begin_exchange().unwrap();

        app.apply_stream_event(StreamEvent::Failed("connection refused".into()));
        app.apply_stream_event(StreamEvent::Done);

        assert_eq!(
            app.transcript.last().unwrap().text,
            "Erro: connection refused"
        );
        assert!(!app.streaming);
    }

    #[test]
    fn fragments_land_on_the_response_entry_past_later_notices() {
        let mut app = test_app();
        app.input = "oi".into();
        app.begin_exchange().unwrap();

        app.apply_stream_event(StreamEvent::Fragment {
            text: "Hel".into(),
            first: true,
        });
        // e.g. the model list failing to refresh mid-stream
        app.push_model_message(MODELS_ERROR_MESSAGE);
        app.apply_stream_event(StreamEvent::Fragment {
            text: "lo".into(),
            first: false,
        });
        app.apply_stream_event(StreamEvent::Done);

        assert_eq!(app.transcript[2].text, "Hello");
        assert_eq!(app.transcript.last().unwrap().text, MODELS_ERROR_MESSAGE);
        assert!(app.response_index.is_none());
    }

    #[test]
    fn failure_overwrites_the_response_entry_not_a_later_notice() {
        let mut app = test_app();
        app.input = "oi".into();
        app.begin_exchange().unwrap();

        app.push_model_message(MODELS_ERROR_MESSAGE);
        app.apply_stream_event(StreamEvent::Failed("connection reset".into()));
        app.apply_stream_event(StreamEvent::Done);

        assert_eq!(app.transcript[2].text, "Erro: connection reset");
        assert_eq!(app.transcript.last().unwrap().text, MODELS_ERROR_MESSAGE);
    }

    #[test]
    fn new_chat_resets_to_welcome() {
        let mut app = test_app();
        app.input = "oi".into();
        app.begin_exchange().unwrap();
        app.apply_stream_event(StreamEvent::Fragment {
            text: "resposta".into(),
            first: true,
        });

        app.new_chat();
        assert_eq!(app.transcript.len(), 1);
        assert_eq!(app.transcript[0].text, WELCOME_MESSAGE);
    }
}
