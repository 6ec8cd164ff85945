//! Finch Desktop: egui app state and UI.
//!
//! The UI thread owns the [`Reconciler`]; each turn runs on a dispatcher worker thread and its
//! events are drained here once per frame.

use eframe::egui;
use lib::config::{self, Config};
use lib::dispatch::{Dispatcher, TurnEvent};
use lib::reconcile::{EntryKind, Reconciler, Submission, ViewEntry, ViewMode};
use lib::session::Role;
use lib::transcript::{self, ThemeMode, TranscriptEntry, TranscriptStore};
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::time::Duration;

const CHAT_INPUT_HEIGHT: f32 = 90.0;
const CHAT_MESSAGES_MIN_HEIGHT: f32 = 80.0;
const HISTORY_PANEL_WIDTH: f32 = 240.0;

/// Sidebar clicks, applied after the panel is drawn.
enum HistoryAction {
    NewChat,
    Open(String),
    AskDelete(TranscriptEntry),
}

pub struct FinchApp {
    config: Config,
    config_path: PathBuf,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    /// When Some, a turn is in flight; its events arrive here.
    turn_receiver: Option<mpsc::Receiver<TurnEvent>>,
    chat_input: String,
    settings_open: bool,
    settings_api_key: String,
    settings_model: String,
    settings_error: Option<String>,
    /// Transcript waiting for the user to confirm deletion.
    pending_delete: Option<TranscriptEntry>,
}

impl FinchApp {
    /// Space between a panel title and the content below.
    const TITLE_BOTTOM_SPACING: f32 = 12.0;

    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let (config, config_path) = match config::load_config(None) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("failed to load config, using defaults: {:#}", e);
                (Config::default(), config::default_config_path())
            }
        };
        let history_dir = config::resolve_history_dir(&config, &config_path);
        log::info!("transcripts in {}", history_dir.display());

        let mode = ThemeMode::from_dark(config.is_dark_mode);
        apply_visuals(&cc.egui_ctx, mode);
        let reconciler = Reconciler::new(TranscriptStore::new(history_dir), mode);
        let dispatcher = Dispatcher::from_config(&config);
        let settings_open = config::resolve_api_key(&config).is_empty();

        log::info!("desktop started");
        Self {
            settings_api_key: config.api_key.clone(),
            settings_model: config.selected_model.clone(),
            config,
            config_path,
            dispatcher,
            reconciler,
            turn_receiver: None,
            chat_input: String::new(),
            settings_open,
            settings_error: None,
            pending_delete: None,
        }
    }

    /// Drain worker events. Call each frame.
    fn poll_turn(&mut self) {
        let Some(rx) = &self.turn_receiver else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    self.reconciler.apply(event);
                    if terminal {
                        self.turn_receiver = None;
                        return;
                    }
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    log::error!("turn worker exited without a result");
                    self.reconciler.worker_lost();
                    self.turn_receiver = None;
                    return;
                }
            }
        }
    }

    fn send(&mut self) {
        let text = std::mem::take(&mut self.chat_input);
        match self.reconciler.submit(&text) {
            Submission::Send(turn) => {
                let request =
                    Dispatcher::request_from_config(&self.config, turn.messages, turn.session_id);
                self.turn_receiver = Some(self.dispatcher.spawn(request));
            }
            // Whatever is still in flight belongs to the cleared conversation.
            Submission::Reset => self.turn_receiver = None,
            Submission::Busy => self.chat_input = text,
            Submission::Ignored | Submission::Help => {}
        }
    }

    fn new_chat(&mut self) {
        self.turn_receiver = None;
        self.reconciler.reset();
    }

    fn open_transcript(&mut self, file_name: &str) {
        match self.reconciler.open_transcript(file_name) {
            Ok(()) => self.turn_receiver = None,
            Err(e) => self
                .reconciler
                .push_notice(format!("Could not open {}: {}", file_name, e)),
        }
    }

    fn delete_transcript(&mut self, entry: &TranscriptEntry) {
        if let Err(e) = self.reconciler.delete_transcript(&entry.file_name) {
            self.reconciler
                .push_notice(format!("Could not delete {}: {}", entry.title, e));
        }
    }

    fn set_dark_mode(&mut self, ctx: &egui::Context, dark: bool) {
        let mode = ThemeMode::from_dark(dark);
        self.config.is_dark_mode = dark;
        apply_visuals(ctx, mode);
        self.reconciler.set_mode(mode);
        if let Err(e) = config::save_config(&self.config, &self.config_path) {
            log::error!("failed to save config: {:#}", e);
        }
    }

    fn save_settings(&mut self) {
        self.config.api_key = self.settings_api_key.trim().to_string();
        self.config.selected_model = self.settings_model.clone();
        match config::save_config(&self.config, &self.config_path) {
            Ok(()) => {
                log::info!("settings saved, model: {}", self.config.selected_model);
                self.settings_error = None;
                self.settings_open = false;
                self.reconciler.settings_saved();
            }
            Err(e) => {
                log::error!("failed to save settings: {:#}", e);
                self.settings_error = Some(format!("Could not save settings: {:#}", e));
            }
        }
    }

    fn ui_history(&mut self, ui: &mut egui::Ui) {
        let mut action = None;
        ui.add_space(16.0);
        ui.horizontal(|ui| {
            ui.heading("History");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("New chat").clicked() {
                    action = Some(HistoryAction::NewChat);
                }
            });
        });
        ui.add_space(Self::TITLE_BOTTOM_SPACING);

        let shown = match self.reconciler.viewing() {
            ViewMode::Historical { file_name, .. } => Some(file_name.as_str()),
            ViewMode::Current => None,
        };
        let live = self.reconciler.conversation().transcript_file.as_deref();
        egui::ScrollArea::vertical().show(ui, |ui| {
            if self.reconciler.history().is_empty() {
                ui.label("No saved conversations yet.");
            }
            for entry in self.reconciler.history() {
                ui.horizontal(|ui| {
                    if ui.small_button("🗑").on_hover_text("Delete").clicked() {
                        action = Some(HistoryAction::AskDelete(entry.clone()));
                    }
                    let name = entry.file_name.as_str();
                    let selected = shown == Some(name) || (shown.is_none() && live == Some(name));
                    if ui.selectable_label(selected, &entry.title).clicked() {
                        action = Some(HistoryAction::Open(entry.file_name.clone()));
                    }
                });
            }
        });

        match action {
            Some(HistoryAction::NewChat) => self.new_chat(),
            Some(HistoryAction::Open(file_name)) => self.open_transcript(&file_name),
            Some(HistoryAction::AskDelete(entry)) => self.pending_delete = Some(entry),
            None => {}
        }
    }

    fn render_entry(ui: &mut egui::Ui, entry: &ViewEntry) {
        let is_user = entry.role == Role::User;
        let visuals = &ui.style().visuals;
        let frame = egui::Frame::none()
            .fill(if is_user {
                visuals.extreme_bg_color
            } else {
                visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        frame.show(ui, |ui| {
            ui.set_width(ui.available_width());
            match (entry.role, entry.kind) {
                (Role::User, _) => {
                    ui.label(egui::RichText::new(&entry.content).strong());
                }
                (_, EntryKind::Notice) => {
                    ui.colored_label(ui.visuals().warn_fg_color, &entry.content);
                }
                _ => {
                    ui.label(transcript::plain_text(&entry.content));
                }
            }
        });
    }

    fn ui_chat(&mut self, ui: &mut egui::Ui) {
        let row_height = ui.spacing().interact_size.y + 8.0;
        let bottom_height = CHAT_INPUT_HEIGHT + row_height + 24.0;
        let messages_height = (ui.available_height() - bottom_height).max(CHAT_MESSAGES_MIN_HEIGHT);

        if let ViewMode::Historical { file_name, .. } = self.reconciler.viewing() {
            ui.label(
                egui::RichText::new(format!(
                    "Viewing {}. Type a message to start a new conversation.",
                    transcript::title_for(file_name)
                ))
                .italics(),
            );
            ui.add_space(4.0);
        }

        egui::ScrollArea::vertical()
            .max_height(messages_height)
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for entry in self.reconciler.view() {
                    Self::render_entry(ui, entry);
                    ui.add_space(8.0);
                }
                if let Some(text) = self.reconciler.streaming_text() {
                    let partial = ViewEntry {
                        role: Role::Assistant,
                        content: if text.is_empty() {
                            "Thinking…".to_string()
                        } else {
                            text.to_string()
                        },
                        kind: EntryKind::Message,
                    };
                    Self::render_entry(ui, &partial);
                }
            });

        ui.add_space(8.0);
        let response = ui.add_sized(
            [ui.available_width(), CHAT_INPUT_HEIGHT],
            egui::TextEdit::multiline(&mut self.chat_input)
                .hint_text("Type a message, Ctrl+Enter to send. /help lists commands."),
        );
        ui.add_space(8.0);

        let mut send_now = false;
        ui.horizontal(|ui| {
            let busy = self.reconciler.is_busy();
            if ui
                .add_enabled(!busy, egui::Button::new("Send"))
                .clicked()
            {
                send_now = true;
            }
            if busy {
                ui.spinner();
            }
        });
        if response.has_focus() {
            let modifiers = ui.input(|i| i.modifiers);
            if (modifiers.command || modifiers.ctrl) && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                send_now = true;
            }
        }
        if send_now {
            self.send();
        }
    }

    fn ui_settings(&mut self, ctx: &egui::Context) {
        let mut open = self.settings_open;
        let mut save = false;
        let models: Vec<String> = self
            .dispatcher
            .registry()
            .names()
            .map(str::to_string)
            .collect();
        egui::Window::new("Settings")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                egui::Grid::new("settings_grid")
                    .num_columns(2)
                    .spacing([12.0, 8.0])
                    .show(ui, |ui| {
                        ui.label("API key");
                        ui.add(
                            egui::TextEdit::singleline(&mut self.settings_api_key)
                                .password(true)
                                .desired_width(280.0),
                        );
                        ui.end_row();

                        ui.label("Model");
                        let selected = if self.settings_model.is_empty() {
                            "Select a model"
                        } else {
                            self.settings_model.as_str()
                        };
                        egui::ComboBox::from_id_source("model_select")
                            .selected_text(selected.to_string())
                            .width(280.0)
                            .show_ui(ui, |ui| {
                                for m in &models {
                                    ui.selectable_value(&mut self.settings_model, m.clone(), m);
                                }
                            });
                        ui.end_row();
                    });
                if let Some(err) = &self.settings_error {
                    ui.add_space(8.0);
                    ui.colored_label(ui.visuals().error_fg_color, err);
                }
                ui.add_space(8.0);
                if ui.button("Save").clicked() {
                    save = true;
                }
            });
        self.settings_open = open;
        if save {
            self.save_settings();
        }
    }

    fn ui_confirm_delete(&mut self, ctx: &egui::Context) {
        let Some(entry) = self.pending_delete.clone() else {
            return;
        };
        let mut confirmed = false;
        let mut cancelled = false;
        egui::Window::new("Delete conversation")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!("Delete the conversation from {}?", entry.title));
                ui.label("This cannot be undone.");
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        confirmed = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancelled = true;
                    }
                });
            });
        if confirmed {
            self.pending_delete = None;
            self.delete_transcript(&entry);
        } else if cancelled {
            self.pending_delete = None;
        }
    }
}

fn apply_visuals(ctx: &egui::Context, mode: ThemeMode) {
    ctx.set_visuals(match mode {
        ThemeMode::Dark => egui::Visuals::dark(),
        ThemeMode::Light => egui::Visuals::light(),
    });
}

impl eframe::App for FinchApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_turn();

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_space(8.0);
            ui.horizontal(|ui| {
                ui.heading("Finch");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Settings").clicked() {
                        self.settings_open = true;
                    }
                    let mut dark = self.config.is_dark_mode;
                    if ui.checkbox(&mut dark, "Dark mode").changed() {
                        self.set_dark_mode(ctx, dark);
                    }
                    let model = if self.config.selected_model.is_empty() {
                        "no model selected"
                    } else {
                        self.config.selected_model.as_str()
                    };
                    ui.label(egui::RichText::new(model).weak());
                });
            });
            ui.add_space(8.0);
        });

        egui::SidePanel::left("history_panel")
            .resizable(false)
            .exact_width(HISTORY_PANEL_WIDTH)
            .show(ctx, |ui| self.ui_history(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(16.0, 8.0))
                .show(ui, |ui| self.ui_chat(ui));
        });

        if self.settings_open {
            self.ui_settings(ctx);
        }
        self.ui_confirm_delete(ctx);

        if self.turn_receiver.is_some() {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.reconciler.shutdown();
        if let Err(e) = config::save_config(&self.config, &self.config_path) {
            log::error!("failed to save config on exit: {:#}", e);
        }
    }
}
