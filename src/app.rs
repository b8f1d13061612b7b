//! Voice Recorder window

use eframe::egui;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::audio::{self, CpalCapture};
use crate::producer::{PendingRecord, RecordProducer};
use crate::records::RecordStore;
use crate::settings::{AppSettings, SettingsError};

enum AppMessage {
    Saved(PathBuf),
    Failed(String),
}

#[derive(PartialEq, Clone, Copy)]
enum AppState {
    Ready,
    Recording,
    QuickRecording,
    Saving,
}

/// What a row of the records list asked for during this frame
enum RowAction {
    BeginRename(String),
    CommitRename,
    CancelRename,
    AskDelete(String),
}

struct Rename {
    original: String,
    edited: String,
}

pub struct VoiceRecorderApp {
    state: AppState,
    status_message: String,
    recording_start_time: Option<Instant>,

    settings: AppSettings,
    producer: RecordProducer<CpalCapture>,
    store: RecordStore,

    records: Vec<String>,
    renaming: Option<Rename>,
    pending_delete: Option<String>,
    input_devices: Vec<String>,
    show_devices: bool,

    /// Thread finishing the last stopped take; joined before exit
    saver: Option<JoinHandle<()>>,
    message_rx: Receiver<AppMessage>,
    message_tx: Sender<AppMessage>,
}

impl VoiceRecorderApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, settings: AppSettings, records_dir: PathBuf) -> Self {
        let (message_tx, message_rx) = channel();

        let producer = RecordProducer::new(CpalCapture, settings.recorder.clone(), records_dir.clone());
        let input_devices = audio::list_input_devices().unwrap_or_else(|e| {
            tracing::warn!("Could not list input devices: {}", e);
            Vec::new()
        });

        let mut app = Self {
            state: AppState::Ready,
            status_message: "Ready".to_string(),
            recording_start_time: None,
            settings,
            producer,
            store: RecordStore::new(records_dir),
            records: Vec::new(),
            renaming: None,
            pending_delete: None,
            input_devices,
            show_devices: false,
            saver: None,
            message_rx,
            message_tx,
        };
        app.list_records();
        app
    }

    fn start_recording(&mut self) {
        if self.state != AppState::Ready {
            return;
        }

        match self.producer.start_recording() {
            Ok(()) => {
                self.state = AppState::Recording;
                self.recording_start_time = Some(Instant::now());
                self.status_message = "Recording...".to_string();
            }
            Err(e) => {
                self.status_message = format!("Mic Error: {}", e);
            }
        }
    }

    fn start_quick_recording(&mut self) {
        if self.state != AppState::Ready {
            return;
        }

        match self.producer.start_timed_recording() {
            Ok(()) => {
                self.state = AppState::QuickRecording;
                self.recording_start_time = Some(Instant::now());
                self.status_message = format!("Recording {} s...", self.producer.settings().duration);
            }
            Err(e) => {
                self.status_message = format!("Mic Error: {}", e);
            }
        }
    }

    fn stop_recording(&mut self, ctx: &egui::Context) {
        if !matches!(self.state, AppState::Recording | AppState::QuickRecording) {
            return;
        }

        match self.producer.stop_recording() {
            Ok(pending) => self.await_record(pending, ctx),
            Err(e) => {
                self.status_message = format!("Error: {}", e);
                self.state = AppState::Ready;
            }
        }
    }

    /// Waits for the worker off the UI thread and reports back over the channel.
    fn await_record(&mut self, pending: PendingRecord, ctx: &egui::Context) {
        self.state = AppState::Saving;
        self.recording_start_time = None;
        self.status_message = "Saving...".to_string();

        let tx = self.message_tx.clone();
        let ctx = ctx.clone();
        let spawned = pending.wait_in_background(move |result| {
            let message = match result {
                Ok(path) => AppMessage::Saved(path),
                Err(e) => AppMessage::Failed(e.to_string()),
            };
            let _ = tx.send(message);
            ctx.request_repaint();
        });

        match spawned {
            Ok(saver) => self.saver = Some(saver),
            Err(e) => {
                self.status_message = format!("Error: {}", e);
                self.state = AppState::Ready;
            }
        }
    }

    /// Reports a worker that ended on its own: a timed take that is done, or
    /// a start that failed to open the device.
    fn poll_finished_worker(&mut self, ctx: &egui::Context) {
        if !matches!(self.state, AppState::Recording | AppState::QuickRecording) {
            return;
        }
        if let Some(pending) = self.producer.take_finished() {
            self.await_record(pending, ctx);
        }
    }

    fn process_messages(&mut self) {
        while let Ok(msg) = self.message_rx.try_recv() {
            match msg {
                AppMessage::Saved(path) => {
                    let name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    self.status_message = format!("Saved {}", name);
                    self.list_records();
                }
                AppMessage::Failed(error) => {
                    self.status_message = format!("Error: {}", error);
                }
            }
            self.state = AppState::Ready;
            if let Some(saver) = self.saver.take() {
                let _ = saver.join();
            }
        }
    }

    fn list_records(&mut self) {
        match self.store.list() {
            Ok(records) => self.records = records,
            Err(e) => {
                self.records.clear();
                self.status_message = format!("Error: {}", e);
            }
        }
    }

    fn commit_rename(&mut self) {
        let Some(rename) = self.renaming.take() else {
            return;
        };
        match self.store.rename(&rename.original, rename.edited.trim()) {
            Ok(new_name) => self.status_message = format!("Renamed to {}", new_name),
            Err(e) => self.status_message = format!("Error: {}", e),
        }
        self.list_records();
    }

    fn confirm_delete(&mut self, name: &str) {
        match self.store.delete(name) {
            Ok(()) => self.status_message = format!("Deleted {}", name),
            Err(e) => self.status_message = format!("Error: {}", e),
        }
        self.list_records();
    }

    fn show_settings(&mut self) {
        let result = AppSettings::settings_path().and_then(|path| {
            if !path.exists() {
                self.settings.save()?;
            }
            open_in_system(&path, true).map_err(SettingsError::from)
        });
        if let Err(e) = result {
            self.status_message = format!("Could not open settings: {}", e);
        }
    }

    fn reload_settings(&mut self) {
        let settings = AppSettings::load();
        let records_dir = match settings.records_dir() {
            Ok(dir) => dir,
            Err(e) => {
                self.status_message = format!("Error: {}", e);
                return;
            }
        };

        match self.producer.reconfigure(settings.recorder.clone(), records_dir.clone()) {
            Ok(()) => {
                self.settings = settings;
                self.store = RecordStore::new(records_dir);
                self.status_message = "Settings reloaded".to_string();
                self.list_records();
            }
            Err(e) => self.status_message = format!("Error: {}", e),
        }
    }

    fn menu_bar(&mut self, ui: &mut egui::Ui) {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("Settings", |ui| {
                if ui.button("Open Settings File").clicked() {
                    self.show_settings();
                    ui.close_menu();
                }
                if ui.button("Reload Settings").clicked() {
                    self.reload_settings();
                    ui.close_menu();
                }
                if ui.button("Open Records Folder").clicked() {
                    if let Err(e) = open_in_system(self.store.dir(), false) {
                        self.status_message = format!("Could not open folder: {}", e);
                    }
                    ui.close_menu();
                }
                ui.separator();
                ui.checkbox(&mut self.show_devices, "Show Input Devices");
            });
        });
    }

    fn records_list(&mut self, ui: &mut egui::Ui) {
        let mut action = None;

        egui::ScrollArea::vertical().max_height(280.0).show(ui, |ui| {
            if self.records.is_empty() {
                ui.label("No audio records found in the selected directory.");
            }

            for record in &self.records {
                ui.horizontal(|ui| match &mut self.renaming {
                    Some(rename) if &rename.original == record => {
                        let response = ui.text_edit_singleline(&mut rename.edited);
                        if ui.button("Save").clicked()
                            || (response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)))
                        {
                            action = Some(RowAction::CommitRename);
                        }
                        if ui.button("Cancel").clicked() {
                            action = Some(RowAction::CancelRename);
                        }
                    }
                    _ => {
                        ui.add_sized([260.0, 18.0], egui::Label::new(record.as_str()).truncate());
                        if ui.button("Rename").clicked() {
                            action = Some(RowAction::BeginRename(record.clone()));
                        }
                        if ui.button("Delete").clicked() {
                            action = Some(RowAction::AskDelete(record.clone()));
                        }
                    }
                });
            }
        });

        match action {
            Some(RowAction::BeginRename(name)) => {
                self.renaming = Some(Rename { edited: name.clone(), original: name });
            }
            Some(RowAction::CommitRename) => self.commit_rename(),
            Some(RowAction::CancelRename) => self.renaming = None,
            Some(RowAction::AskDelete(name)) => self.pending_delete = Some(name),
            None => {}
        }
    }

    fn delete_prompt(&mut self, ctx: &egui::Context) {
        let Some(name) = self.pending_delete.clone() else {
            return;
        };

        let mut answer = None;
        egui::Window::new("Confirm Delete")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!("Are you sure you want to delete {}?", name));
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.button("Yes").clicked() {
                        answer = Some(true);
                    }
                    if ui.button("No").clicked() {
                        answer = Some(false);
                    }
                });
            });

        match answer {
            Some(true) => {
                self.pending_delete = None;
                self.confirm_delete(&name);
            }
            Some(false) => self.pending_delete = None,
            None => {}
        }
    }
}

impl eframe::App for VoiceRecorderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_messages();
        self.poll_finished_worker(ctx);
        if self.state != AppState::Ready || self.producer.is_recording() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        egui::TopBottomPanel::top("menu").show(ctx, |ui| self.menu_bar(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            let capturing = matches!(self.state, AppState::Recording | AppState::QuickRecording);

            ui.horizontal(|ui| {
                if ui
                    .add_enabled(self.state == AppState::Ready, egui::Button::new("Start Recording"))
                    .clicked()
                {
                    self.start_recording();
                }
                if ui.add_enabled(capturing, egui::Button::new("Stop Recording")).clicked() {
                    self.stop_recording(ctx);
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let (rect, _) = ui.allocate_exact_size(egui::vec2(20.0, 20.0), egui::Sense::hover());
                    let color = if capturing { egui::Color32::GREEN } else { egui::Color32::RED };
                    ui.painter().circle_filled(rect.center(), 8.0, color);
                });
            });

            let quick_label = format!("Quick Record ({} s)", self.producer.settings().duration);
            if ui
                .add_enabled(self.state == AppState::Ready, egui::Button::new(quick_label))
                .clicked()
            {
                self.start_quick_recording();
            }

            ui.add_space(6.0);
            let status = match (self.state, self.recording_start_time) {
                (AppState::Recording | AppState::QuickRecording, Some(start)) => {
                    format!("{} {:.0} s", self.status_message, start.elapsed().as_secs_f32())
                }
                _ => self.status_message.clone(),
            };
            ui.label(egui::RichText::new(status).strong());

            if self.show_devices {
                ui.add_space(6.0);
                ui.group(|ui| {
                    ui.label(egui::RichText::new("Input devices").small());
                    if self.input_devices.is_empty() {
                        ui.label("None found");
                    }
                    for device in &self.input_devices {
                        ui.label(device);
                    }
                });
            }

            ui.add_space(10.0);
            ui.separator();
            ui.label(
                egui::RichText::new(self.store.dir().display().to_string())
                    .small()
                    .weak(),
            );
            self.records_list(ui);

            ui.add_space(10.0);
            if ui.button("Refresh").clicked() {
                self.list_records();
            }
        });

        self.delete_prompt(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        // Keep whatever was captured when the window closes mid-recording.
        if matches!(self.state, AppState::Recording | AppState::QuickRecording) {
            match self.producer.stop_and_wait() {
                Ok(path) => tracing::info!(path = %path.display(), "Saved recording on exit"),
                Err(e) => tracing::error!("Could not save recording on exit: {}", e),
            }
        }
        // A take stopped just before closing may still be writing.
        if let Some(saver) = self.saver.take() {
            if saver.join().is_err() {
                tracing::error!("Record saver panicked during exit");
            }
        }
    }
}

/// Opens `path` with the platform's default handler; `as_text` forces a text editor.
fn open_in_system(path: &Path, as_text: bool) -> io::Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        Command::new(if as_text { "notepad.exe" } else { "explorer" })
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        if as_text {
            command.arg("-t");
        }
        command
    } else {
        Command::new("xdg-open")
    };

    command.arg(path).spawn()?;
    Ok(())
}
