use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::assembler::{assemble, Termination};
use super::credentials::CredentialProvider;
use super::settings::{AppSettings, SettingsService};
use super::store::KeyValueStore;
use super::tree::{append_message, fork_edit, ConversationTree};
use crate::config::ROOMS_KEY;
use crate::models::{LlmModel, Message, Role, Room};
use crate::providers::traits::{CompletionTransport, ModelCatalog};
use crate::providers::types::{ChatMessage, ChatRequest, ProviderError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(&'static str),

    #[error("{0}")]
    Transport(#[from] ProviderError),

    #[error("Failed to save conversations: {0:#}")]
    Persistence(anyhow::Error),
}

impl SessionError {
    /// Whether the failure deserves a visible notification. Unknown ids and
    /// declined input are dropped quietly.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::Persistence(_))
    }
}

/// Which linear path of the current room is on screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Focus {
    #[default]
    Empty,
    Viewing(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub room_id: Option<String>,
    pub focus: Focus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStep {
    Next,
    Previous,
}

/// Ids committed by a completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub user_message_id: String,
    pub reply_id: String,
    pub termination: Termination,
}

/// Rooms, selection and the send pipeline.
///
/// Every mutation of the room collection is followed by a save of the whole
/// collection. A failed save is reported but the in-memory state stays.
pub struct ChatSession {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn CompletionTransport>,
    credentials: Arc<dyn CredentialProvider>,
    settings: AppSettings,
    catalog: Vec<LlmModel>,
    rooms: Vec<Room>,
    selection: Selection,
}

impl ChatSession {
    /// Restore rooms and settings from `store`. Nothing is selected yet.
    pub async fn load(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn CompletionTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let rooms = match store.load(ROOMS_KEY).await? {
            Some(json) => serde_json::from_str(&json).context("Stored conversations are unreadable")?,
            None => Vec::new(),
        };
        let settings = SettingsService::load(store.as_ref()).await;

        Ok(Self {
            store,
            transport,
            credentials,
            settings,
            catalog: Vec::new(),
            rooms,
            selection: Selection::default(),
        })
    }

    // --- Accessors ---

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &[LlmModel] {
        &self.catalog
    }

    pub fn current_room(&self) -> Option<&Room> {
        let id = self.selection.room_id.as_deref()?;
        self.rooms.iter().find(|r| r.id == id)
    }

    /// The materialized path for the current focus.
    pub fn visible_path(&self) -> Vec<&Message> {
        match (self.current_room(), &self.selection.focus) {
            (Some(room), Focus::Viewing(focus_id)) => {
                ConversationTree::new(&room.id, &room.messages).materialize_path(focus_id)
            }
            _ => Vec::new(),
        }
    }

    /// Siblings of `message_id` in the current room, by branch number.
    pub fn peers(&self, message_id: &str) -> Vec<&Message> {
        match self.current_room() {
            Some(room) => ConversationTree::new(&room.id, &room.messages).peers_of(message_id),
            None => Vec::new(),
        }
    }

    // --- Models and settings ---

    /// Fetch the model list once for the session.
    pub async fn refresh_catalog(&mut self, catalog: &dyn ModelCatalog) -> Result<usize, SessionError> {
        let models = catalog.list_models().await.map_err(|e| {
            tracing::error!("Failed to fetch model catalog: {}", e);
            SessionError::Transport(e)
        })?;
        self.catalog = models;
        Ok(self.catalog.len())
    }

    pub fn find_model(&self, id: &str) -> Option<&LlmModel> {
        self.catalog.iter().find(|m| m.id == id)
    }

    pub fn search_models(&self, query: &str) -> Vec<&LlmModel> {
        self.catalog.iter().filter(|m| m.matches(query)).collect()
    }

    /// Model for new rooms: the configured default, described by the catalog
    /// when it knows it.
    pub fn default_model(&self) -> LlmModel {
        self.find_model(&self.settings.default_model)
            .cloned()
            .unwrap_or_else(|| LlmModel::bare(&self.settings.default_model))
    }

    pub async fn update_settings(&mut self, settings: AppSettings) -> Result<(), SessionError> {
        self.settings = settings;
        SettingsService::save(self.store.as_ref(), &self.settings)
            .await
            .map_err(|e| {
                tracing::error!("Failed to save settings: {:#}", e);
                SessionError::Persistence(e)
            })
    }

    // --- Rooms ---

    /// Create an empty room and make it current.
    pub async fn create_room(&mut self, model: Option<LlmModel>) -> Result<String, SessionError> {
        let model = model.unwrap_or_else(|| self.default_model());
        let room = Room::new(format!("Chat {}", self.rooms.len() + 1), model);
        let room_id = room.id.clone();
        tracing::debug!("Created room {} ({})", room.name, room.model.id);

        self.rooms.push(room);
        self.selection = Selection {
            room_id: Some(room_id.clone()),
            focus: Focus::Empty,
        };
        self.persist().await?;
        Ok(room_id)
    }

    /// Remove a room. The first remaining room becomes current.
    pub async fn remove_room(&mut self, room_id: &str) -> Result<(), SessionError> {
        let before = self.rooms.len();
        self.rooms.retain(|r| r.id != room_id);
        if self.rooms.len() == before {
            return Err(not_found("room", room_id));
        }

        self.selection = match self.rooms.first() {
            Some(room) => Selection {
                room_id: Some(room.id.clone()),
                focus: initial_focus(room),
            },
            None => Selection::default(),
        };
        self.persist().await
    }

    pub fn switch_room(&mut self, room_id: &str) -> Result<(), SessionError> {
        let room = self
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .ok_or_else(|| not_found("room", room_id))?;
        self.selection = Selection {
            room_id: Some(room.id.clone()),
            focus: initial_focus(room),
        };
        Ok(())
    }

    pub async fn rename_room(&mut self, room_id: &str, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(declined("Room name is empty"));
        }
        let room = self
            .rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or_else(|| not_found("room", room_id))?;
        room.name = name.to_string();
        self.persist().await
    }

    /// Bind the current room to `model`, or open a new room with it when no
    /// room is selected.
    pub async fn select_model(&mut self, model: LlmModel) -> Result<(), SessionError> {
        let Some(room_id) = self.selection.room_id.clone() else {
            return self.create_room(Some(model)).await.map(|_| ());
        };
        let room = self
            .rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or_else(|| not_found("room", &room_id))?;
        room.model = model;
        self.persist().await
    }

    // --- Branch navigation ---

    /// Focus `target_id`, which must be a peer of a message on the visible path.
    pub fn switch_branch(&mut self, target_id: &str) -> Result<(), SessionError> {
        let room = self.current_room().ok_or_else(|| declined("No active room"))?;
        let target = room
            .messages
            .iter()
            .find(|m| m.id == target_id)
            .ok_or_else(|| not_found("message", target_id))?;

        let on_path = self
            .visible_path()
            .iter()
            .any(|m| m.parent_id == target.parent_id);
        if !on_path {
            return Err(declined("Branch is not part of the visible conversation"));
        }

        tracing::debug!("Switching to branch {}", target_id);
        self.selection.focus = Focus::Viewing(target_id.to_string());
        Ok(())
    }

    /// Move from `message_id` to its neighbouring branch. Returns `false` at
    /// the first or last branch.
    pub fn step_branch(&mut self, message_id: &str, step: BranchStep) -> Result<bool, SessionError> {
        let peers = self.peers(message_id);
        let current = peers
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| not_found("message", message_id))?;

        let number = current.slot().number();
        let wanted = match step {
            BranchStep::Next => number + 1,
            BranchStep::Previous => number.saturating_sub(1),
        };
        let Some(target) = peers.iter().find(|m| m.slot().number() == wanted) else {
            return Ok(false);
        };

        let target_id = target.id.clone();
        self.switch_branch(&target_id)?;
        Ok(true)
    }

    // --- Sending ---

    /// Append `text` after the visible conversation and fetch a reply.
    pub async fn send_message(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<SendReport, SessionError> {
        if text.trim().is_empty() {
            return Err(declined("Message is empty"));
        }
        let room = self.current_room().ok_or_else(|| declined("No active room"))?;
        let tree = ConversationTree::new(&room.id, &room.messages);

        let parent_id = self
            .visible_path()
            .last()
            .map(|m| m.id.clone())
            .unwrap_or_else(|| room.id.clone());
        let message = Message::user(parent_id.clone(), text, tree.next_branch_num(&parent_id));

        self.dispatch(message, cancel).await
    }

    /// Fork `message_id` with `new_content` as a new branch and fetch a reply.
    pub async fn edit_message(
        &mut self,
        message_id: &str,
        new_content: &str,
        cancel: &CancellationToken,
    ) -> Result<SendReport, SessionError> {
        let room = self.current_room().ok_or_else(|| declined("No active room"))?;
        let original = room
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| not_found("message", message_id))?;
        if original.role != Role::User {
            return Err(declined("Only user messages can be edited"));
        }
        let fork = fork_edit(&room.messages, message_id, new_content)
            .ok_or_else(|| not_found("message", message_id))?;

        self.dispatch(fork, cancel).await
    }

    async fn dispatch(
        &mut self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<SendReport, SessionError> {
        let room = self.current_room().ok_or_else(|| declined("No active room"))?;
        let room_id = room.id.clone();
        let model = room.model.clone();

        let api_key = match self.credentials.api_key().await {
            Ok(Some(key)) => key,
            Ok(None) => return Err(declined("API key not set")),
            Err(e) => return Err(SessionError::Persistence(e)),
        };

        let user_message_id = message.id.clone();
        self.commit(&room_id, message)?;
        let mut save_error = self.persist().await.err();

        let room = self.current_room().ok_or_else(|| not_found("room", &room_id))?;
        let history = ConversationTree::new(&room.id, &room.messages)
            .materialize_path(&user_message_id)
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        let request = ChatRequest {
            api_key,
            model: model.id.clone(),
            messages: history,
            temperature: self.settings.temperature,
        };

        let mut reply = Message::pending_reply(user_message_id.clone(), model.short_name());
        let outcome = if self.settings.stream_responses {
            match self.transport.stream_message(request).await {
                Ok(chunks) => assemble(chunks, &mut reply, cancel).await,
                Err(e) => {
                    tracing::error!("Completion request failed: {}", e);
                    return Err(SessionError::Transport(e));
                }
            }
        } else {
            match self.transport.send_message(request).await {
                Ok(response) => {
                    reply.content = response.content;
                    reply.reasoning = response.reasoning;
                    Ok(Termination::Completed)
                }
                Err(e) => {
                    tracing::error!("Completion request failed: {}", e);
                    return Err(SessionError::Transport(e));
                }
            }
        };

        let reply_id = reply.id.clone();
        self.commit(&room_id, reply)?;
        if let Err(e) = self.persist().await {
            save_error = Some(e);
        }

        let termination = outcome.map_err(|e| {
            tracing::error!("Reply stream failed, kept partial content: {}", e);
            SessionError::Transport(e)
        })?;
        if let Some(e) = save_error {
            return Err(e);
        }
        Ok(SendReport {
            user_message_id,
            reply_id,
            termination,
        })
    }

    fn commit(&mut self, room_id: &str, message: Message) -> Result<(), SessionError> {
        let room = self
            .rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or_else(|| not_found("room", room_id))?;
        let focus_id = message.id.clone();
        room.messages = append_message(&room.messages, message);
        self.selection.focus = Focus::Viewing(focus_id);
        Ok(())
    }

    async fn persist(&self) -> Result<(), SessionError> {
        let json = serde_json::to_string(&self.rooms)
            .map_err(|e| SessionError::Persistence(e.into()))?;
        self.store.save(ROOMS_KEY, &json).await.map_err(|e| {
            tracing::error!("Failed to save conversations: {:#}", e);
            SessionError::Persistence(e)
        })
    }
}

/// Where a freshly opened room starts: its first root branch, or nothing.
fn initial_focus(room: &Room) -> Focus {
    let tree = ConversationTree::new(&room.id, &room.messages);
    match tree.root_default_branch().or_else(|| tree.first_root()) {
        Some(msg) => Focus::Viewing(msg.id.clone()),
        None => Focus::Empty,
    }
}

fn not_found(kind: &str, id: &str) -> SessionError {
    tracing::debug!("Unknown {} {}", kind, id);
    SessionError::NotFound(format!("{} {}", kind, id))
}

fn declined(reason: &'static str) -> SessionError {
    tracing::debug!("Declined: {}", reason);
    SessionError::Validation(reason)
}
